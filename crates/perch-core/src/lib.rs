//! Core shared types for perch.
//!
//! This crate is intentionally small: lexical path normalization, the
//! normalized folder-path key type, and the filename collation key. Anything
//! that touches the real file system lives in `perch-fs`.

mod collate;
mod path;

pub use collate::{case_fold, collation_key_for_filename, display_form, CollationKey};
pub use path::{normalize_path, FolderPath, PathError};
