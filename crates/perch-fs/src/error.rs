use std::path::PathBuf;

use perch_core::PathError;

pub type Result<T> = std::result::Result<T, FsError>;

/// Errors produced by the file-system facade and folder construction.
///
/// Per-entry population failures (a single file's stat failing) never surface
/// here; they degrade that one record and population continues.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("path '{}' is not a usable filename: {reason}", path.display())]
    BadFilename { path: PathBuf, reason: String },

    #[error("'{}' does not exist", .0.display())]
    Nonexistent(PathBuf),

    #[error("'{}' is not a folder", .0.display())]
    NotAFolder(PathBuf),

    #[error("{0} is not implemented on this platform")]
    NotImplemented(&'static str),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    pub(crate) fn bad_filename(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        FsError::BadFilename {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<PathError> for FsError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::NotAbsolute(path) => FsError::bad_filename(path, "not absolute"),
        }
    }
}
