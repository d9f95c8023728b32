//! Directory-listing layer for perch.
//!
//! This crate is responsible for:
//! - Listing directories into staged, progressively populated file records
//!   (names, then stat results, then MIME type and icon) without ever
//!   blocking the host event loop on a large directory.
//! - Deduplicating live folders by normalized path and keeping a bounded
//!   cache of recently released listings so quick back/forward navigation
//!   skips the rescan.
//! - Merging file-system watch events into listings and delivering ordered
//!   per-folder change notifications.
//! - Maintaining the comparator-ordered projection a tree or icon view
//!   consumes, plus the usual file operations (create, delete, trash,
//!   rename) behind one facade.

mod cache;
mod error;
mod event;
mod file;
mod folder;
mod fs;
mod icon;
mod mime;
mod sorted;
mod watch;

pub use cache::FOLDER_CACHE_CAPACITY;
pub use error::{FsError, Result};
pub use event::FolderEvent;
pub use file::{FileFlags, FileInfo, FileRecord, FileStat, PARENT_ENTRY_NAME};
pub use folder::{Folder, Stage};
pub use fs::{DeleteFlags, FileSystem, ParsedPath};
pub use icon::IconKind;
pub use mime::{MimeRegistry, MIME_DIRECTORY, MIME_UNKNOWN};
pub use perch_core::{normalize_path, FolderPath, PathError};
pub use sorted::{SortOrder, SortedFileList};
pub use watch::{
    FileChange, FileWatcher, ManualFileWatcher, ManualFileWatcherHandle, WatchEvent, WatchMessage,
};

#[cfg(feature = "watch-notify")]
pub use watch::NotifyFileWatcher;

use std::sync::{Mutex, MutexGuard};

/// Locks a mutex, recovering from poisoning instead of propagating a panic
/// from some unrelated unwinding thread.
#[track_caller]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(err) => {
            let loc = std::panic::Location::caller();
            tracing::error!(
                target: "perch.fs",
                file = loc.file(),
                line = loc.line(),
                error = %err,
                "mutex poisoned; continuing with recovered guard"
            );
            err.into_inner()
        }
    }
}
