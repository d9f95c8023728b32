use crate::file::FileRecord;

/// A change notification emitted by one folder.
///
/// Events are delivered per folder, in the order the underlying file-system
/// events and population slices were processed, exactly once per change.
/// Every subscriber of a folder observes the identical stream. Records are
/// carried as snapshots taken at emission time.
#[derive(Debug, Clone)]
pub enum FolderEvent {
    /// Entries appeared (initial enumeration or created on disk).
    Added(Vec<FileRecord>),
    /// Entries gained metadata (a population stage ran) or changed on disk.
    Changed(Vec<FileRecord>),
    /// Entries disappeared from the directory.
    Removed(Vec<FileRecord>),
    /// The directory itself is gone; no further events follow.
    Deleted,
}
