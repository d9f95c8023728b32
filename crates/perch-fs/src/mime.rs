use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::file::FileInfo;

/// MIME type reported for directories.
pub const MIME_DIRECTORY: &str = "inode/directory";
/// Fallback MIME type when detection produces nothing usable.
pub const MIME_UNKNOWN: &str = "application/octet-stream";

/// Process-wide MIME string cache.
///
/// Records hold `Arc<str>` clones handed out by this registry, so equal MIME
/// strings share one allocation no matter how many entries carry them. The
/// handle itself is cheap to clone; all clones share the same cache.
#[derive(Debug, Clone, Default)]
pub struct MimeRegistry {
    interned: Arc<Mutex<HashSet<Arc<str>>>>,
}

impl MimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared allocation for `mime`, interning it on first use.
    pub fn intern(&self, mime: &str) -> Arc<str> {
        let mut interned = match self.interned.lock() {
            Ok(guard) => guard,
            Err(err) => err.into_inner(),
        };
        if let Some(existing) = interned.get(mime) {
            return Arc::clone(existing);
        }
        let entry: Arc<str> = Arc::from(mime);
        interned.insert(Arc::clone(&entry));
        entry
    }

    /// Resolves the MIME type for an entry.
    ///
    /// Directories get the fixed synthetic type; special files are classified
    /// without touching their content; everything else goes through
    /// extension-based detection with an `application/octet-stream` fallback.
    pub fn resolve(&self, path: &Path, info: FileInfo) -> Arc<str> {
        if info.contains(FileInfo::IS_DIR) {
            return self.intern(MIME_DIRECTORY);
        }
        if let Some(special) = special_mime(info) {
            return self.intern(special);
        }
        match mime_guess2::from_path(path).first_raw() {
            Some(mime) if !mime.is_empty() => self.intern(mime),
            _ => self.intern(MIME_UNKNOWN),
        }
    }

    #[cfg(test)]
    pub(crate) fn interned_count(&self) -> usize {
        match self.interned.lock() {
            Ok(guard) => guard.len(),
            Err(err) => err.into_inner().len(),
        }
    }
}

fn special_mime(info: FileInfo) -> Option<&'static str> {
    if info.contains(FileInfo::IS_BLOCK_DEV) {
        Some("inode/blockdevice")
    } else if info.contains(FileInfo::IS_CHAR_DEV) {
        Some("inode/chardevice")
    } else if info.contains(FileInfo::IS_FIFO) {
        Some("inode/fifo")
    } else if info.contains(FileInfo::IS_SOCKET) {
        Some("inode/socket")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_mime_strings_share_one_allocation() {
        let registry = MimeRegistry::new();
        let a = registry.resolve(Path::new("/tmp/a.txt"), FileInfo::EXISTS);
        let b = registry.resolve(Path::new("/tmp/b.txt"), FileInfo::EXISTS);
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.interned_count(), 1);
    }

    #[test]
    fn directories_get_the_synthetic_type() {
        let registry = MimeRegistry::new();
        let mime = registry.resolve(
            Path::new("/tmp/dir.txt"),
            FileInfo::EXISTS | FileInfo::IS_DIR,
        );
        assert_eq!(&*mime, MIME_DIRECTORY);
    }

    #[test]
    fn special_files_skip_content_detection() {
        let registry = MimeRegistry::new();
        let mime = registry.resolve(
            Path::new("/dev/sda"),
            FileInfo::EXISTS | FileInfo::IS_BLOCK_DEV,
        );
        assert_eq!(&*mime, "inode/blockdevice");
    }

    #[test]
    fn unknown_extensions_fall_back() {
        let registry = MimeRegistry::new();
        let mime = registry.resolve(Path::new("/tmp/no-extension"), FileInfo::EXISTS);
        assert_eq!(&*mime, MIME_UNKNOWN);
    }
}
