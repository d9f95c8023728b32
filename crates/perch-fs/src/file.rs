use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use perch_core::{case_fold, collation_key_for_filename, display_form, CollationKey};
use smol_str::SmolStr;

use crate::icon::{self, IconKind};
use crate::mime::MimeRegistry;

/// Name of the conventional "go up" pseudo-entry every listing starts with.
pub const PARENT_ENTRY_NAME: &str = "..";

bitflags::bitflags! {
    /// What is known about an entry once it has been stat'd.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FileInfo: u16 {
        const EXISTS       = 1 << 0;
        const IS_DIR       = 1 << 1;
        const IS_HIDDEN    = 1 << 2;
        const IS_LINK      = 1 << 3;
        const IS_BLOCK_DEV = 1 << 4;
        const IS_CHAR_DEV  = 1 << 5;
        const IS_FIFO      = 1 << 6;
        const IS_SOCKET    = 1 << 7;
        /// Stat succeeded but the entry cannot be read.
        const IS_LOCKED    = 1 << 8;
    }
}

impl FileInfo {
    pub const IS_SPECIAL: FileInfo = FileInfo::IS_LINK
        .union(FileInfo::IS_BLOCK_DEV)
        .union(FileInfo::IS_CHAR_DEV)
        .union(FileInfo::IS_FIFO)
        .union(FileInfo::IS_SOCKET);
}

bitflags::bitflags! {
    /// Which population stages have completed for an entry.
    ///
    /// Set monotonically: once a stage flag is set it is never cleared for
    /// the lifetime of the record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FileFlags: u8 {
        const HAS_STAT      = 1 << 0;
        const HAS_MIME_TYPE = 1 << 1;
        const HAS_ICON      = 1 << 2;
    }
}

/// Stat results kept on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub modified: Option<SystemTime>,
    /// Unix permission bits; zero where the platform has none.
    pub mode: u32,
}

impl FileStat {
    fn from_metadata(meta: &fs::Metadata) -> Self {
        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            meta.permissions().mode()
        };
        #[cfg(not(unix))]
        let mode = 0;

        Self {
            size: meta.len(),
            modified: meta.modified().ok(),
            mode,
        }
    }
}

/// One directory entry's staged metadata.
///
/// Records are cheap to clone (names and keys are shared allocations);
/// callers receive clones as snapshots, so a snapshot stays valid after its
/// folder mutates or goes away entirely.
///
/// Accessors gated on a population stage return the documented default
/// (treated as nonexistent) until that stage has run — query
/// [`FileRecord::flags`] first when the distinction matters.
#[derive(Debug, Clone)]
pub struct FileRecord {
    name: SmolStr,
    display_name: SmolStr,
    case_display_name: SmolStr,
    collation_key: Arc<CollationKey>,
    info: FileInfo,
    flags: FileFlags,
    icon: IconKind,
    mime_type: Option<Arc<str>>,
    link_target: Option<PathBuf>,
    stat: Option<FileStat>,
}

impl FileRecord {
    /// Creates a record for a freshly enumerated entry name. Nothing is
    /// stat'd yet.
    pub fn new(basename: &str) -> Self {
        let display_name = display_form(basename);
        let case_display_name = case_fold(&display_name);
        let collation_key = Arc::new(collation_key_for_filename(&display_name));

        #[cfg(unix)]
        let info = if basename.starts_with('.') {
            FileInfo::IS_HIDDEN
        } else {
            FileInfo::empty()
        };
        #[cfg(not(unix))]
        let info = FileInfo::empty();

        Self {
            name: SmolStr::new(basename),
            display_name,
            case_display_name,
            collation_key,
            info,
            flags: FileFlags::empty(),
            icon: IconKind::Blank,
            mime_type: None,
            link_target: None,
            stat: None,
        }
    }

    /// Builds the `..` pseudo-entry for a listing of `dirname`.
    pub fn parent_entry(dirname: &Path) -> Self {
        let mut record = Self::new(PARENT_ENTRY_NAME);
        record.info = FileInfo::EXISTS | FileInfo::IS_DIR;
        record.flags = FileFlags::HAS_MIME_TYPE | FileFlags::HAS_ICON;
        record.icon = icon::classify(&record, dirname);
        record
    }

    /// Stats the entry (as `dirname/name`) and fills in the info bits.
    ///
    /// Symlinks are resolved: `EXISTS`/`IS_DIR` reflect the link target, and
    /// a link whose target is gone keeps `IS_LINK` with `EXISTS` clear. A
    /// failed stat still completes the stage — `HAS_STAT` is always set on
    /// return, with the entry marked nonexistent or locked as appropriate.
    pub fn stat(&mut self, dirname: &Path) {
        let path = dirname.join(self.name.as_str());

        self.info = FileInfo::EXISTS;
        self.link_target = None;
        self.stat = None;

        match fs::symlink_metadata(&path) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.info = FileInfo::empty();
            }
            Err(err) => {
                tracing::debug!(
                    target: "perch.fs",
                    path = %path.display(),
                    error = %err,
                    "could not stat entry"
                );
                self.info = FileInfo::EXISTS | FileInfo::IS_LOCKED;
            }
            Ok(lstat) => {
                #[cfg(unix)]
                let mut meta = lstat;
                #[cfg(not(unix))]
                let meta = lstat;

                #[cfg(unix)]
                if meta.file_type().is_symlink() {
                    self.info |= FileInfo::IS_LINK;
                    match fs::read_link(&path) {
                        Ok(target) => self.link_target = Some(target),
                        Err(err) => {
                            tracing::trace!(
                                target: "perch.fs",
                                path = %path.display(),
                                error = %err,
                                "could not read link target"
                            );
                        }
                    }
                    match fs::metadata(&path) {
                        Ok(target_meta) => meta = target_meta,
                        Err(err) if err.kind() == io::ErrorKind::NotFound => {
                            // Broken link: the link itself exists, its target
                            // does not.
                            self.info = FileInfo::IS_LINK;
                        }
                        Err(err) => {
                            tracing::debug!(
                                target: "perch.fs",
                                path = %path.display(),
                                error = %err,
                                "could not stat link target"
                            );
                            self.info =
                                FileInfo::EXISTS | FileInfo::IS_LOCKED | FileInfo::IS_LINK;
                        }
                    }
                }

                if self.info.contains(FileInfo::EXISTS) && !self.info.contains(FileInfo::IS_LOCKED)
                {
                    let file_type = meta.file_type();
                    if file_type.is_dir() {
                        self.info |= FileInfo::IS_DIR;
                    } else {
                        #[cfg(unix)]
                        {
                            use std::os::unix::fs::FileTypeExt;
                            if file_type.is_block_device() {
                                self.info |= FileInfo::IS_BLOCK_DEV;
                            } else if file_type.is_char_device() {
                                self.info |= FileInfo::IS_CHAR_DEV;
                            } else if file_type.is_fifo() {
                                self.info |= FileInfo::IS_FIFO;
                            } else if file_type.is_socket() {
                                self.info |= FileInfo::IS_SOCKET;
                            }
                        }
                    }
                    self.stat = Some(FileStat::from_metadata(&meta));
                }
            }
        }

        self.flags |= FileFlags::HAS_STAT;

        // Directories need no content sniffing; their MIME and icon are
        // settled the moment the stat lands.
        if self.info.contains(FileInfo::IS_DIR) {
            self.flags |= FileFlags::HAS_MIME_TYPE | FileFlags::HAS_ICON;
        }

        #[cfg(unix)]
        if self.name.starts_with('.') {
            self.info |= FileInfo::IS_HIDDEN;
        }

        self.icon = icon::classify(self, dirname);
    }

    /// Resolves the MIME type from the shared registry. Sets `HAS_MIME_TYPE`.
    pub fn resolve_mime(&mut self, dirname: &Path, registry: &MimeRegistry) {
        let path = dirname.join(self.name.as_str());
        self.mime_type = Some(registry.resolve(&path, self.info));
        self.flags |= FileFlags::HAS_MIME_TYPE;
    }

    /// Re-derives the icon classification. Sets `HAS_ICON`.
    pub fn refresh_icon(&mut self, dirname: &Path) {
        self.icon = icon::classify(self, dirname);
        self.flags |= FileFlags::HAS_ICON;
    }

    pub fn name(&self) -> &SmolStr {
        &self.name
    }

    pub fn display_name(&self) -> &SmolStr {
        &self.display_name
    }

    pub fn case_display_name(&self) -> &SmolStr {
        &self.case_display_name
    }

    pub fn collation_key(&self) -> &CollationKey {
        &self.collation_key
    }

    pub fn info(&self) -> FileInfo {
        self.info
    }

    pub fn flags(&self) -> FileFlags {
        self.flags
    }

    pub fn icon(&self) -> IconKind {
        self.icon
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// Link target, when the entry is a symlink (unix only).
    pub fn link_target(&self) -> Option<&Path> {
        self.link_target.as_deref()
    }

    pub fn stat_info(&self) -> Option<&FileStat> {
        self.stat.as_ref()
    }

    pub fn is_parent_entry(&self) -> bool {
        self.name == PARENT_ENTRY_NAME
    }

    pub fn test(&self, info: FileInfo) -> bool {
        self.info.intersects(info)
    }

    pub fn exists(&self) -> bool {
        self.test(FileInfo::EXISTS)
    }

    pub fn is_dir(&self) -> bool {
        self.test(FileInfo::IS_DIR)
    }

    pub fn is_hidden(&self) -> bool {
        self.test(FileInfo::IS_HIDDEN)
    }

    pub fn is_link(&self) -> bool {
        self.test(FileInfo::IS_LINK)
    }

    pub fn is_broken_link(&self) -> bool {
        !self.exists() && self.is_link()
    }

    pub fn is_locked(&self) -> bool {
        self.test(FileInfo::IS_LOCKED)
    }

    pub fn is_special(&self) -> bool {
        self.test(FileInfo::IS_SPECIAL)
    }

    pub fn is_block_device(&self) -> bool {
        self.test(FileInfo::IS_BLOCK_DEV)
    }

    pub fn is_char_device(&self) -> bool {
        self.test(FileInfo::IS_CHAR_DEV)
    }

    pub fn is_fifo(&self) -> bool {
        self.test(FileInfo::IS_FIFO)
    }

    pub fn is_socket(&self) -> bool {
        self.test(FileInfo::IS_SOCKET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_stat_queries_return_nonexistent_defaults() {
        let record = FileRecord::new("whatever.txt");
        assert!(!record.flags().contains(FileFlags::HAS_STAT));
        assert!(!record.exists());
        assert!(!record.is_dir());
        assert!(!record.is_locked());
        assert_eq!(record.icon(), IconKind::Blank);
        assert!(record.stat_info().is_none());
    }

    #[test]
    fn stat_of_regular_file_fills_info() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let mut record = FileRecord::new("a.txt");
        record.stat(dir.path());

        assert!(record.flags().contains(FileFlags::HAS_STAT));
        assert!(record.exists());
        assert!(!record.is_dir());
        assert_eq!(record.stat_info().unwrap().size, 5);
        assert_eq!(record.icon(), IconKind::File);
    }

    #[test]
    fn stat_of_missing_entry_still_completes_the_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = FileRecord::new("gone.txt");
        record.stat(dir.path());

        assert!(record.flags().contains(FileFlags::HAS_STAT));
        assert!(!record.exists());
        assert_eq!(record.icon(), IconKind::Nonexistent);
    }

    #[test]
    fn directories_settle_mime_and_icon_at_stat_time() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let mut record = FileRecord::new("sub");
        record.stat(dir.path());

        assert!(record.is_dir());
        assert!(record
            .flags()
            .contains(FileFlags::HAS_STAT | FileFlags::HAS_MIME_TYPE | FileFlags::HAS_ICON));
        assert_eq!(record.icon(), IconKind::Directory);
    }

    #[cfg(unix)]
    #[test]
    fn dot_names_are_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".hidden"), b"").unwrap();

        let mut record = FileRecord::new(".hidden");
        assert!(record.is_hidden());
        record.stat(dir.path());
        assert!(record.is_hidden());
    }

    #[cfg(unix)]
    #[test]
    fn broken_symlink_keeps_is_link_without_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(dir.path().join("missing"), dir.path().join("link")).unwrap();

        let mut record = FileRecord::new("link");
        record.stat(dir.path());

        assert!(record.is_link());
        assert!(!record.exists());
        assert!(record.is_broken_link());
        assert!(record.flags().contains(FileFlags::HAS_STAT));
        assert_eq!(record.icon(), IconKind::BrokenLink);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_reports_its_target_and_the_target_type() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("target")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("target"), dir.path().join("link")).unwrap();

        let mut record = FileRecord::new("link");
        record.stat(dir.path());

        assert!(record.is_link());
        assert!(record.exists());
        assert!(record.is_dir(), "EXISTS/IS_DIR follow the link target");
        assert_eq!(
            record.link_target(),
            Some(dir.path().join("target").as_path())
        );
    }

    #[test]
    fn mime_resolution_uses_the_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();

        let registry = MimeRegistry::new();
        let mut record = FileRecord::new("a.txt");
        record.stat(dir.path());
        record.resolve_mime(dir.path(), &registry);
        record.refresh_icon(dir.path());

        assert_eq!(record.mime_type(), Some("text/plain"));
        assert!(record.flags().contains(FileFlags::HAS_MIME_TYPE));
        assert_eq!(record.icon(), IconKind::Mime);
    }

    #[test]
    fn parent_entry_is_preset() {
        let record = FileRecord::parent_entry(Path::new("/tmp"));
        assert!(record.is_parent_entry());
        assert!(record.exists());
        assert!(record.is_dir());
        assert!(record
            .flags()
            .contains(FileFlags::HAS_MIME_TYPE | FileFlags::HAS_ICON));
        assert!(!record.flags().contains(FileFlags::HAS_STAT));
    }
}
