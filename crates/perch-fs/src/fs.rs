use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use hashbrown::HashMap;
use perch_core::{normalize_path, FolderPath};
use smol_str::SmolStr;

use crate::cache::FolderCache;
use crate::error::{FsError, Result};
use crate::folder::{Folder, FolderShared, FolderState, Stage};
use crate::lock;
use crate::mime::MimeRegistry;
use crate::watch::{FileChange, FileWatcher, WatchEvent};

bitflags::bitflags! {
    /// Strategy switches for [`FileSystem::delete_file`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeleteFlags: u8 {
        /// Delete non-empty directories.
        const RECURSIVE = 1 << 0;
        /// Move into the trash instead of removing.
        const TO_TRASH  = 1 << 1;
    }
}

/// Result of [`FileSystem::parse_path`]: the canonical parent directory plus
/// the display-form pieces for re-assembling user-facing text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath {
    pub dirname: FolderPath,
    pub display_dirname: String,
    pub display_basename: String,
}

enum WatcherSlot {
    /// No watcher yet; created lazily on first subscription.
    Unset,
    /// Watcher construction failed or no backend is compiled in; folders
    /// work without live updates.
    Unavailable,
    Ready(Box<dyn FileWatcher>),
}

struct FsInner {
    /// Live folders, one per normalized path.
    folders: Mutex<HashMap<FolderPath, Weak<FolderShared>>>,
    cache: Mutex<FolderCache>,
    watcher: Mutex<WatcherSlot>,
    mime: MimeRegistry,
    /// Counts directory enumerations (construction and reload); lets tests
    /// and diagnostics observe cache effectiveness.
    enumerations: AtomicUsize,
}

/// Access point for folder listings and file operations.
///
/// The facade deduplicates live folders by normalized path (at most one
/// listing exists per directory at a time), keeps the bounded cache of
/// recently released listings, and owns the shared watcher. Handles are
/// cheap to clone and all clones share state; pass the instance to whoever
/// needs it rather than relying on a process-wide global.
#[derive(Clone)]
pub struct FileSystem {
    inner: Arc<FsInner>,
}

impl Default for FileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FsInner {
                folders: Mutex::new(HashMap::new()),
                cache: Mutex::new(FolderCache::new()),
                watcher: Mutex::new(WatcherSlot::Unset),
                mime: MimeRegistry::new(),
                enumerations: AtomicUsize::new(0),
            }),
        }
    }

    /// Builds a facade with an injected watcher backend (tests use
    /// [`crate::ManualFileWatcher`] here).
    pub fn with_watcher(watcher: Box<dyn FileWatcher>) -> Self {
        let fs = Self::new();
        *lock(&fs.inner.watcher) = WatcherSlot::Ready(watcher);
        fs
    }

    /// The shared MIME string cache.
    pub fn mime_registry(&self) -> MimeRegistry {
        self.inner.mime.clone()
    }

    /// How many directory enumerations have run so far (instrumentation).
    pub fn enumeration_count(&self) -> usize {
        self.inner.enumerations.load(Ordering::Relaxed)
    }

    /// Returns the folder at `path`, raising its population stage to
    /// `wanted`.
    ///
    /// Lookup order: live folder (shared handle), then the release cache
    /// (promoted without a rescan), then a fresh enumeration. The path must
    /// be absolute; it is normalized before any lookup, so every spelling of
    /// a directory maps to the same folder.
    pub fn get_folder(&self, path: impl AsRef<Path>, wanted: Stage) -> Result<Folder> {
        let raw = path.as_ref();
        if !raw.is_absolute() {
            return Err(FsError::bad_filename(raw, "not absolute"));
        }
        let key = FolderPath::new(raw)?;

        if let Some(shared) = self.live_lookup(&key) {
            let folder = Folder { shared };
            folder.set_wanted(wanted, true);
            return Ok(folder);
        }

        if let Some(state) = lock(&self.inner.cache).take(&key) {
            let folder = self.adopt_state(state);
            folder.set_wanted(wanted, true);
            return Ok(folder);
        }

        match fs::metadata(key.as_path()) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(FsError::Nonexistent(key.as_path().to_path_buf()));
            }
            Err(err) => return Err(err.into()),
            Ok(meta) if !meta.is_dir() => {
                return Err(FsError::NotAFolder(key.as_path().to_path_buf()));
            }
            Ok(_) => {}
        }

        let names = self.enumerate_names(&key)?;
        let folder = self.adopt_state(FolderState::new(key, names));
        folder.set_wanted(wanted, true);
        Ok(folder)
    }

    /// The file-system root.
    pub fn get_root_folder(&self, wanted: Stage) -> Result<Folder> {
        if cfg!(not(unix)) {
            // Drive enumeration has no counterpart here yet.
            return Err(FsError::NotImplemented("root folder enumeration"));
        }
        self.get_folder("/", wanted)
    }

    /// The parent of `folder`; works even when `folder` itself was deleted,
    /// as long as the parent still exists.
    pub fn get_parent_folder(&self, folder: &Folder, wanted: Stage) -> Result<Folder> {
        self.get_folder(folder.path().parent().as_path(), wanted)
    }

    /// Creates a directory with default permissions (umask applies).
    pub fn create_folder(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return Err(FsError::bad_filename(path, "not absolute"));
        }
        fs::create_dir(path)?;
        Ok(())
    }

    /// Deletes `path` using the strategy selected by `flags`.
    ///
    /// A symlink is removed as a file even when it points at a directory.
    pub fn delete_file(&self, path: impl AsRef<Path>, flags: DeleteFlags) -> Result<()> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return Err(FsError::bad_filename(path, "not absolute"));
        }

        if flags.contains(DeleteFlags::TO_TRASH) {
            return move_to_trash(path);
        }

        let meta = fs::symlink_metadata(path)?;
        if meta.file_type().is_dir() {
            if flags.contains(DeleteFlags::RECURSIVE) {
                fs::remove_dir_all(path)?;
            } else {
                fs::remove_dir(path)?;
            }
        } else {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Renames `old_path` to `new_path`; both must be absolute.
    pub fn move_file(&self, old_path: impl AsRef<Path>, new_path: impl AsRef<Path>) -> Result<()> {
        let (old_path, new_path) = (old_path.as_ref(), new_path.as_ref());
        if !old_path.is_absolute() {
            return Err(FsError::bad_filename(old_path, "not absolute"));
        }
        if !new_path.is_absolute() {
            return Err(FsError::bad_filename(new_path, "not absolute"));
        }
        fs::rename(old_path, new_path)?;
        Ok(())
    }

    /// Joins `base_path` with a user-entered name.
    ///
    /// Fails with `BadFilename` when the name cannot be one on-disk path
    /// component.
    pub fn make_path(&self, base_path: impl AsRef<Path>, display_name: &str) -> Result<PathBuf> {
        let base = base_path.as_ref();
        if !base.is_absolute() {
            return Err(FsError::bad_filename(base, "not absolute"));
        }
        if display_name.is_empty() {
            return Err(FsError::bad_filename(base, "empty file name"));
        }
        if display_name.contains(['/', '\\', '\0']) {
            return Err(FsError::bad_filename(
                Path::new(display_name),
                "name contains a path separator",
            ));
        }
        Ok(base.join(display_name))
    }

    /// Splits a full display path into its canonical parent directory and
    /// the display-form directory/basename pieces.
    pub fn parse_path(&self, path: &str) -> Result<ParsedPath> {
        if cfg!(not(unix)) {
            // Drive-qualified parsing is a stated gap.
            return Err(FsError::NotImplemented("path parsing"));
        }

        if path.is_empty() || !path.starts_with('/') {
            return Err(FsError::bad_filename(Path::new(path), "not absolute"));
        }

        if path == "/" {
            return Ok(ParsedPath {
                dirname: FolderPath::new("/")?,
                display_dirname: "/".to_string(),
                display_basename: String::new(),
            });
        }

        let separator = path.rfind('/').unwrap_or(0);
        let display_dirname = &path[..=separator];
        let display_basename = &path[separator + 1..];

        Ok(ParsedPath {
            dirname: FolderPath::new(display_dirname)?,
            display_dirname: display_dirname.to_string(),
            display_basename: display_basename.to_string(),
        })
    }

    /// Resolves a user-typed name into an absolute path: `~`-prefixed forms
    /// against the home directory, absolute forms as-is, anything else
    /// against `current_dir`. Returns `None` for a relative name with no
    /// current directory to resolve against.
    pub fn get_absolute_path(
        &self,
        display_name: &str,
        current_dir: Option<&Path>,
    ) -> Option<PathBuf> {
        if display_name.is_empty() {
            return None;
        }

        if let Some(rest) = display_name.strip_prefix('~') {
            let home = dirs::home_dir()?;
            let rest = rest.trim_start_matches(['/', '\\']);
            return Some(if rest.is_empty() { home } else { home.join(rest) });
        }

        if Path::new(display_name).is_absolute() {
            return Some(PathBuf::from(display_name));
        }

        current_dir.map(|dir| dir.join(display_name))
    }

    /// One turn of the crank: drains watcher messages, routes them to the
    /// affected folders, then gives every live folder one population slice.
    ///
    /// The host event loop calls this between input handling; no call ever
    /// blocks on a whole directory.
    pub fn pump(&self) {
        let messages = {
            let mut slot = lock(&self.inner.watcher);
            match &mut *slot {
                WatcherSlot::Ready(watcher) => watcher.poll(),
                _ => Vec::new(),
            }
        };

        for message in messages {
            match message {
                Ok(WatchEvent::Changes(changes)) => {
                    for change in &changes {
                        self.route_change(change);
                    }
                }
                Ok(WatchEvent::Rescan) => self.mark_all_reload(),
                Err(err) => {
                    tracing::warn!(
                        target: "perch.fs",
                        error = %err,
                        "file watcher reported an error; reloading watched folders"
                    );
                    self.mark_all_reload();
                }
            }
        }

        for shared in self.live_shareds() {
            if shared.take_pending_reload() {
                shared.do_reload();
            }
            if shared.needs_work() {
                shared.populate_step();
            }
        }
    }

    /// Lists entry names of `path`, bumping the enumeration counter.
    pub(crate) fn enumerate_names(&self, path: &FolderPath) -> Result<Vec<SmolStr>> {
        self.inner.enumerations.fetch_add(1, Ordering::Relaxed);

        let map_err = |err: io::Error| match err.kind() {
            io::ErrorKind::NotFound => FsError::Nonexistent(path.as_path().to_path_buf()),
            io::ErrorKind::NotADirectory => FsError::NotAFolder(path.as_path().to_path_buf()),
            _ => FsError::Io(err),
        };

        let mut names = Vec::new();
        for entry in fs::read_dir(path.as_path()).map_err(map_err)? {
            let entry = entry.map_err(map_err)?;
            names.push(SmolStr::new(entry.file_name().to_string_lossy()));
        }
        Ok(names)
    }

    /// Called when the last handle to a folder drops: park the state in the
    /// cache, or tear it down if its directory is gone.
    pub(crate) fn folder_finalized(&self, state: FolderState) {
        let path = state.path().clone();
        {
            let mut folders = lock(&self.inner.folders);
            if folders
                .get(&path)
                .is_some_and(|weak| weak.upgrade().is_none())
            {
                folders.remove(&path);
            }
        }

        if state.is_deleted() {
            self.discard_state(state);
        } else if let Some(evicted) = lock(&self.inner.cache).add(state) {
            self.discard_state(evicted);
        }
    }

    /// Called when a live folder observes the deletion of its directory.
    pub(crate) fn handle_folder_deleted(&self, path: &FolderPath, shared: &FolderShared) {
        lock(&self.inner.folders).remove(path);
        let was_watching = shared
            .with_state(FolderState::take_watching)
            .unwrap_or(false);
        if was_watching {
            self.unwatch(path);
        }
    }

    fn live_lookup(&self, path: &FolderPath) -> Option<Arc<FolderShared>> {
        lock(&self.inner.folders).get(path).and_then(Weak::upgrade)
    }

    fn live_shareds(&self) -> Vec<Arc<FolderShared>> {
        lock(&self.inner.folders)
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn mark_all_reload(&self) {
        for shared in self.live_shareds() {
            shared.mark_reload();
        }
    }

    /// Wraps a (fresh or cache-promoted) state in a live handle.
    fn adopt_state(&self, mut state: FolderState) -> Folder {
        if !state.is_watching() {
            state.set_watching(self.watch_subscribe(state.path()));
        }
        let path = state.path().clone();
        let shared = Arc::new(FolderShared::new(self.clone(), state));
        lock(&self.inner.folders).insert(path, Arc::downgrade(&shared));
        Folder { shared }
    }

    /// Tears down a state that will never be revived.
    fn discard_state(&self, mut state: FolderState) {
        let path = state.path().clone();
        if state.take_watching() {
            self.unwatch(&path);
        }
    }

    fn watch_subscribe(&self, path: &FolderPath) -> bool {
        let mut slot = lock(&self.inner.watcher);
        if matches!(&*slot, WatcherSlot::Unset) {
            *slot = default_watcher();
        }
        let WatcherSlot::Ready(watcher) = &mut *slot else {
            return false;
        };
        match watcher.watch_path(path.as_path()) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    target: "perch.fs",
                    path = %path,
                    error = %err,
                    "could not watch folder; it will not see live updates"
                );
                false
            }
        }
    }

    fn unwatch(&self, path: &FolderPath) {
        let mut slot = lock(&self.inner.watcher);
        if let WatcherSlot::Ready(watcher) = &mut *slot {
            if let Err(err) = watcher.unwatch_path(path.as_path()) {
                tracing::trace!(
                    target: "perch.fs",
                    path = %path,
                    error = %err,
                    "could not unwatch folder"
                );
            }
        }
    }

    /// Routes one normalized watcher change to the folders it concerns: the
    /// folder at that path (if any) and the folder listing its parent
    /// directory. Cached listings are kept consistent too, silently.
    fn route_change(&self, change: &FileChange) {
        let raw = normalize_path(change.path());

        if let Ok(key) = FolderPath::new(raw.clone()) {
            if let Some(shared) = self.live_lookup(&key) {
                match change {
                    FileChange::Deleted(_) => shared.on_deleted(),
                    FileChange::Created(_) | FileChange::Modified(_) => shared.mark_reload(),
                }
            } else {
                let mut cache = lock(&self.inner.cache);
                if cache.contains(&key) {
                    if matches!(change, FileChange::Deleted(_)) {
                        let state = cache.remove(&key);
                        drop(cache);
                        if let Some(state) = state {
                            self.discard_state(state);
                        }
                    } else if let Some(state) = cache.peek_mut(&key) {
                        state.mark_reload();
                    }
                }
            }
        }

        let Some(name) = raw.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return;
        };
        let Some(parent) = raw.parent() else {
            return;
        };
        let Ok(parent_key) = FolderPath::new(parent.to_path_buf()) else {
            return;
        };

        if let Some(shared) = self.live_lookup(&parent_key) {
            match change {
                FileChange::Created(_) => shared.on_child_created(&name),
                FileChange::Deleted(_) => shared.on_child_deleted(&name),
                FileChange::Modified(_) => shared.on_child_changed(&name),
            }
        } else {
            let registry = self.mime_registry();
            let mut cache = lock(&self.inner.cache);
            if let Some(state) = cache.peek_mut(&parent_key) {
                match change {
                    FileChange::Created(_) => {
                        state.insert_created(&name, &registry);
                    }
                    FileChange::Deleted(_) => {
                        state.remove_deleted(&name);
                    }
                    FileChange::Modified(_) => {
                        state.restat_changed(&name, &registry);
                    }
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn cached_paths(&self) -> Vec<FolderPath> {
        lock(&self.inner.cache).paths()
    }

    #[cfg(test)]
    pub(crate) fn cache_len(&self) -> usize {
        lock(&self.inner.cache).len()
    }
}

/// Moves `path` into the user trash, freedesktop style: the entry lands in
/// `Trash/files` and a matching `.trashinfo` records where it came from.
fn move_to_trash(path: &Path) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| FsError::bad_filename(path, "no file name"))?
        .to_string_lossy()
        .into_owned();

    let data_dir = dirs::data_local_dir().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "no user data directory for trash")
    })?;
    let files_dir = data_dir.join("Trash").join("files");
    let info_dir = data_dir.join("Trash").join("info");
    fs::create_dir_all(&files_dir)?;
    fs::create_dir_all(&info_dir)?;

    // Find a free slot; trash entries never overwrite each other.
    let mut chosen = file_name.clone();
    let mut counter = 1u32;
    while files_dir.join(&chosen).exists() || info_dir.join(format!("{chosen}.trashinfo")).exists()
    {
        chosen = format!("{file_name}.{counter}");
        counter += 1;
    }

    let deleted_at = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S");
    fs::write(
        info_dir.join(format!("{chosen}.trashinfo")),
        format!(
            "[Trash Info]\nPath={}\nDeletionDate={}\n",
            path.display(),
            deleted_at
        ),
    )?;
    fs::rename(path, files_dir.join(&chosen))?;
    Ok(())
}

fn default_watcher() -> WatcherSlot {
    #[cfg(feature = "watch-notify")]
    {
        match crate::watch::NotifyFileWatcher::new() {
            Ok(watcher) => WatcherSlot::Ready(Box::new(watcher)),
            Err(err) => {
                tracing::warn!(
                    target: "perch.fs",
                    error = %err,
                    "could not start the file watcher; live updates disabled"
                );
                WatcherSlot::Unavailable
            }
        }
    }

    #[cfg(not(feature = "watch-notify"))]
    {
        tracing::debug!(
            target: "perch.fs",
            "no watcher backend compiled in; live updates disabled"
        );
        WatcherSlot::Unavailable
    }
}
