use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel as channel;
use hashbrown::{HashMap, HashSet};
use perch_core::FolderPath;
use smol_str::SmolStr;

use crate::event::FolderEvent;
use crate::file::{FileFlags, FileRecord, PARENT_ENTRY_NAME};
use crate::fs::FileSystem;
use crate::lock;
use crate::mime::MimeRegistry;

/// How far a folder's population has progressed.
///
/// Stages only move forward: a folder that reached `Stat` never goes back to
/// `Names` short of a full [`Folder::reload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Entry names are enumerated; records carry no metadata yet.
    Names,
    /// Every current record has been stat'd.
    Stat,
    /// Every current record additionally has MIME type and icon resolved.
    MimeType,
}

/// Slice budget while a caller is waiting on a wanted stage.
const FOREGROUND_SLICE: Duration = Duration::from_millis(40);
/// Slice budget for opportunistic background population.
const BACKGROUND_SLICE: Duration = Duration::from_millis(1);

/// The reusable listing state behind a folder handle.
///
/// Detachable: when the last handle drops, the facade moves this into the
/// folder cache so re-opening the directory skips the rescan.
pub(crate) struct FolderState {
    path: FolderPath,
    files: HashMap<SmolStr, FileRecord>,
    done: Stage,
    wanted: Stage,
    wanted_bg: Stage,
    /// Names still to visit in the current population stage.
    pending: Vec<SmolStr>,
    pending_reload: bool,
    deleted: bool,
    /// Whether a watch subscription for `path` is active.
    watching: bool,
}

impl FolderState {
    pub(crate) fn new(path: FolderPath, names: Vec<SmolStr>) -> Self {
        let mut files = HashMap::with_capacity(names.len() + 1);
        let parent = FileRecord::parent_entry(path.as_path());
        files.insert(parent.name().clone(), parent);
        for name in names {
            files.insert(name.clone(), FileRecord::new(&name));
        }

        Self {
            path,
            files,
            done: Stage::Names,
            wanted: Stage::Names,
            wanted_bg: Stage::Names,
            pending: Vec::new(),
            pending_reload: false,
            deleted: false,
            watching: false,
        }
    }

    pub(crate) fn path(&self) -> &FolderPath {
        &self.path
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub(crate) fn set_watching(&mut self, watching: bool) {
        self.watching = watching;
    }

    pub(crate) fn is_watching(&self) -> bool {
        self.watching
    }

    pub(crate) fn take_watching(&mut self) -> bool {
        std::mem::take(&mut self.watching)
    }

    pub(crate) fn mark_reload(&mut self) {
        if !self.deleted {
            self.pending_reload = true;
        }
    }

    fn needs_population(&self) -> bool {
        self.wanted > self.done || self.wanted_bg > self.done
    }

    /// Builds a record for `name` populated to the current `done` stage.
    fn build_record(&self, name: &str, registry: &MimeRegistry) -> FileRecord {
        let mut record = FileRecord::new(name);
        if self.done >= Stage::Stat {
            record.stat(self.path.as_path());
        }
        if self.done >= Stage::MimeType && record.exists() {
            record.resolve_mime(self.path.as_path(), registry);
            record.refresh_icon(self.path.as_path());
        }
        record
    }

    /// Merges a created-on-disk name; returns the new record's snapshot.
    pub(crate) fn insert_created(
        &mut self,
        name: &str,
        registry: &MimeRegistry,
    ) -> Option<FileRecord> {
        if self.deleted {
            return None;
        }
        let record = self.build_record(name, registry);
        self.files.insert(SmolStr::new(name), record.clone());
        Some(record)
    }

    /// Merges a removed-on-disk name; returns the removed record.
    pub(crate) fn remove_deleted(&mut self, name: &str) -> Option<FileRecord> {
        if self.deleted {
            return None;
        }
        self.files.remove(name)
    }

    /// Re-applies the reached stages to a changed entry; returns its
    /// snapshot, or `None` when the name is unknown here.
    pub(crate) fn restat_changed(
        &mut self,
        name: &str,
        registry: &MimeRegistry,
    ) -> Option<FileRecord> {
        if self.deleted {
            return None;
        }
        let done = self.done;
        let path = self.path.clone();
        let record = self.files.get_mut(name)?;
        if done >= Stage::Stat {
            record.stat(path.as_path());
        }
        if done >= Stage::MimeType && record.exists() {
            record.resolve_mime(path.as_path(), registry);
            record.refresh_icon(path.as_path());
        }
        Some(record.clone())
    }
}

/// Shared core of a folder handle; one per live normalized path.
pub(crate) struct FolderShared {
    fs: FileSystem,
    path: FolderPath,
    /// `None` only transiently while the state is handed back to the facade
    /// during teardown.
    state: Mutex<Option<FolderState>>,
    subscribers: Mutex<Vec<channel::Sender<FolderEvent>>>,
}

impl FolderShared {
    pub(crate) fn new(fs: FileSystem, state: FolderState) -> Self {
        Self {
            fs,
            path: state.path.clone(),
            state: Mutex::new(Some(state)),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut FolderState) -> R) -> Option<R> {
        lock(&self.state).as_mut().map(f)
    }

    fn emit(&self, event: FolderEvent) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn path(&self) -> &FolderPath {
        &self.path
    }

    pub(crate) fn mark_reload(&self) {
        self.with_state(FolderState::mark_reload);
    }

    pub(crate) fn take_pending_reload(&self) -> bool {
        self.with_state(|state| std::mem::take(&mut state.pending_reload))
            .unwrap_or(false)
    }

    pub(crate) fn on_child_created(&self, name: &str) {
        let registry = self.fs.mime_registry();
        let added = self
            .with_state(|state| state.insert_created(name, &registry))
            .flatten();
        if let Some(record) = added {
            self.emit(FolderEvent::Added(vec![record]));
        }
    }

    pub(crate) fn on_child_deleted(&self, name: &str) {
        let removed = self
            .with_state(|state| state.remove_deleted(name))
            .flatten();
        if let Some(record) = removed {
            self.emit(FolderEvent::Removed(vec![record]));
        }
    }

    pub(crate) fn on_child_changed(&self, name: &str) {
        let registry = self.fs.mime_registry();
        let changed = self
            .with_state(|state| state.restat_changed(name, &registry))
            .flatten();
        match changed {
            Some(record) => self.emit(FolderEvent::Changed(vec![record])),
            // A change notification for a name we never saw: reconcile it as
            // a possible creation.
            None => self.check_exists(name),
        }
    }

    /// Marks the folder deleted, tells subscribers, and detaches it from the
    /// facade. Idempotent.
    pub(crate) fn on_deleted(&self) {
        let newly_deleted = self
            .with_state(|state| {
                if state.deleted {
                    return false;
                }
                state.deleted = true;
                state.pending.clear();
                state.pending_reload = false;
                true
            })
            .unwrap_or(false);
        if newly_deleted {
            self.emit(FolderEvent::Deleted);
            self.fs.handle_folder_deleted(&self.path, self);
        }
    }

    pub(crate) fn check_exists(&self, name: &str) {
        let known = self.with_state(|state| {
            if state.deleted {
                return None;
            }
            Some(state.files.contains_key(name))
        });
        let Some(Some(known)) = known else {
            return;
        };
        let exists = std::fs::symlink_metadata(self.path.join(name)).is_ok();
        if exists && !known {
            self.on_child_created(name);
        } else if !exists && known {
            self.on_child_deleted(name);
        }
    }

    /// Discards and rebuilds the name set, reconciling differences through
    /// the regular created/deleted paths. Used when the watch layer reports
    /// changes it cannot describe entry-by-entry.
    pub(crate) fn do_reload(&self) {
        let alive = self
            .with_state(|state| {
                state.pending_reload = false;
                !state.deleted
            })
            .unwrap_or(false);
        if !alive {
            return;
        }

        let names = match self.fs.enumerate_names(&self.path) {
            Ok(names) => names,
            Err(err) => {
                tracing::warn!(
                    target: "perch.fs",
                    path = %self.path,
                    error = %err,
                    "could not reload folder"
                );
                self.on_deleted();
                return;
            }
        };

        let on_disk: HashSet<SmolStr> = names.into_iter().collect();
        let known: Vec<SmolStr> = self
            .with_state(|state| {
                state
                    .files
                    .keys()
                    .filter(|name| name.as_str() != PARENT_ENTRY_NAME)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        for name in on_disk.iter().filter(|name| !known.contains(name)) {
            self.on_child_created(name);
        }
        for name in known.iter().filter(|name| !on_disk.contains(name.as_str())) {
            self.on_child_deleted(name);
        }
    }

    /// Raises the wanted stage; runs one immediate foreground slice when
    /// `apply_now` and there is anything to do.
    pub(crate) fn set_wanted(&self, stage: Stage, apply_now: bool) {
        let armed = self
            .with_state(|state| {
                if state.deleted || stage <= state.done {
                    return false;
                }
                state.wanted = state.wanted.max(stage);
                // Whatever the caller asked for, keep going to full
                // population in the background afterwards.
                state.wanted_bg = Stage::MimeType;
                true
            })
            .unwrap_or(false);
        if armed && apply_now {
            self.populate_step();
        }
    }

    pub(crate) fn needs_work(&self) -> bool {
        self.with_state(|state| {
            !state.deleted && (state.pending_reload || state.needs_population())
        })
        .unwrap_or(false)
    }

    /// Runs one time-boxed population slice; returns whether more work
    /// remains.
    ///
    /// Foreground slices (a caller is waiting on `wanted`) get the large
    /// budget; background-only upgrades get the small one, so a host loop
    /// interleaving this with input handling never stalls.
    pub(crate) fn populate_step(&self) -> bool {
        let registry = self.fs.mime_registry();
        self.with_state(|state| {
            if state.deleted {
                return false;
            }
            let budget = if state.wanted > state.done {
                FOREGROUND_SLICE
            } else if state.wanted_bg > state.done {
                BACKGROUND_SLICE
            } else {
                return false;
            };

            let started = Instant::now();
            let dirname = state.path.clone();
            loop {
                if state.done >= state.wanted.max(state.wanted_bg) {
                    state.pending.clear();
                    return false;
                }
                match state.done {
                    Stage::Names => {
                        if state.pending.is_empty() {
                            state.pending = state.files.keys().cloned().collect();
                        }
                        while let Some(name) = state.pending.pop() {
                            if let Some(record) = state.files.get_mut(&name) {
                                if !record.flags().contains(FileFlags::HAS_STAT) {
                                    record.stat(dirname.as_path());
                                    let snapshot = record.clone();
                                    self.emit(FolderEvent::Changed(vec![snapshot]));
                                }
                            }
                            if started.elapsed() > budget {
                                return true;
                            }
                        }
                        state.done = Stage::Stat;
                    }
                    Stage::Stat => {
                        if state.pending.is_empty() {
                            state.pending = state.files.keys().cloned().collect();
                        }
                        while let Some(name) = state.pending.pop() {
                            if let Some(record) = state.files.get_mut(&name) {
                                if record.exists()
                                    && !record.flags().contains(FileFlags::HAS_MIME_TYPE)
                                {
                                    record.resolve_mime(dirname.as_path(), &registry);
                                    record.refresh_icon(dirname.as_path());
                                    let snapshot = record.clone();
                                    self.emit(FolderEvent::Changed(vec![snapshot]));
                                }
                            }
                            if started.elapsed() > budget {
                                return true;
                            }
                        }
                        state.done = Stage::MimeType;
                    }
                    Stage::MimeType => return false,
                }
            }
        })
        .unwrap_or(false)
    }
}

impl Drop for FolderShared {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(state) = state {
            self.fs.folder_finalized(state);
        }
    }
}

/// The display-facing handle to one directory's live listing.
///
/// Handles are cheap to clone; every clone of the same folder shares the
/// underlying listing and observes the identical event stream. When the last
/// handle drops, the listing is parked in the facade's bounded cache so a
/// quick return to the same directory avoids a rescan.
#[derive(Clone)]
pub struct Folder {
    pub(crate) shared: Arc<FolderShared>,
}

impl Folder {
    /// The folder's normalized path.
    pub fn path(&self) -> FolderPath {
        self.shared.path().clone()
    }

    /// Subscribes to this folder's change notifications.
    ///
    /// Events queue up from the moment of subscription; each receiver sees
    /// every subsequent event exactly once, in emission order.
    pub fn subscribe(&self) -> channel::Receiver<FolderEvent> {
        let (tx, rx) = channel::unbounded();
        lock(&self.shared.subscribers).push(tx);
        rx
    }

    /// Snapshots of all current records (including the `..` pseudo-entry).
    pub fn list_files(&self) -> Vec<FileRecord> {
        self.shared
            .with_state(|state| {
                if state.deleted {
                    Vec::new()
                } else {
                    state.files.values().cloned().collect()
                }
            })
            .unwrap_or_default()
    }

    /// Snapshot of one record by entry name.
    pub fn get_file(&self, name: &str) -> Option<FileRecord> {
        self.shared
            .with_state(|state| state.files.get(name).cloned())
            .flatten()
    }

    /// Full path of an entry of this folder.
    pub fn file_path(&self, record: &FileRecord) -> PathBuf {
        self.path().join(record.name())
    }

    /// The population stage every current record has reached.
    pub fn stage(&self) -> Stage {
        self.shared
            .with_state(|state| state.done)
            .unwrap_or(Stage::Names)
    }

    pub fn is_deleted(&self) -> bool {
        self.shared
            .with_state(|state| state.deleted)
            .unwrap_or(true)
    }

    /// Requests that population reach `stage`.
    ///
    /// With `apply_now` one foreground slice runs synchronously; either way
    /// the remaining work happens across subsequent [`FileSystem::pump`]
    /// calls, never blocking on the whole directory.
    pub fn set_wanted(&self, stage: Stage, apply_now: bool) {
        self.shared.set_wanted(stage, apply_now);
    }

    /// Whether population or a deferred reload is outstanding.
    pub fn needs_work(&self) -> bool {
        self.shared.needs_work()
    }

    /// Runs one population slice; returns whether more work remains.
    pub fn populate_step(&self) -> bool {
        self.shared.populate_step()
    }

    /// Re-enumerates the directory and reconciles the listing.
    pub fn reload(&self) {
        self.shared.do_reload();
    }

    /// Reconciles a single entry name against the file system.
    pub fn check_exists(&self, name: &str) {
        self.shared.check_exists(name);
    }

    /// Ordered key/value pairs describing one entry, for a properties
    /// display. Forces stat and MIME resolution for that entry first.
    pub fn file_info(&self, name: &str) -> Vec<(String, String)> {
        let registry = self.shared.fs.mime_registry();
        let snapshot = self.shared.with_state(|state| {
            if state.deleted {
                return None;
            }
            let path = state.path.clone();
            let record = state.files.get_mut(name)?;
            record.stat(path.as_path());
            if record.exists() && !record.flags().contains(FileFlags::HAS_MIME_TYPE) {
                record.resolve_mime(path.as_path(), &registry);
                record.refresh_icon(path.as_path());
            }
            Some(record.clone())
        });
        let Some(Some(record)) = snapshot else {
            return Vec::new();
        };

        self.shared.emit(FolderEvent::Changed(vec![record.clone()]));
        describe_record(&record, &self.path())
    }

    /// The parent directory's folder; works even when this folder has been
    /// deleted, as long as the parent still exists.
    pub fn parent(&self, wanted: Stage) -> crate::error::Result<Folder> {
        self.shared.fs.get_parent_folder(self, wanted)
    }

    /// The facade this folder belongs to.
    pub fn file_system(&self) -> FileSystem {
        self.shared.fs.clone()
    }
}

impl fmt::Debug for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Folder")
            .field("path", &self.shared.path())
            .field("stage", &self.stage())
            .finish()
    }
}

fn describe_record(record: &FileRecord, folder: &FolderPath) -> Vec<(String, String)> {
    let mut info = Vec::new();

    if record.exists() {
        let kind = if record.is_dir() {
            "folder".to_string()
        } else {
            record
                .mime_type()
                .map(str::to_string)
                .unwrap_or_else(|| "file".to_string())
        };
        if record.is_link() {
            info.push(("Type:".to_string(), format!("link to {kind}")));
        } else {
            info.push(("Type:".to_string(), kind));
        }

        info.push(("Location:".to_string(), folder.to_string()));

        if !record.is_dir() {
            if let Some(stat) = record.stat_info() {
                info.push(("Size:".to_string(), stat.size.to_string()));
            }
        }

        if let Some(modified) = record.stat_info().and_then(|stat| stat.modified) {
            let local: chrono::DateTime<chrono::Local> = modified.into();
            info.push((
                "Modified:".to_string(),
                local.format("%x %X").to_string(),
            ));
        }
    } else if record.is_link() {
        info.push(("Type:".to_string(), "broken symbolic link".to_string()));
    }

    if let Some(target) = record.link_target() {
        info.push((
            "Points to:".to_string(),
            target.display().to_string(),
        ));
    }

    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FileSystem;

    fn drain(folder: &Folder) {
        while folder.populate_step() {}
    }

    #[test]
    fn reload_reconciles_created_and_deleted_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"k").unwrap();
        std::fs::write(dir.path().join("gone.txt"), b"g").unwrap();

        let fs = FileSystem::new();
        let folder = fs.get_folder(dir.path(), Stage::Names).unwrap();
        let events = folder.subscribe();

        std::fs::remove_file(dir.path().join("gone.txt")).unwrap();
        std::fs::write(dir.path().join("new.txt"), b"n").unwrap();
        folder.reload();

        assert!(folder.get_file("keep.txt").is_some());
        assert!(folder.get_file("gone.txt").is_none());
        assert!(folder.get_file("new.txt").is_some());

        let mut added = Vec::new();
        let mut removed = Vec::new();
        for event in events.try_iter() {
            match event {
                FolderEvent::Added(records) => added.extend(records),
                FolderEvent::Removed(records) => removed.extend(records),
                _ => {}
            }
        }
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].name(), "new.txt");
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].name(), "gone.txt");
    }

    #[test]
    fn reload_of_a_vanished_directory_deletes_the_folder() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("sub");
        std::fs::create_dir(&target).unwrap();

        let fs = FileSystem::new();
        let folder = fs.get_folder(&target, Stage::Names).unwrap();
        let events = folder.subscribe();

        std::fs::remove_dir(&target).unwrap();
        folder.reload();

        assert!(folder.is_deleted());
        assert!(events
            .try_iter()
            .any(|event| matches!(event, FolderEvent::Deleted)));
        assert!(folder.list_files().is_empty());
    }

    #[test]
    fn check_exists_reconciles_one_name() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileSystem::new();
        let folder = fs.get_folder(dir.path(), Stage::Names).unwrap();

        std::fs::write(dir.path().join("fresh.txt"), b"f").unwrap();
        assert!(folder.get_file("fresh.txt").is_none());
        folder.check_exists("fresh.txt");
        assert!(folder.get_file("fresh.txt").is_some());

        std::fs::remove_file(dir.path().join("fresh.txt")).unwrap();
        folder.check_exists("fresh.txt");
        assert!(folder.get_file("fresh.txt").is_none());
    }

    #[test]
    fn listing_always_carries_the_parent_pseudo_entry() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileSystem::new();
        let folder = fs.get_folder(dir.path(), Stage::Names).unwrap();

        let files = folder.list_files();
        assert_eq!(files.len(), 1);
        assert!(files[0].is_parent_entry());
        assert!(files[0].is_dir());
    }

    #[test]
    fn deleted_folders_ignore_population_requests() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("sub");
        std::fs::create_dir(&target).unwrap();

        let fs = FileSystem::new();
        let folder = fs.get_folder(&target, Stage::Names).unwrap();
        std::fs::remove_dir(&target).unwrap();
        folder.reload();
        assert!(folder.is_deleted());

        folder.set_wanted(Stage::MimeType, true);
        assert!(!folder.needs_work());
        assert!(!folder.populate_step());
    }

    #[cfg(unix)]
    #[test]
    fn file_info_describes_a_broken_link() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        std::os::unix::fs::symlink(&missing, dir.path().join("link")).unwrap();

        let fs = FileSystem::new();
        let folder = fs.get_folder(dir.path(), Stage::Names).unwrap();
        let info = folder.file_info("link");

        assert_eq!(info[0].0, "Type:");
        assert_eq!(info[0].1, "broken symbolic link");
        assert!(info
            .iter()
            .any(|(key, value)| key == "Points to:" && value == &missing.display().to_string()));
    }

    #[test]
    fn foreground_slices_stop_at_the_budget() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..64 {
            std::fs::write(dir.path().join(format!("f{i:03}.txt")), b"x").unwrap();
        }

        let fs = FileSystem::new();
        let folder = fs.get_folder(dir.path(), Stage::Names).unwrap();
        folder.set_wanted(Stage::MimeType, false);

        // However many slices it takes, each call returns and the stage only
        // moves forward.
        let mut last = folder.stage();
        let mut slices = 0;
        while folder.populate_step() {
            assert!(folder.stage() >= last);
            last = folder.stage();
            slices += 1;
            assert!(slices < 10_000, "population never converged");
        }
        assert_eq!(folder.stage(), Stage::MimeType);
    }
}
