//! File watching.
//!
//! The facade owns a single watcher and subscribes one non-recursive watch
//! per live folder. Backends normalize OS events into a small set of
//! [`FileChange`]s; renames arrive as delete + create pairs, matching how the
//! folder merge logic consumes them.
//!
//! Backends are allowed to be lossy. If a backend drops events due to
//! overflow it emits [`WatchEvent::Rescan`], and the facade falls back to
//! reloading every live folder. Watcher errors are delivered on the same
//! stream so consumers never need a second polling surface.
//!
//! Tests should not rely on real OS watcher timing; they inject events
//! through [`ManualFileWatcher`] instead.

use std::io;
use std::path::{Path, PathBuf};

use crossbeam_channel as channel;

/// One normalized file-system change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileChange {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
}

impl FileChange {
    pub fn path(&self) -> &Path {
        match self {
            FileChange::Created(path) | FileChange::Modified(path) | FileChange::Deleted(path) => {
                path
            }
        }
    }
}

/// An event produced by a file watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// One or more normalized changes; backends may batch.
    Changes(Vec<FileChange>),
    /// The watcher dropped events; consumers should rescan watched folders.
    Rescan,
}

/// Message type delivered by a [`FileWatcher`].
///
/// Backends may surface errors asynchronously; these arrive on the same
/// stream as `Err(io::Error)` values.
pub type WatchMessage = io::Result<WatchEvent>;

/// Event-driven watcher abstraction.
///
/// Watches are per-directory and non-recursive: the folder layer subscribes
/// exactly the directories it has live listings for.
pub trait FileWatcher: Send {
    fn watch_path(&mut self, path: &Path) -> io::Result<()>;

    fn unwatch_path(&mut self, path: &Path) -> io::Result<()>;

    /// Returns the receiver used to consume watcher events.
    fn receiver(&self) -> &channel::Receiver<WatchMessage>;

    /// Drains all currently pending messages without blocking.
    fn poll(&mut self) -> Vec<WatchMessage> {
        self.receiver().try_iter().collect()
    }
}

impl<W: ?Sized + FileWatcher> FileWatcher for Box<W> {
    fn watch_path(&mut self, path: &Path) -> io::Result<()> {
        self.as_mut().watch_path(path)
    }

    fn unwatch_path(&mut self, path: &Path) -> io::Result<()> {
        self.as_mut().unwatch_path(path)
    }

    fn receiver(&self) -> &channel::Receiver<WatchMessage> {
        self.as_ref().receiver()
    }
}

const MANUAL_WATCH_QUEUE_CAPACITY: usize = 1024;

/// Deterministic watcher implementation for tests.
///
/// Never talks to the OS; callers inject events via [`ManualFileWatcher::push`]
/// or a [`ManualFileWatcherHandle`] kept before handing the watcher to the
/// facade. The queue is bounded; injection returns `WouldBlock` when full.
#[derive(Debug)]
pub struct ManualFileWatcher {
    tx: channel::Sender<WatchMessage>,
    rx: channel::Receiver<WatchMessage>,
    watched: Vec<PathBuf>,
}

/// Cloneable handle for injecting events into a [`ManualFileWatcher`] after
/// it has been moved into the facade.
#[derive(Debug, Clone)]
pub struct ManualFileWatcherHandle {
    tx: channel::Sender<WatchMessage>,
}

impl ManualFileWatcherHandle {
    pub fn push(&self, event: WatchEvent) -> io::Result<()> {
        self.send(Ok(event))
    }

    pub fn push_error(&self, error: io::Error) -> io::Result<()> {
        self.send(Err(error))
    }

    fn send(&self, msg: WatchMessage) -> io::Result<()> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(channel::TrySendError::Full(_)) => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "watch queue is full",
            )),
            Err(channel::TrySendError::Disconnected(_)) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "watch receiver dropped",
            )),
        }
    }
}

impl Default for ManualFileWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualFileWatcher {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(MANUAL_WATCH_QUEUE_CAPACITY);
        Self {
            tx,
            rx,
            watched: Vec::new(),
        }
    }

    pub fn handle(&self) -> ManualFileWatcherHandle {
        ManualFileWatcherHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn push(&self, event: WatchEvent) -> io::Result<()> {
        self.handle().push(event)
    }

    /// Currently watched directories (sorted for determinism).
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut out = self.watched.clone();
        out.sort();
        out
    }
}

impl FileWatcher for ManualFileWatcher {
    fn watch_path(&mut self, path: &Path) -> io::Result<()> {
        let path = path.to_path_buf();
        if !self.watched.contains(&path) {
            self.watched.push(path);
        }
        Ok(())
    }

    fn unwatch_path(&mut self, path: &Path) -> io::Result<()> {
        self.watched.retain(|watched| watched != path);
        Ok(())
    }

    fn receiver(&self) -> &channel::Receiver<WatchMessage> {
        &self.rx
    }
}

#[cfg(feature = "watch-notify")]
pub use notify_impl::NotifyFileWatcher;

#[cfg(feature = "watch-notify")]
mod notify_impl {
    use super::*;

    use notify::{EventKind, RecursiveMode, Watcher};

    const EVENTS_QUEUE_CAPACITY: usize = 1024;

    fn notify_error_to_io(err: notify::Error) -> io::Error {
        io::Error::other(err)
    }

    fn requests_rescan(event: &notify::Event) -> bool {
        matches!(event.attrs.flag(), Some(notify::event::Flag::Rescan))
            || (matches!(event.kind, EventKind::Other) && event.paths.is_empty())
    }

    fn normalize(event: notify::Event) -> Vec<FileChange> {
        use notify::event::{ModifyKind, RenameMode};

        match event.kind {
            EventKind::Create(_) => event.paths.into_iter().map(FileChange::Created).collect(),
            EventKind::Remove(_) => event.paths.into_iter().map(FileChange::Deleted).collect(),
            EventKind::Modify(ModifyKind::Name(mode)) => match mode {
                // Renames are folded to delete + create; the folder layer has
                // no move semantics (the original watch protocol had none
                // either).
                RenameMode::Both => {
                    let mut out = Vec::new();
                    let mut paths = event.paths.into_iter();
                    while let Some(from) = paths.next() {
                        out.push(FileChange::Deleted(from));
                        if let Some(to) = paths.next() {
                            out.push(FileChange::Created(to));
                        }
                    }
                    out
                }
                RenameMode::From => event.paths.into_iter().map(FileChange::Deleted).collect(),
                RenameMode::To => event.paths.into_iter().map(FileChange::Created).collect(),
                RenameMode::Any | RenameMode::Other => {
                    event.paths.into_iter().map(FileChange::Modified).collect()
                }
            },
            _ => event.paths.into_iter().map(FileChange::Modified).collect(),
        }
    }

    /// OS watcher backed by the `notify` crate.
    ///
    /// The notify callback feeds a bounded queue; overflow is reported as
    /// [`WatchEvent::Rescan`] so the facade can fall back to reloading.
    pub struct NotifyFileWatcher {
        watcher: notify::RecommendedWatcher,
        rx: channel::Receiver<WatchMessage>,
    }

    impl NotifyFileWatcher {
        pub fn new() -> io::Result<Self> {
            let (tx, rx) = channel::bounded::<WatchMessage>(EVENTS_QUEUE_CAPACITY);

            let watcher = notify::recommended_watcher(
                move |res: notify::Result<notify::Event>| match res {
                    Ok(event) => {
                        let msg = if requests_rescan(&event) {
                            Ok(WatchEvent::Rescan)
                        } else {
                            let changes = normalize(event);
                            if changes.is_empty() {
                                return;
                            }
                            Ok(WatchEvent::Changes(changes))
                        };
                        if let Err(channel::TrySendError::Full(_)) = tx.try_send(msg) {
                            // Dropped an event; force a rescan once there is room.
                            let _ = tx.try_send(Ok(WatchEvent::Rescan));
                        }
                    }
                    Err(err) => {
                        let _ = tx.try_send(Err(notify_error_to_io(err)));
                    }
                },
            )
            .map_err(notify_error_to_io)?;

            Ok(Self { watcher, rx })
        }
    }

    impl FileWatcher for NotifyFileWatcher {
        fn watch_path(&mut self, path: &Path) -> io::Result<()> {
            self.watcher
                .watch(path, RecursiveMode::NonRecursive)
                .map_err(notify_error_to_io)
        }

        fn unwatch_path(&mut self, path: &Path) -> io::Result<()> {
            self.watcher.unwatch(path).map_err(notify_error_to_io)
        }

        fn receiver(&self) -> &channel::Receiver<WatchMessage> {
            &self.rx
        }
    }
}
