use std::num::NonZeroUsize;

use lru::LruCache;
use perch_core::FolderPath;

use crate::folder::FolderState;

/// How many released folders are kept around for quick re-opening.
pub const FOLDER_CACHE_CAPACITY: usize = 10;

/// Bounded most-recently-released cache of detached folder states.
///
/// A state lives either here or behind a live folder handle, never both; it
/// is moved in when the last handle drops and moved back out when the path is
/// requested again, so rapid back/forward navigation skips the rescan.
#[derive(Debug)]
pub(crate) struct FolderCache {
    entries: LruCache<FolderPath, FolderState>,
}

impl FolderCache {
    pub(crate) fn new() -> Self {
        Self::with_capacity(FOLDER_CACHE_CAPACITY)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Inserts a released state; returns the least-recently-released entry
    /// when the capacity is exceeded (the caller owns its teardown).
    pub(crate) fn add(&mut self, state: FolderState) -> Option<FolderState> {
        let key = state.path().clone();
        debug_assert!(!self.entries.contains(&key), "state cached twice");
        self.entries.push(key, state).map(|(_, evicted)| evicted)
    }

    /// Removes and returns the cached state for `path`, if any.
    pub(crate) fn take(&mut self, path: &FolderPath) -> Option<FolderState> {
        self.entries.pop(path)
    }

    /// Drops the cached state for `path` (the directory was deleted while
    /// sitting in the cache); returns it for teardown.
    pub(crate) fn remove(&mut self, path: &FolderPath) -> Option<FolderState> {
        self.entries.pop(path)
    }

    /// Mutable access to a cached state, without affecting its cache rank.
    pub(crate) fn peek_mut(&mut self, path: &FolderPath) -> Option<&mut FolderState> {
        self.entries.peek_mut(path)
    }

    pub(crate) fn contains(&self, path: &FolderPath) -> bool {
        self.entries.contains(path)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Cached paths, most recently released first.
    #[cfg(test)]
    pub(crate) fn paths(&self) -> Vec<FolderPath> {
        self.entries.iter().map(|(path, _)| path.clone()).collect()
    }
}
