//! Per-file read state and the store that owns it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

/// Read progress for one tracked file.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FileState {
    /// Bytes of the file already consumed.
    pub offset: u64,
    /// Trailing bytes read past the last line terminator.
    pub partial: Vec<u8>,
    /// Whether `partial` has been surfaced as an in-progress line.
    pub partial_delivered: bool,
    /// The current line was already emitted truncated; its remaining bytes
    /// are skipped up to the next terminator.
    pub discarding: bool,
}

impl FileState {
    pub(crate) fn clear_partial(&mut self) {
        self.partial.clear();
        self.partial_delivered = false;
    }

    /// Forgets everything read so far, as after a truncation.
    pub(crate) fn reset(&mut self) {
        self.offset = 0;
        self.clear_partial();
        self.discarding = false;
    }
}

/// Tracked files keyed by absolute path.
///
/// The engine loop is the only writer. Clones share the same map, which lets
/// [`TailHandle::file_count`](crate::TailHandle::file_count) query it from
/// outside the loop.
#[derive(Clone, Debug, Default)]
pub(crate) struct FileStateStore {
    inner: Arc<Mutex<HashMap<PathBuf, FileState>>>,
}

impl FileStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.inner.lock().contains_key(path)
    }

    /// Snapshot of the state for `path`, if it is tracked.
    pub fn get(&self, path: &Path) -> Option<FileState> {
        self.inner.lock().get(path).cloned()
    }

    /// Starts tracking `path` with a fresh state. Returns `false` if it was
    /// already tracked.
    pub fn insert_new(&self, path: &Path) -> bool {
        let mut map = self.inner.lock();
        if map.contains_key(path) {
            return false;
        }
        map.insert(path.to_path_buf(), FileState::default());
        true
    }

    /// Writes back a state obtained from [`get`](Self::get). Paths removed in
    /// the meantime stay removed.
    pub fn commit(&self, path: &Path, state: FileState) {
        if let Some(slot) = self.inner.lock().get_mut(path) {
            *slot = state;
        }
    }

    pub fn remove(&self, path: &Path) -> bool {
        self.inner.lock().remove(path).is_some()
    }

    /// Drops every file strictly beneath `dir`. Returns how many were removed.
    pub fn remove_under(&self, dir: &Path) -> usize {
        let mut map = self.inner.lock();
        let before = map.len();
        map.retain(|path, _| !(path != dir && path.starts_with(dir)));
        before - map.len()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.inner.lock().keys().cloned().collect()
    }
}
