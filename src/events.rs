//! Everything related to watching directories for creations, modifications,
//! deletions, etc.

use std::collections::HashSet;
use std::fmt::{self, Debug, Formatter};
use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::TailError;

/// A filesystem notification reduced to what the engine acts on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FsEvent {
    /// A file or directory appeared.
    Create(PathBuf),
    /// A file or directory was renamed into place.
    RenamedTo(PathBuf),
    /// File content changed.
    Write(PathBuf),
    /// A file or directory was deleted or renamed away.
    Remove(PathBuf),
}

impl FsEvent {
    /// Classifies a raw `notify` event. Metadata and access notifications
    /// produce nothing.
    pub fn from_notify(event: notify::Event) -> Vec<FsEvent> {
        let notify::Event { kind, paths, .. } = event;

        match kind {
            EventKind::Remove(_) => paths.into_iter().map(FsEvent::Remove).collect(),
            EventKind::Create(_) => paths.into_iter().map(FsEvent::Create).collect(),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                paths.into_iter().map(FsEvent::Remove).collect()
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                paths.into_iter().map(FsEvent::RenamedTo).collect()
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let mut paths = paths.into_iter();
                let mut out = Vec::with_capacity(2);
                if let Some(from) = paths.next() {
                    out.push(FsEvent::Remove(from));
                }
                out.extend(paths.map(FsEvent::RenamedTo));
                out
            }
            // Backends that cannot tell which half of a rename this is.
            EventKind::Modify(ModifyKind::Name(_)) => paths
                .into_iter()
                .map(|p| {
                    if p.symlink_metadata().is_ok() {
                        FsEvent::RenamedTo(p)
                    } else {
                        FsEvent::Remove(p)
                    }
                })
                .collect(),
            EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
            EventKind::Modify(_) => paths.into_iter().map(FsEvent::Write).collect(),
            EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            FsEvent::Create(p) | FsEvent::RenamedTo(p) | FsEvent::Write(p) | FsEvent::Remove(p) => {
                p
            }
        }
    }
}

/// The set of directories with an active subscription, plus the receiving
/// end of their notifications.
///
/// Each directory is watched non-recursively and at most once; recursion is
/// the engine's job so that every directory can be tracked and pruned
/// individually.
pub struct WatchSet {
    inner: notify::RecommendedWatcher,
    dirs: HashSet<PathBuf>,
    event_stream: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
}

impl Debug for WatchSet {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("WatchSet").field("dirs", &self.dirs).finish()
    }
}

impl WatchSet {
    /// Starts the platform watcher. No directory is watched yet.
    pub fn new() -> Result<Self, TailError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            // The only way `send` can fail is if the receiver is dropped,
            // and `WatchSet` owns both ends.
            let _ = tx.send(res);
        })
        .map_err(TailError::WatcherInit)?;

        Ok(WatchSet {
            inner,
            dirs: HashSet::new(),
            event_stream: rx,
        })
    }

    pub fn contains(&self, dir: &Path) -> bool {
        self.dirs.contains(dir)
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    pub fn dirs(&self) -> Vec<PathBuf> {
        self.dirs.iter().cloned().collect()
    }

    /// Subscribes to `dir`. A no-op if it is already watched.
    pub fn add(&mut self, dir: &Path) -> Result<(), TailError> {
        if self.dirs.contains(dir) {
            return Ok(());
        }

        self.inner
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|source| TailError::Watch {
                path: dir.to_path_buf(),
                source,
            })?;
        self.dirs.insert(dir.to_path_buf());
        tracing::debug!(dir = %dir.display(), "watching directory");

        Ok(())
    }

    /// Unsubscribes `dir`. Returns `false` if it was not watched.
    pub fn remove(&mut self, dir: &Path) -> bool {
        if !self.dirs.remove(dir) {
            return false;
        }
        // The backend usually dropped the watch already if the directory is
        // gone, so a failure here carries no information.
        let _ = self.inner.unwatch(dir);
        tracing::debug!(dir = %dir.display(), "unwatched directory");
        true
    }

    /// Unsubscribes every watched directory strictly beneath `dir`.
    pub fn remove_under(&mut self, dir: &Path) -> usize {
        let nested: Vec<PathBuf> = self
            .dirs
            .iter()
            .filter(|d| d.as_path() != dir && d.starts_with(dir))
            .cloned()
            .collect();
        for d in &nested {
            self.remove(d);
        }
        nested.len()
    }

    /// Waits for the next raw notification. Returns `None` if the backend
    /// shut down.
    pub async fn next_event(&mut self) -> Option<notify::Result<notify::Event>> {
        self.event_stream.recv().await
    }
}
