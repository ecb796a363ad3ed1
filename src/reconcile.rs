//! Directory scans that bring tracked state back in line with the
//! filesystem, covering for notifications that were missed or coalesced.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::fs;
use walkdir::WalkDir;

use crate::engine::{Engine, StartAt};
use crate::error::TailError;

/// What a walk observed.
#[derive(Debug, Default)]
pub(crate) struct Seen {
    pub files: HashSet<PathBuf>,
    pub dirs: HashSet<PathBuf>,
}

/// Raw directory listing, gathered off the async runtime.
#[derive(Debug, Default)]
struct Listing {
    dirs: Vec<PathBuf>,
    files: Vec<PathBuf>,
    errors: Vec<walkdir::Error>,
    root_error: Option<walkdir::Error>,
}

impl Engine {
    /// Full reconciliation pass over the root.
    ///
    /// Registers new files, catches up tracked ones, then prunes tracked
    /// files and watched directories the walk did not see, unless a fresh
    /// stat shows they still exist.
    pub(crate) async fn scan_and_register(&mut self) -> Result<(), TailError> {
        let root = self.config.root.clone();
        let recursive = self.config.recursive;
        let (seen, root_error) = self
            .walk(&root, move |_, depth| recursive || depth == 0)
            .await?;

        let mut pruned_files = 0usize;
        for path in self.store.paths() {
            if seen.files.contains(&path) || is_regular_file(&path).await {
                continue;
            }
            if self.store.remove(&path) {
                pruned_files += 1;
                tracing::debug!(path = %path.display(), "pruned vanished file");
            }
        }

        let mut pruned_dirs = 0usize;
        for dir in self.watches.dirs() {
            if seen.dirs.contains(&dir) || is_dir(&dir).await {
                continue;
            }
            if self.watches.remove(&dir) {
                pruned_dirs += 1;
            }
        }

        tracing::debug!(
            files = self.store.len(),
            dirs = self.watches.len(),
            pruned_files,
            pruned_dirs,
            "reconciled"
        );

        match root_error {
            Some(err) => Err(TailError::Walk(err)),
            None => Ok(()),
        }
    }

    /// Walks `root` without following symlinks.
    ///
    /// `descend` decides, from a directory's path and depth below `root`,
    /// whether that directory is watched and entered. Directories are
    /// watched first; files are then matched and caught up if tracked or
    /// registered if not. Errors for individual entries go to the error
    /// queue; an error on `root` itself is handed back to the caller.
    pub(crate) async fn walk<P>(
        &mut self,
        root: &Path,
        descend: P,
    ) -> Result<(Seen, Option<walkdir::Error>), TailError>
    where
        P: Fn(&Path, usize) -> bool + Send + 'static,
    {
        let dir = root.to_path_buf();
        let listing = tokio::task::spawn_blocking(move || list(&dir, descend)).await?;

        for err in listing.errors {
            self.send_err(TailError::Walk(err));
        }

        let mut seen = Seen::default();
        for dir in listing.dirs {
            if let Err(err) = self.watches.add(&dir) {
                self.send_err(err);
            }
            seen.dirs.insert(dir);
        }

        for path in listing.files {
            if !self.matcher.matches(&path) {
                continue;
            }
            if self.store.contains(&path) {
                self.catch_up(&path).await;
                seen.files.insert(path);
            } else if self.register_file(&path, StartAt::Configured).await {
                seen.files.insert(path);
            }
        }

        Ok((seen, listing.root_error))
    }
}

fn list<P>(root: &Path, descend: P) -> Listing
where
    P: Fn(&Path, usize) -> bool,
{
    let mut listing = Listing::default();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !e.file_type().is_dir() || descend(e.path(), e.depth()));

    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_dir() => listing.dirs.push(entry.into_path()),
            Ok(entry) if entry.file_type().is_file() => listing.files.push(entry.into_path()),
            Ok(_) => {}
            Err(err) if err.depth() == 0 => listing.root_error = Some(err),
            Err(err) => listing.errors.push(err),
        }
    }

    listing
}

async fn is_regular_file(path: &Path) -> bool {
    fs::symlink_metadata(path).await.map_or(false, |m| m.is_file())
}

async fn is_dir(path: &Path) -> bool {
    fs::symlink_metadata(path).await.map_or(false, |m| m.is_dir())
}
