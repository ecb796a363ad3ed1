//! Error taxonomy for the tail engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while configuring or running the tail engine.
///
/// Configuration errors (`InvalidGlob`, `InvalidRegex`, `RootNotFound`,
/// `RootNotDirectory`, `WatcherInit`) are returned before the engine starts.
/// Everything else is delivered on the error queue while the engine keeps
/// running.
#[derive(Debug, Error)]
pub enum TailError {
    #[error("invalid glob pattern {pattern:?}: {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("invalid regex pattern {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("root not found: {path}: {source}")]
    RootNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("root is not a directory: {0}")]
    RootNotDirectory(PathBuf),

    #[error("failed to start file watcher: {0}")]
    WatcherInit(#[source] notify::Error),

    #[error("cannot watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl TailError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        TailError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` if the underlying cause is a missing file or directory.
    pub fn is_not_found(&self) -> bool {
        match self {
            TailError::Io { source, .. } | TailError::RootNotFound { source, .. } => {
                source.kind() == io::ErrorKind::NotFound
            }
            TailError::Walk(err) => err
                .io_error()
                .map_or(false, |e| e.kind() == io::ErrorKind::NotFound),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_not_directory_display() {
        let err = TailError::RootNotDirectory(PathBuf::from("/tmp/file.log"));
        assert_eq!(err.to_string(), "root is not a directory: /tmp/file.log");
    }

    #[test]
    fn test_invalid_glob_names_pattern() {
        let source = glob::Pattern::new("[").unwrap_err();
        let err = TailError::InvalidGlob {
            pattern: "[".to_string(),
            source,
        };
        assert!(err.to_string().starts_with("invalid glob pattern \"[\""));
    }

    #[test]
    fn test_io_not_found() {
        let err = TailError::io(
            "/tmp/gone.log",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "/tmp/gone.log: gone");

        let err = TailError::io(
            "/tmp/denied.log",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_from_notify_error() {
        let err: TailError = notify::Error::generic("boom").into();
        assert!(matches!(err, TailError::Notify(_)));
        assert!(err.to_string().contains("file watcher error"));
    }
}
