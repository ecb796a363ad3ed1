//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::TailError;

/// Line ceiling used when none (or zero) is configured.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;
/// Capacity of the line queue before the oldest entries are dropped.
pub const DEFAULT_LINE_CAPACITY: usize = 4096;
/// Capacity of the error queue before new errors are discarded.
pub const DEFAULT_ERROR_CAPACITY: usize = 64;

/// Everything the tail engine needs to know before it starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Directory to tail. Made absolute by [`Config::resolve`].
    pub root: PathBuf,
    /// Trailing lines emitted per file found at startup (0 = start at end).
    pub lines: usize,
    /// Read existing files from the beginning instead of tailing them.
    pub from_start: bool,
    /// Reconciliation period; `Duration::ZERO` disables periodic scans.
    pub scan_interval: Duration,
    /// Report absolute paths instead of root-relative ones.
    pub absolute: bool,
    /// Include patterns (glob by default, `re:` prefix for regex).
    pub include: Vec<String>,
    /// Exclude patterns, same syntax as `include`.
    pub exclude: Vec<String>,
    /// Treat every pattern as a regular expression.
    pub force_regex: bool,
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Byte ceiling for a single line before it is truncated.
    pub max_line_bytes: usize,
    /// Lines held for the consumer before the oldest are dropped.
    pub line_capacity: usize,
    /// Errors held for the consumer before new ones are discarded.
    pub error_capacity: usize,
}

impl Config {
    /// Default configuration rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Config {
            root: root.into(),
            ..Config::default()
        }
    }

    /// Validates the configuration and fills in derived values.
    ///
    /// The root becomes absolute and must name an existing directory; a zero
    /// line ceiling or queue capacity falls back to its default.
    pub fn resolve(mut self) -> Result<Self, TailError> {
        self.root = absolutify(&self.root).map_err(|source| TailError::RootNotFound {
            path: self.root.clone(),
            source,
        })?;

        let meta = std::fs::metadata(&self.root).map_err(|source| TailError::RootNotFound {
            path: self.root.clone(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(TailError::RootNotDirectory(self.root));
        }

        if self.max_line_bytes == 0 {
            self.max_line_bytes = DEFAULT_MAX_LINE_BYTES;
        }
        if self.line_capacity == 0 {
            self.line_capacity = DEFAULT_LINE_CAPACITY;
        }
        if self.error_capacity == 0 {
            self.error_capacity = DEFAULT_ERROR_CAPACITY;
        }

        Ok(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            root: PathBuf::from("."),
            lines: 10,
            from_start: false,
            scan_interval: Duration::from_secs(5),
            absolute: false,
            include: Vec::new(),
            exclude: Vec::new(),
            force_regex: false,
            recursive: true,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            line_capacity: DEFAULT_LINE_CAPACITY,
            error_capacity: DEFAULT_ERROR_CAPACITY,
        }
    }
}

// Lexical only: symlinks in the root are kept so displayed paths match what
// the user typed.
fn absolutify(path: &Path) -> std::io::Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.lines, 10);
        assert_eq!(config.scan_interval, Duration::from_secs(5));
        assert!(config.recursive);
        assert_eq!(config.max_line_bytes, DEFAULT_MAX_LINE_BYTES);
    }

    #[test]
    fn test_resolve_absolute_root() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("logs");
        std::fs::create_dir(&nested).unwrap();

        let config = Config {
            max_line_bytes: 0,
            ..Config::new(nested.join("..").join("logs").join("."))
        }
        .resolve()
        .unwrap();

        assert_eq!(config.root, nested);
        assert_eq!(config.max_line_bytes, DEFAULT_MAX_LINE_BYTES);
    }

    #[test]
    fn test_resolve_rejects_missing_root() {
        let tmp = TempDir::new().unwrap();
        let err = Config::new(tmp.path().join("missing")).resolve().unwrap_err();
        assert!(matches!(err, TailError::RootNotFound { .. }));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_resolve_rejects_file_root() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("app.log");
        std::fs::write(&file, "x\n").unwrap();

        let err = Config::new(&file).resolve().unwrap_err();
        assert!(matches!(err, TailError::RootNotDirectory(p) if p == file));
    }
}
