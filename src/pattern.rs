//! Include/exclude pattern matching.
//!
//! Patterns are globs unless they carry the `re:` prefix (or regex mode is
//! forced). A glob containing a path separator is matched against the
//! slash-normalized path relative to the root; any other glob is matched
//! against the bare file name. Regular expressions always see the relative
//! path.

use std::path::{Path, PathBuf};

use glob::MatchOptions;
use regex::Regex;

use crate::error::TailError;

const REGEX_PREFIX: &str = "re:";

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PatternKind {
    Glob,
    Regex,
}

#[derive(Clone, Debug)]
enum Compiled {
    Glob(glob::Pattern),
    Regex(Regex),
}

/// A single compiled include or exclude expression.
#[derive(Clone, Debug)]
pub struct Pattern {
    raw: String,
    kind: PatternKind,
    compiled: Compiled,
    path_pattern: bool,
}

impl Pattern {
    /// The pattern text as it was supplied.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    /// Whether this pattern targets the relative path rather than the name.
    pub fn is_path_pattern(&self) -> bool {
        self.path_pattern
    }

    fn matches(&self, name: &str, rel: &str) -> bool {
        match &self.compiled {
            Compiled::Regex(re) => re.is_match(rel),
            Compiled::Glob(glob) if self.path_pattern => glob.matches_with(rel, GLOB_OPTIONS),
            Compiled::Glob(glob) => glob.matches_with(name, GLOB_OPTIONS),
        }
    }
}

/// Compiles a list of raw pattern values.
///
/// Values are trimmed and empty ones skipped. The first invalid value aborts
/// compilation with an error naming it.
pub fn compile(values: &[String], force_regex: bool) -> Result<Vec<Pattern>, TailError> {
    let mut patterns = Vec::with_capacity(values.len());

    for value in values {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        let (kind, body) = match value.strip_prefix(REGEX_PREFIX) {
            Some(body) => (PatternKind::Regex, body),
            None if force_regex => (PatternKind::Regex, value),
            None => (PatternKind::Glob, value),
        };

        let pattern = match kind {
            PatternKind::Regex => {
                let re = Regex::new(body).map_err(|source| TailError::InvalidRegex {
                    pattern: value.to_string(),
                    source,
                })?;
                Pattern {
                    raw: value.to_string(),
                    kind,
                    compiled: Compiled::Regex(re),
                    path_pattern: true,
                }
            }
            PatternKind::Glob => {
                let glob = normalize_glob(body);
                let path_pattern = glob.contains('/');
                let compiled =
                    glob::Pattern::new(&glob).map_err(|source| TailError::InvalidGlob {
                        pattern: value.to_string(),
                        source,
                    })?;
                Pattern {
                    raw: value.to_string(),
                    kind,
                    compiled: Compiled::Glob(compiled),
                    path_pattern,
                }
            }
        };
        patterns.push(pattern);
    }

    Ok(patterns)
}

fn normalize_glob(glob: &str) -> String {
    let glob = glob
        .strip_prefix("./")
        .or_else(|| glob.strip_prefix(".\\"))
        .unwrap_or(glob);
    if cfg!(windows) {
        glob.replace('\\', "/")
    } else {
        glob.to_string()
    }
}

/// Decides whether a path under the root participates in tailing.
#[derive(Clone, Debug)]
pub struct Matcher {
    root: PathBuf,
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

impl Matcher {
    pub fn new(root: impl Into<PathBuf>, includes: Vec<Pattern>, excludes: Vec<Pattern>) -> Self {
        Matcher {
            root: root.into(),
            includes,
            excludes,
        }
    }

    /// Compiles both pattern lists; fails on the first invalid pattern.
    pub fn compile(
        root: impl Into<PathBuf>,
        include: &[String],
        exclude: &[String],
        force_regex: bool,
    ) -> Result<Self, TailError> {
        Ok(Matcher::new(
            root,
            compile(include, force_regex)?,
            compile(exclude, force_regex)?,
        ))
    }

    /// Whether any include pattern was given.
    pub fn has_includes(&self) -> bool {
        !self.includes.is_empty()
    }

    pub fn matches(&self, path: &Path) -> bool {
        if self.includes.is_empty() && self.excludes.is_empty() {
            return true;
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        let rel = relative_slash_path(&self.root, path);

        if !self.includes.is_empty() && !self.includes.iter().any(|p| p.matches(&name, &rel)) {
            return false;
        }

        !self.excludes.iter().any(|p| p.matches(&name, &rel))
    }
}

/// Root-relative path with `/` separators, or the full path if `path` does
/// not live under `root`.
pub(crate) fn relative_slash_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let rel = rel.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        rel.into_owned()
    } else {
        rel.replace(std::path::MAIN_SEPARATOR, "/")
    }
}
