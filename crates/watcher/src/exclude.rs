//! Exclusion patterns for recursive watching
//!
//! Patterns use gitignore syntax and are anchored at the watched root. An
//! excluded directory is never registered, so nothing below it is watched,
//! and events for excluded paths are not announced.

use crate::error::{Result, WatchError};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Path, PathBuf};

/// Compiled exclusion rules
#[derive(Debug, Clone)]
pub struct ExcludeRules {
    root: PathBuf,
    /// `None` when no patterns were configured
    matcher: Option<Gitignore>,
    patterns: Vec<String>,
}

impl ExcludeRules {
    /// Compile `patterns` relative to `root`
    pub fn build(root: &Path, patterns: &[String]) -> Result<Self> {
        if patterns.is_empty() {
            return Ok(Self::none(root));
        }

        let mut builder = GitignoreBuilder::new(root);
        for pattern in patterns {
            builder
                .add_line(None, pattern)
                .map_err(|source| WatchError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })?;
        }
        let matcher = builder.build().map_err(|source| WatchError::InvalidPattern {
            pattern: patterns.join(", "),
            source,
        })?;

        Ok(Self {
            root: root.to_path_buf(),
            matcher: Some(matcher),
            patterns: patterns.to_vec(),
        })
    }

    /// Rules that exclude nothing
    pub fn none(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            matcher: None,
            patterns: Vec::new(),
        }
    }

    /// Whether `path` or any of its parents below the root is excluded
    pub fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        let Some(matcher) = &self.matcher else {
            return false;
        };
        // the root itself is always watched
        if path == self.root || !path.starts_with(&self.root) {
            return false;
        }
        matcher
            .matched_path_or_any_parents(path, is_dir)
            .is_ignore()
    }

    pub fn is_empty(&self) -> bool {
        self.matcher.is_none()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}
