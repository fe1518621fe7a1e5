//! Exclusion filter shared by detection and application
//!
//! Patterns use glob syntax and are matched against the whole relative path,
//! the file name and every path component, so a bare directory name prunes
//! the entire subtree. The identity file and the engine state directory are
//! always excluded.

use crate::layout::{METADATA_FILE_NAME, STATE_DIR_NAME};
use filesync_types::{Error, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path};

/// Compiled set of exclusion patterns
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    glob_set: GlobSet,
    patterns: Vec<String>,
}

impl Default for ChangeFilter {
    fn default() -> Self {
        Self {
            glob_set: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }
}

impl ChangeFilter {
    /// Compile a filter from glob patterns
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        let mut pattern_list = Vec::new();

        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = Glob::new(pattern).map_err(|e| {
                Error::config(format!("Invalid exclude pattern '{}': {}", pattern, e))
            })?;
            builder.add(glob);
            pattern_list.push(pattern.to_string());
        }

        let glob_set = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to compile exclude patterns: {}", e)))?;

        Ok(Self {
            glob_set,
            patterns: pattern_list,
        })
    }

    /// Parse patterns from gitignore-style text, one per line.
    ///
    /// Comments and blank lines are ignored. Negated patterns are not
    /// supported and are skipped.
    pub fn parse_gitignore(content: &str) -> Result<Self> {
        let patterns: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
            .map(|line| {
                let trimmed = line.trim_end_matches('/');
                if trimmed.is_empty() {
                    line
                } else {
                    trimmed
                }
            })
            .collect();

        Self::new(patterns)
    }

    /// User-supplied patterns
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether `relative` (a root-relative path) is excluded
    pub fn is_excluded(&self, relative: &Path) -> bool {
        if is_engine_owned(relative) {
            return true;
        }

        if self.patterns.is_empty() {
            return false;
        }

        if self.glob_set.is_match(relative) {
            return true;
        }

        relative.components().any(|component| match component {
            Component::Normal(name) => self.glob_set.is_match(Path::new(name)),
            _ => false,
        })
    }
}

fn is_engine_owned(relative: &Path) -> bool {
    relative.components().any(|component| match component {
        Component::Normal(name) => name == METADATA_FILE_NAME || name == STATE_DIR_NAME,
        _ => false,
    })
}
