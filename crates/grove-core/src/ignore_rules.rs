//! Excluded-subtree rules.
//!
//! The same rule set is applied in three places: when deciding whether an
//! OS event is worth queueing, when estimating tree size, and when the
//! index walks a workspace. Dependency trees, build output, VCS metadata
//! and caches are excluded by default; a workspace can add its own lines
//! through `.groveignore` (and its root `.gitignore`).
//!
//! Patterns use gitignore syntax and are matched against paths relative to
//! the root, so a bare `node_modules` excludes that name at any depth.

use crate::error::{CoreError, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the per-workspace ignore file.
pub const IGNORE_FILE_NAME: &str = ".groveignore";

/// Subtrees no workspace ever wants indexed or watched.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    // Dependency trees
    "node_modules",
    "bower_components",
    "vendor",
    "deps",
    ".venv",
    "venv",
    // Build output
    "target",
    "dist",
    "build",
    "out",
    ".next",
    ".nuxt",
    ".output",
    ".dart_tool",
    ".gradle",
    // VCS metadata
    ".git",
    ".svn",
    ".hg",
    // Caches and tool state
    ".cache",
    ".parcel-cache",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".turbo",
    "coverage",
    ".idea",
    ".grove",
    ".arbor",
    ".DS_Store",
    "*.log",
];

/// Returns the default patterns as owned strings.
pub fn default_patterns() -> Vec<String> {
    DEFAULT_IGNORE_PATTERNS.iter().map(|p| p.to_string()).collect()
}

/// A compiled set of ignore patterns anchored at a root.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    root: PathBuf,
    matcher: Gitignore,
    patterns: Vec<String>,
}

impl IgnoreRules {
    /// Compiles `patterns` for `root`.
    pub fn new(root: &Path, patterns: &[String]) -> Result<Self> {
        let mut builder = IgnoreRulesBuilder::new(root);
        for pattern in patterns {
            builder.add_pattern(pattern);
        }
        builder.build()
    }

    /// Rules containing only [`DEFAULT_IGNORE_PATTERNS`].
    pub fn with_defaults(root: &Path) -> Result<Self> {
        Self::new(root, &default_patterns())
    }

    pub fn builder(root: &Path) -> IgnoreRulesBuilder {
        IgnoreRulesBuilder::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All pattern lines in the order they were added.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Returns true if `path` (or any of its parents) is excluded.
    ///
    /// `path` may be absolute under the root or already relative to it.
    /// Paths outside the root and the root itself are never excluded.
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let relative = if path.is_absolute() {
            match path.strip_prefix(&self.root) {
                Ok(rel) => rel,
                Err(_) => return false,
            }
        } else {
            path
        };

        if relative.as_os_str().is_empty() {
            return false;
        }

        self.matcher
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
    }
}

/// Incrementally collects pattern lines before compiling them.
#[derive(Debug)]
pub struct IgnoreRulesBuilder {
    root: PathBuf,
    patterns: Vec<String>,
}

impl IgnoreRulesBuilder {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            patterns: Vec::new(),
        }
    }

    /// Adds one gitignore-style line. Blank lines and comments are skipped.
    pub fn add_pattern(&mut self, line: &str) -> &mut Self {
        let trimmed = line.trim();
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            self.patterns.push(trimmed.to_string());
        }
        self
    }

    pub fn add_patterns<I, S>(&mut self, lines: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            self.add_pattern(line.as_ref());
        }
        self
    }

    /// Merges the lines of an ignore file. A missing file is not an error.
    pub fn add_file(&mut self, path: &Path) -> Result<&mut Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let before = self.patterns.len();
                for line in contents.lines() {
                    self.add_pattern(line);
                }
                debug!(
                    "Loaded {} ignore patterns from {}",
                    self.patterns.len() - before,
                    path.display()
                );
                Ok(self)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(self),
            Err(e) => Err(CoreError::io(path, e)),
        }
    }

    /// Compiles the collected lines.
    ///
    /// A line the matcher rejects is logged and dropped; one bad line in a
    /// user's ignore file shouldn't disable every other rule.
    pub fn build(&self) -> Result<IgnoreRules> {
        let mut builder = GitignoreBuilder::new(&self.root);
        let mut accepted = Vec::with_capacity(self.patterns.len());

        for pattern in &self.patterns {
            match builder.add_line(None, pattern) {
                Ok(_) => accepted.push(pattern.clone()),
                Err(e) => warn!("Skipping ignore pattern '{}': {}", pattern, e),
            }
        }

        let matcher = builder.build().map_err(|e| CoreError::InvalidPattern {
            pattern: accepted.join(", "),
            message: e.to_string(),
        })?;

        Ok(IgnoreRules {
            root: self.root.clone(),
            matcher,
            patterns: accepted,
        })
    }
}
