//! File records and change events.
//!
//! A [`FileRecord`] is what the index keeps per file: just enough metadata
//! to rank and summarize a workspace without holding file contents. A
//! [`ChangeEvent`] is the transient unit that flows from the watcher to the
//! index and is discarded once applied.

use crate::languages::language_for_path;
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Add,
    Modify,
    Remove,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Add => "add",
            Self::Modify => "modify",
            Self::Remove => "remove",
        };
        write!(f, "{}", s)
    }
}

/// Metadata captured when an event was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatSnapshot {
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub is_dir: bool,
}

impl StatSnapshot {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            size: metadata.len(),
            modified: metadata.modified().ok(),
            is_dir: metadata.is_dir(),
        }
    }

    /// Stats a path, returning None if it no longer exists.
    pub fn read(path: &Path) -> Option<Self> {
        std::fs::metadata(path).ok().map(|m| Self::from_metadata(&m))
    }
}

/// A single filesystem change under a watched root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// Absolute path of the changed entry.
    pub path: PathBuf,
    /// Path relative to the watched root.
    pub relative_path: PathBuf,
    pub stat: Option<StatSnapshot>,
}

impl ChangeEvent {
    /// Creates an event, deriving the relative path from `root`.
    pub fn new(kind: ChangeKind, root: &Path, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let relative_path = path
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.clone());

        Self {
            kind,
            path,
            relative_path,
            stat: None,
        }
    }

    /// Builder pattern: attach a stat snapshot.
    pub fn with_stat(mut self, stat: Option<StatSnapshot>) -> Self {
        self.stat = stat;
        self
    }
}

/// Cached metadata for one file in a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute path; also the cache key.
    pub path: PathBuf,

    /// File name without directories.
    pub name: String,

    /// Size in bytes.
    pub size: u64,

    /// Language tag derived from the extension (e.g. "rust").
    pub language: Option<String>,

    pub modified: Option<SystemTime>,

    pub is_dir: bool,

    /// Search score; only meaningful on search results.
    #[serde(skip)]
    pub relevance: f64,
}

impl FileRecord {
    /// Creates a record, deriving name and language from the path.
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: Option<SystemTime>, is_dir: bool) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let language = if is_dir {
            None
        } else {
            language_for_path(&path).map(str::to_string)
        };

        Self {
            path,
            name,
            size,
            language,
            modified,
            is_dir,
            relevance: 0.0,
        }
    }

    pub fn from_metadata(path: impl Into<PathBuf>, metadata: &Metadata) -> Self {
        Self::new(
            path,
            metadata.len(),
            metadata.modified().ok(),
            metadata.is_dir(),
        )
    }

    pub fn from_stat(path: impl Into<PathBuf>, stat: &StatSnapshot) -> Self {
        Self::new(path, stat.size, stat.modified, stat.is_dir)
    }

    /// Builder pattern: set relevance.
    pub fn with_relevance(mut self, relevance: f64) -> Self {
        self.relevance = relevance;
        self
    }

    /// Rough heap footprint of this record in bytes.
    pub fn approx_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.path.as_os_str().len()
            + self.name.len()
            + self.language.as_ref().map_or(0, String::len)
    }
}
