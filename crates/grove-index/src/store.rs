//! Best-effort persistence for workspace metadata.
//!
//! Two kinds of records live in one sled tree, keyed by workspace root:
//! - `p:<root>` holds the last derived [`ProjectInfo`]
//! - `h:<root>:<id>` holds one [`HistoryEntry`] per context build
//!
//! Nothing here is durable in any strong sense. Callers log failures and
//! carry on.

use crate::project::ProjectInfo;
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;
use std::time::SystemTime;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),
}

/// One recorded context request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub query: String,
    pub context: String,
    pub tokens: usize,
    pub recorded_at: SystemTime,
}

pub struct MetadataStore {
    db: Db,
}

fn project_key(root: &Path) -> String {
    format!("p:{}", root.display())
}

fn history_prefix(root: &Path) -> String {
    format!("h:{}:", root.display())
}

impl MetadataStore {
    /// Opens or creates a store at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    pub fn load_project(&self, root: &Path) -> Result<Option<ProjectInfo>, StoreError> {
        match self.db.get(project_key(root))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn save_project(&self, root: &Path, info: &ProjectInfo) -> Result<(), StoreError> {
        let bytes = bincode::serialize(info)?;
        self.db.insert(project_key(root), bytes)?;
        self.db.flush()?;
        Ok(())
    }

    /// Appends a history entry. Ids are monotonic, so scan order is
    /// insertion order.
    pub fn append_history(&self, root: &Path, entry: &HistoryEntry) -> Result<(), StoreError> {
        let id = self.db.generate_id()?;
        let key = format!("{}{:020}", history_prefix(root), id);
        self.db.insert(key.as_bytes(), bincode::serialize(entry)?)?;
        Ok(())
    }

    /// The most recent `limit` entries for `root`, oldest first.
    pub fn history(&self, root: &Path, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let mut entries = Vec::new();
        for item in self.db.scan_prefix(history_prefix(root).as_bytes()) {
            let (_key, value) = item?;
            entries.push(bincode::deserialize::<HistoryEntry>(&value)?);
        }
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.split_off(skip))
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectType;
    use tempfile::tempdir;

    #[test]
    fn test_project_round_trip() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::open(dir.path().join("db")).unwrap();
        let root = Path::new("/work/app");

        assert!(store.load_project(root).unwrap().is_none());

        let info = ProjectInfo {
            project_type: ProjectType::Rust,
            total_files: 12,
            ..Default::default()
        };
        store.save_project(root, &info).unwrap();

        let loaded = store.load_project(root).unwrap().unwrap();
        assert_eq!(loaded.project_type, ProjectType::Rust);
        assert_eq!(loaded.total_files, 12);
        assert!(store.load_project(Path::new("/work/other")).unwrap().is_none());
    }

    #[test]
    fn test_history_is_scoped_and_ordered() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::open(dir.path().join("db")).unwrap();
        let root = Path::new("/work/app");

        for query in ["one", "two", "three"] {
            let entry = HistoryEntry {
                query: query.to_string(),
                context: String::new(),
                tokens: 0,
                recorded_at: SystemTime::now(),
            };
            store.append_history(root, &entry).unwrap();
        }
        store
            .append_history(
                Path::new("/work/application"),
                &HistoryEntry {
                    query: "elsewhere".into(),
                    context: String::new(),
                    tokens: 0,
                    recorded_at: SystemTime::now(),
                },
            )
            .unwrap();

        let recent: Vec<_> = store
            .history(root, 2)
            .unwrap()
            .into_iter()
            .map(|e| e.query)
            .collect();
        assert_eq!(recent, vec!["two", "three"]);
    }
}
