//! Workspace index errors.
//!
//! Only workspace validation reaches the caller. Per-file I/O problems are
//! logged and skipped, and a destroyed index answers with empty values.

use crate::store::StoreError;
use grove_core::CoreError;
use grove_watcher::WatchError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("workspace root '{0}' does not exist")]
    MissingRoot(PathBuf),

    #[error("workspace root '{0}' is not a directory")]
    NotADirectory(PathBuf),

    #[error("workspace index already initialized for '{0}'")]
    AlreadyInitialized(PathBuf),

    #[error("workspace index has been destroyed")]
    Destroyed,

    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IndexError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
