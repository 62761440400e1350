//! Watch service errors.
//!
//! Resource exhaustion is deliberately absent from this list: it is
//! retried inside the service and only ever reported through
//! notifications.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WatchError>;

#[derive(Error, Debug)]
pub enum WatchError {
    /// The root doesn't exist or isn't a directory.
    #[error("invalid watch root '{path}': {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("'{0}' is already watched")]
    AlreadyWatched(PathBuf),

    #[error("'{0}' is not watched")]
    NotWatched(PathBuf),

    #[error("watch service has been shut down")]
    ShutDown,
}

impl WatchError {
    pub fn invalid_root(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidRoot {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
