//! Error types shared by the Grove crates.
//!
//! Most failures in Grove are policy, not errors: capacity limits and
//! watch exhaustion are handled where they happen. What remains here is
//! the small set of things a caller actually has to react to.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience type for functions in this crate that can fail.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Things that can go wrong while building core structures.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Couldn't read a file or directory from disk.
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An ignore pattern could not be compiled.
    #[error("invalid ignore pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

impl CoreError {
    /// Creates an IO error with the path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
