//! Pool errors.

use grove_index::IndexError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PoolError>;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("workspace pool has been shut down")]
    ShutDown,

    #[error("workspace '{0}' is not open")]
    NotOpen(PathBuf),

    #[error(transparent)]
    Index(#[from] IndexError),
}
