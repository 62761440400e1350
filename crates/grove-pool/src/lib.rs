//! Grove Pool - keeps a bounded set of workspaces open
//!
//! Editors switch between workspaces constantly. Reopening one means a full
//! scan, so recently used workspaces stay open in a [`WorkspacePool`]; the
//! pool caps how many, evicts the least recently used, and sweeps out ones
//! that have sat idle too long. Every pooled item implements [`Cleanable`].

mod cleanable;
mod error;
mod pool;

pub use cleanable::Cleanable;
pub use error::{PoolError, Result};
pub use pool::{
    InstanceStats, PoolConfig, PoolStats, PoolTickReport, SweepReport, WorkspaceInstance,
    WorkspacePool,
};
