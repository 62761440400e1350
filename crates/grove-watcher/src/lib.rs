//! Grove Watcher - resource-bounded directory watching
//!
//! This crate keeps the OS watch primitives from taking the host down:
//! - Large trees are estimated up front and skipped instead of watched
//! - Descriptor exhaustion releases other watches and retries with polling
//! - Repeated failure switches the whole service to fallback mode
//! - Manual refresh produces the same events when live watching is off
//!
//! Events under ignored subtrees are dropped before they reach any queue.

mod backend;
mod error;
mod estimate;
mod service;
mod strategy;

pub use backend::{
    ActiveWatch, BackendError, MemoryBackend, NotifyBackend, RawEvent, RawEventSink, WatchBackend,
    WatchTarget,
};
pub use error::{Result, WatchError};
pub use estimate::{estimate_tree_size, TreeEstimate};
pub use service::{
    time_until, HandleStatus, PumpReport, SkipReason, WatchConfig, WatchNotification, WatchService,
    WatchState, WatchStats, WatchSubscription,
};
pub use strategy::{StrategyPreset, WatchMode, WatchPlan};
