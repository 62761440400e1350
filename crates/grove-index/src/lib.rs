//! Grove Index - bounded per-workspace file index
//!
//! A [`WorkspaceIndex`] scans one root into a bounded cache, keeps it
//! current from watch notifications, and answers metadata queries:
//! ranked file search, token-bounded context documents and project
//! statistics. It also watches process memory and sheds its cache when
//! the process grows past a threshold.
//!
//! Persistence of derived metadata and context history is best-effort
//! and lives in a small sled store.

pub mod context;
pub mod error;
pub mod monitor;
pub mod project;
pub mod search;
pub mod store;
pub mod workspace;

pub use context::{count_tokens, estimate_tokens, ContextBuilder, TruncationReason};
pub use error::{IndexError, Result};
pub use monitor::{FixedProbe, MemoryProbe, ProcStatmProbe, ProcessMemory};
pub use project::{
    classify, detect_project_type, is_config_file, is_entry_point, looks_like_project_root,
    ProjectInfo, ProjectType,
};
pub use search::{rank, score_record};
pub use store::{HistoryEntry, MetadataStore, StoreError};
pub use workspace::{
    CleanupReport, IndexConfig, LeakReport, MemoryStats, ScanReport, Severity, Subscription,
    TickReport, WorkspaceIndex, WorkspaceSummary,
};
