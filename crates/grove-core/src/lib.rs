//! Grove Core - shared building blocks
//!
//! This crate holds the pieces every other Grove crate leans on: the
//! bounded LRU+TTL cache that keeps an index from growing without limit,
//! the file records and change events that flow from the watcher into the
//! index, the ignore rules that keep dependency trees out of both, and a
//! small cooperative timer queue driven by an injectable clock.
//!
//! # Example
//!
//! ```
//! use grove_core::{system_clock, BoundedCache, CacheConfig};
//!
//! let mut cache = BoundedCache::new(CacheConfig::default(), system_clock());
//! cache.set("src/main.rs".to_string(), 42u64);
//! assert_eq!(cache.get("src/main.rs"), Some(&42));
//! ```

pub mod cache;
pub mod clock;
pub mod error;
pub mod ignore_rules;
pub mod languages;
pub mod record;
pub mod timers;

pub use cache::{BoundedCache, CacheConfig, CacheEntry, CacheStats};
pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use error::{CoreError, Result};
pub use ignore_rules::{
    default_patterns, IgnoreRules, IgnoreRulesBuilder, DEFAULT_IGNORE_PATTERNS, IGNORE_FILE_NAME,
};
pub use languages::{is_binary_extension, is_binary_path, language_for_extension, language_for_path};
pub use record::{ChangeEvent, ChangeKind, FileRecord, StatSnapshot};
pub use timers::TimerQueue;
