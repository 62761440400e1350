//! The per-workspace index.
//!
//! A [`WorkspaceIndex`] owns one bounded cache of [`FileRecord`]s for a
//! single root. It scans the tree in small batches, subscribes to the
//! watch service for its root and applies coalesced changes, keeps a
//! derived [`ProjectInfo`], and watches its own process memory.
//!
//! The index is driven by [`WorkspaceIndex::tick`]; nothing fires in the
//! background. Once [`WorkspaceIndex::cleanup`] has run, every operation
//! answers with an empty value instead of failing.

use crate::context::{count_tokens, ContextBuilder};
use crate::error::{IndexError, Result};
use crate::monitor::{MemoryProbe, ProcStatmProbe};
use crate::project::{classify, is_config_file, is_entry_point, looks_like_project_root, ProjectInfo};
use crate::search::rank;
use crate::store::{HistoryEntry, MetadataStore};
use grove_core::{
    is_binary_path, system_clock, BoundedCache, CacheConfig, CacheStats, ChangeEvent, ChangeKind,
    FileRecord, IgnoreRules, SharedClock, StatSnapshot, TimerQueue, IGNORE_FILE_NAME,
};
use grove_watcher::{HandleStatus, WatchError, WatchNotification, WatchService, WatchSubscription};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// Tunables for a [`WorkspaceIndex`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub cache: CacheConfig,
    /// Directory entries handled between yields during a scan.
    pub scan_batch_size: usize,
    /// Files larger than this are never indexed.
    pub max_file_size: u64,
    /// Resident memory that triggers emergency cleanup.
    pub memory_threshold: u64,
    pub monitor_interval: Duration,
    /// Entries kept by emergency cleanup.
    pub emergency_keep: usize,
    /// Below this many files, contexts include the full tree.
    pub small_project_threshold: usize,
    /// Project-like subdirectories that mark an aggregate root.
    pub multi_project_threshold: usize,
    /// Cache capacity used for aggregate roots.
    pub multi_project_cache_size: usize,
    /// Delay between a change batch and recomputing project info.
    pub recompute_delay: Duration,
    pub ignore_patterns: Vec<String>,
    /// Where metadata and history are persisted. None disables persistence.
    pub state_dir: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            scan_batch_size: 50,
            max_file_size: 512 * 1024,
            memory_threshold: 200 * 1024 * 1024,
            monitor_interval: Duration::from_secs(30),
            emergency_keep: 50,
            small_project_threshold: 200,
            multi_project_threshold: 3,
            multi_project_cache_size: 2_000,
            recompute_delay: Duration::from_millis(250),
            ignore_patterns: grove_core::default_patterns(),
            state_dir: None,
        }
    }
}

/// Outcome of a full scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub files_indexed: usize,
    pub directories: usize,
    pub skipped_ignored: usize,
    pub skipped_binary: usize,
    pub skipped_large: usize,
    pub errors: usize,
    /// The cache filled up and the scan stopped early.
    pub limit_reached: bool,
    pub duration: Duration,
}

/// What one [`WorkspaceIndex::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub changes_applied: usize,
    pub batches: usize,
    pub recomputed: bool,
    pub emergency_cleanup: bool,
}

/// Outcome of an emergency cleanup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub expired: usize,
    pub discarded: usize,
    pub cancelled_events: usize,
    pub remaining: usize,
}

/// Memory figures reported to collaborators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub heap_used: u64,
    pub heap_total: u64,
    pub cache_size: usize,
    pub cache_max_size: usize,
    pub listener_count: usize,
    pub active_timer_count: usize,
    /// Estimated bytes held by cached records.
    pub cache_bytes: usize,
    pub destroyed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

/// Heuristic self-diagnosis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakReport {
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub severity: Severity,
}

impl LeakReport {
    fn new() -> Self {
        Self {
            issues: Vec::new(),
            recommendations: Vec::new(),
            severity: Severity::Low,
        }
    }

    fn flag(&mut self, severity: Severity, issue: String, recommendation: &str) {
        self.issues.push(issue);
        self.recommendations.push(recommendation.to_string());
        self.severity = self.severity.max(severity);
    }
}

/// Snapshot used by status displays.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceSummary {
    pub root: Option<PathBuf>,
    pub project: Option<ProjectInfo>,
    pub cache: CacheStats,
    pub watch: Option<HandleStatus>,
    pub last_scan: Option<ScanReport>,
    pub emergency_cleanups: usize,
    pub destroyed: bool,
}

type Listener = Arc<dyn Fn(ChangeKind, &Path) + Send + Sync>;

#[derive(Default)]
struct ListenerRegistry {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
}

/// Handle returned by [`WorkspaceIndex::on_file_change`].
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<ListenerRegistry>>,
}

impl Subscription {
    fn inert() -> Self {
        Self {
            id: 0,
            registry: Weak::new(),
        }
    }

    /// Removes the listener. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = registry.lock();
        let before = registry.listeners.len();
        registry.listeners.retain(|(id, _)| *id != self.id);
        registry.listeners.len() != before
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum IndexTimer {
    MemoryCheck,
    Recompute,
}

/// Bounded index of one workspace.
pub struct WorkspaceIndex {
    config: IndexConfig,
    watcher: WatchService,
    clock: SharedClock,
    probe: Arc<dyn MemoryProbe>,
    root: Option<PathBuf>,
    cache: BoundedCache<PathBuf, FileRecord>,
    rules: Option<IgnoreRules>,
    subscription: Option<WatchSubscription>,
    project: Option<ProjectInfo>,
    store: Option<MetadataStore>,
    timers: TimerQueue<IndexTimer>,
    listeners: Arc<Mutex<ListenerRegistry>>,
    last_scan: Option<ScanReport>,
    emergency_cleanups: usize,
    destroyed: bool,
}

impl fmt::Debug for WorkspaceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkspaceIndex")
            .field("root", &self.root)
            .field("cache_size", &self.cache.len())
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}

impl WorkspaceIndex {
    pub fn new(config: IndexConfig, watcher: WatchService) -> Self {
        let clock = system_clock();
        Self {
            cache: BoundedCache::new(config.cache, clock.clone()),
            config,
            watcher,
            clock,
            probe: Arc::new(ProcStatmProbe),
            root: None,
            rules: None,
            subscription: None,
            project: None,
            store: None,
            timers: TimerQueue::new(),
            listeners: Arc::new(Mutex::new(ListenerRegistry::default())),
            last_scan: None,
            emergency_cleanups: 0,
            destroyed: false,
        }
    }

    /// Builder pattern: use another clock. Call before `initialize`.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.cache = BoundedCache::new(self.config.cache, clock.clone());
        self.clock = clock;
        self
    }

    /// Builder pattern: use another memory probe.
    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.root.is_some()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Validates `root`, scans it and starts watching it.
    pub async fn initialize(&mut self, root: &Path) -> Result<()> {
        if self.destroyed {
            return Err(IndexError::Destroyed);
        }
        if let Some(existing) = &self.root {
            return Err(IndexError::AlreadyInitialized(existing.clone()));
        }

        let metadata = std::fs::metadata(root).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => IndexError::MissingRoot(root.to_path_buf()),
            _ => IndexError::io(root, e),
        })?;
        if !metadata.is_dir() {
            return Err(IndexError::NotADirectory(root.to_path_buf()));
        }
        let root = root
            .canonicalize()
            .map_err(|e| IndexError::io(root, e))?;

        let rules = IgnoreRules::builder(&root)
            .add_patterns(&self.config.ignore_patterns)
            .add_file(&root.join(IGNORE_FILE_NAME))?
            .add_file(&root.join(".gitignore"))?
            .build()?;

        let projects = count_nested_projects(&root, &rules);
        if projects >= self.config.multi_project_threshold {
            let evicted = self.cache.set_max_size(self.config.multi_project_cache_size);
            warn!(
                "{} looks like {} separate projects, limiting index to {} files",
                root.display(),
                projects,
                self.config.multi_project_cache_size
            );
            debug!("Evicted {} entries while resizing", evicted);
        }

        self.store = self.open_store(&root);
        if let Some(store) = &self.store {
            match store.load_project(&root) {
                Ok(Some(previous)) => {
                    debug!("Reusing persisted metadata for {}", root.display());
                    self.project = Some(previous);
                }
                Ok(None) => {}
                Err(e) => warn!("Couldn't load persisted metadata: {}", e),
            }
        }

        self.root = Some(root.clone());
        self.rules = Some(rules.clone());

        let report = match self.scan().await {
            Ok(report) => report,
            Err(e) => {
                self.root = None;
                self.rules = None;
                self.store = None;
                self.cache.clear();
                return Err(e);
            }
        };

        match self.watcher.watch(&root, rules) {
            Ok(subscription) => {
                self.subscription = Some(subscription);
                self.watcher
                    .record_snapshot(&root, self.cache.keys().cloned().collect::<Vec<_>>());
            }
            Err(e @ WatchError::InvalidRoot { .. }) => {
                self.root = None;
                self.cache.clear();
                return Err(e.into());
            }
            Err(e) => warn!("Not watching {}: {}", root.display(), e),
        }

        let next_check = self.clock.now() + self.config.monitor_interval;
        self.timers.schedule(IndexTimer::MemoryCheck, next_check);

        info!(
            "Indexed {} files in {} ({:?})",
            report.files_indexed,
            root.display(),
            report.duration
        );
        Ok(())
    }

    fn open_store(&self, root: &Path) -> Option<MetadataStore> {
        let dir = self.config.state_dir.as_ref()?;
        let mut hasher = DefaultHasher::new();
        root.hash(&mut hasher);
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        let path = dir.join(format!("{}-{:016x}", name, hasher.finish()));

        match MetadataStore::open(&path) {
            Ok(store) => Some(store),
            Err(e) => {
                warn!("Metadata store unavailable at {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Rebuilds the cache from a fresh breadth-first walk.
    ///
    /// Files go straight into the cache as they are found, so memory stays
    /// bounded by cache capacity even mid-scan. When the cache is full the
    /// scan stops.
    pub async fn scan(&mut self) -> Result<ScanReport> {
        if self.destroyed {
            return Err(IndexError::Destroyed);
        }
        let (root, rules) = match (&self.root, &self.rules) {
            (Some(root), Some(rules)) => (root.clone(), rules.clone()),
            _ => return Err(IndexError::MissingRoot(PathBuf::new())),
        };

        let started = Instant::now();
        let mut report = ScanReport::default();
        let batch_size = self.config.scan_batch_size.max(1);
        let mut handled = 0usize;
        let mut queue = VecDeque::from([root.clone()]);

        self.cache.clear();

        'walk: while let Some(dir) = queue.pop_front() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if dir == root => return Err(IndexError::io(&dir, e)),
                Err(e) => {
                    warn!("Skipping unreadable directory {}: {}", dir.display(), e);
                    report.errors += 1;
                    continue;
                }
            };
            report.directories += 1;

            for entry in entries {
                handled += 1;
                if handled % batch_size == 0 {
                    tokio::task::yield_now().await;
                }

                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        debug!("Skipping entry in {}: {}", dir.display(), e);
                        report.errors += 1;
                        continue;
                    }
                };
                let file_type = match entry.file_type() {
                    Ok(ft) => ft,
                    Err(e) => {
                        debug!("Skipping {}: {}", entry.path().display(), e);
                        report.errors += 1;
                        continue;
                    }
                };
                if file_type.is_symlink() {
                    continue;
                }

                let path = entry.path();
                if rules.is_ignored(&path, file_type.is_dir()) {
                    report.skipped_ignored += 1;
                    continue;
                }
                if file_type.is_dir() {
                    queue.push_back(path);
                    continue;
                }
                if is_binary_path(&path) {
                    report.skipped_binary += 1;
                    continue;
                }

                let metadata = match entry.metadata() {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("Failed to stat {}: {}", path.display(), e);
                        report.errors += 1;
                        continue;
                    }
                };
                if metadata.len() > self.config.max_file_size {
                    report.skipped_large += 1;
                    continue;
                }

                if self.cache.len() >= self.cache.max_size() {
                    report.limit_reached = true;
                    warn!(
                        "Index limit of {} files reached in {}, stopping scan",
                        self.cache.max_size(),
                        root.display()
                    );
                    break 'walk;
                }

                self.cache.set(path.clone(), FileRecord::from_metadata(path, &metadata));
                report.files_indexed += 1;
            }
        }

        report.duration = started.elapsed();
        // Keep manual refresh diffing against what was just indexed.
        self.watcher
            .record_snapshot(&root, self.cache.keys().cloned().collect::<Vec<_>>());
        self.recompute_project();
        self.last_scan = Some(report.clone());
        Ok(report)
    }

    /// Applies pending watch notifications and fires due timers.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        if self.destroyed {
            return report;
        }

        let notifications = self
            .subscription
            .as_ref()
            .map(|s| s.drain())
            .unwrap_or_default();
        for notification in notifications {
            self.handle_notification(notification, &mut report);
        }

        let now = self.clock.now();
        for timer in self.timers.fire_due(now) {
            match timer {
                IndexTimer::Recompute => {
                    self.recompute_project();
                    report.recomputed = true;
                }
                IndexTimer::MemoryCheck => {
                    if self.check_memory() {
                        report.emergency_cleanup = true;
                    }
                    let next = now + self.config.monitor_interval;
                    self.timers.schedule(IndexTimer::MemoryCheck, next);
                }
            }
        }

        report
    }

    fn handle_notification(&mut self, notification: WatchNotification, report: &mut TickReport) {
        let root = self.root.clone().unwrap_or_default();
        match notification {
            WatchNotification::Changed(event) => {
                if self.apply_change(&event) {
                    report.changes_applied += 1;
                }
            }
            WatchNotification::Batch(_) => {
                report.batches += 1;
                let at = self.clock.now() + self.config.recompute_delay;
                self.timers.schedule(IndexTimer::Recompute, at);
            }
            WatchNotification::Skipped(reason) => {
                info!("Live updates off for {} ({}); use manual refresh", root.display(), reason);
            }
            WatchNotification::Released => {
                warn!("Watch on {} was released; use manual refresh", root.display());
            }
            WatchNotification::Failed { attempts, retrying } => {
                if retrying {
                    debug!("Watch on {} failed (attempt {}), retrying", root.display(), attempts);
                } else {
                    warn!("Watching {} failed; use manual refresh", root.display());
                }
            }
            WatchNotification::Recovered(_) => {
                info!("Watch on {} recovered", root.display());
            }
            WatchNotification::FallbackActivated => {
                warn!("Watch service in fallback mode; use manual refresh for {}", root.display());
            }
        }
    }

    /// Applies one change to the cache and notifies listeners.
    fn apply_change(&mut self, event: &ChangeEvent) -> bool {
        match event.kind {
            ChangeKind::Add | ChangeKind::Modify => {
                let stat = match event.stat.or_else(|| StatSnapshot::read(&event.path)) {
                    Some(stat) => stat,
                    None => return false,
                };
                if stat.is_dir || is_binary_path(&event.path) || stat.size > self.config.max_file_size {
                    return false;
                }
                self.cache
                    .set(event.path.clone(), FileRecord::from_stat(event.path.clone(), &stat));
            }
            ChangeKind::Remove => {
                let doomed: Vec<PathBuf> = self
                    .cache
                    .keys()
                    .filter(|key| key.starts_with(&event.path))
                    .cloned()
                    .collect();
                for key in &doomed {
                    self.cache.delete(key);
                }
            }
        }

        self.emit(event.kind, &event.path);
        true
    }

    fn emit(&self, kind: ChangeKind, path: &Path) {
        // Call outside the lock so a listener may unsubscribe itself.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(kind, path);
        }
    }

    /// Re-walks the root through the watch service.
    ///
    /// The walk is diffed against what the cache holds now, so records
    /// dropped by cleanup, expiry or eviction come back. The resulting
    /// events are applied like live ones. Returns how many changes were
    /// applied.
    pub fn manual_refresh(&mut self) -> Result<usize> {
        if self.destroyed {
            return Ok(0);
        }
        let Some(root) = self.root.clone() else {
            return Ok(0);
        };
        self.watcher
            .record_snapshot(&root, self.cache.keys().cloned().collect::<Vec<_>>());
        let events = self.watcher.manual_refresh(&root)?;
        let report = self.tick();
        debug!(
            "Refreshed {}: {} changes found, {} applied",
            root.display(),
            events.len(),
            report.changes_applied
        );
        Ok(report.changes_applied)
    }

    fn recompute_project(&mut self) {
        let Some(root) = self.root.clone() else {
            return;
        };
        self.timers.cancel(&IndexTimer::Recompute);
        let info = classify(&root, self.cache.values());
        if let Some(store) = &self.store {
            if let Err(e) = store.save_project(&root, &info) {
                warn!("Couldn't persist metadata: {}", e);
            }
        }
        self.project = Some(info);
    }

    fn check_memory(&mut self) -> bool {
        let Some(memory) = self.probe.sample() else {
            return false;
        };
        if memory.resident <= self.config.memory_threshold {
            return false;
        }
        warn!(
            "Resident memory {} MiB over {} MiB threshold, shedding index",
            memory.resident / (1024 * 1024),
            self.config.memory_threshold / (1024 * 1024)
        );
        self.emergency_cleanup();
        true
    }

    /// Lossy degrade: keeps at most `emergency_keep` records.
    ///
    /// Config files and entry points are kept first, then the oldest
    /// insertions. A manual refresh or rescan restores coverage.
    pub fn emergency_cleanup(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();
        if self.destroyed {
            return report;
        }

        report.expired = self.cache.force_cleanup();
        let keep = self.config.emergency_keep;
        if self.cache.len() > keep {
            report.discarded = self
                .cache
                .shrink_to(keep, |path, _| is_config_file(path) || is_entry_point(path));
        }

        if let Some(root) = &self.root {
            report.cancelled_events = self.watcher.cancel_pending(root);
        }
        self.timers.cancel(&IndexTimer::Recompute);
        self.recompute_project();

        report.remaining = self.cache.len();
        self.emergency_cleanups += 1;
        warn!(
            "Emergency cleanup: {} expired, {} discarded, {} kept",
            report.expired, report.discarded, report.remaining
        );
        report
    }

    /// Purges expired cache entries. Returns how many were removed.
    pub fn force_cleanup(&mut self) -> usize {
        if self.destroyed {
            return 0;
        }
        let removed = self.cache.force_cleanup();
        if removed > 0 {
            debug!("Purged {} expired entries", removed);
            self.recompute_project();
        }
        removed
    }

    /// Ranks cached files against `query`.
    pub fn search_files(&self, query: &str, limit: usize) -> Vec<FileRecord> {
        if self.destroyed {
            return Vec::new();
        }
        let records = self.cache.entries_by_insertion();
        rank(
            records.into_iter().map(|(_, entry)| &entry.value),
            query,
            limit,
            SystemTime::now(),
        )
    }

    /// Assembles a token-bounded text summary for `query`.
    ///
    /// The request is appended to the workspace history.
    pub fn build_context(&self, query: &str, working_files: &[PathBuf], max_tokens: usize) -> String {
        if self.destroyed {
            return String::new();
        }
        let Some(root) = self.root.as_deref() else {
            return String::new();
        };
        let relative = |path: &Path| -> String {
            path.strip_prefix(root)
                .unwrap_or(path)
                .display()
                .to_string()
        };

        let mut builder = ContextBuilder::new(max_tokens);

        if let Some(project) = &self.project {
            let mut lines = vec![format!("Type: {}", project.project_type)];
            if let Some(framework) = &project.framework {
                lines.push(format!("Framework: {}", framework));
            }
            if !project.languages.is_empty() {
                lines.push(format!("Languages: {}", project.languages.join(", ")));
            }
            lines.push(format!("Files: {}", project.total_files));
            builder.push_section("Project", lines);
        }

        builder.push_section(
            "Working files",
            working_files.iter().map(|path| relative(path)),
        );

        let results = self.search_files(query, 20);
        builder.push_section(
            "Relevant files",
            results
                .iter()
                .map(|r| format!("{} ({:.0})", relative(&r.path), r.relevance)),
        );

        let total = self.project.as_ref().map_or(self.cache.len(), |p| p.total_files);
        if total < self.config.small_project_threshold {
            let mut tree: Vec<String> = self.cache.keys().map(|path| relative(path)).collect();
            tree.sort();
            builder.push_section("Tree", tree);
        }

        let tokens = builder.tokens();
        let context = builder.finish();

        if let Some(store) = &self.store {
            let entry = HistoryEntry {
                query: query.to_string(),
                context: context.clone(),
                tokens,
                recorded_at: SystemTime::now(),
            };
            if let Err(e) = store.append_history(root, &entry) {
                warn!("Couldn't record context history: {}", e);
            }
        }

        debug!("Built context for '{}' (~{} tokens)", query, count_tokens(&context));
        context
    }

    /// Reads a file as text. Relative paths resolve against the root.
    pub fn get_file_content(&mut self, path: &Path) -> Option<String> {
        if self.destroyed {
            return None;
        }
        let path = match (&self.root, path.is_absolute()) {
            (Some(root), false) => root.join(path),
            _ => path.to_path_buf(),
        };
        // Counts as an access for recency.
        self.cache.get(&path);
        match std::fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) => {
                debug!("Couldn't read {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn get_statistics(&self) -> Option<ProjectInfo> {
        if self.destroyed {
            return None;
        }
        self.project.clone()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn active_timer_count(&self) -> usize {
        let watcher_timers = self
            .root
            .as_ref()
            .map_or(0, |root| self.watcher.scheduled_timers(root));
        self.timers.len() + watcher_timers
    }

    pub fn get_memory_stats(&self) -> MemoryStats {
        let memory = self.probe.sample().unwrap_or_default();
        MemoryStats {
            heap_used: memory.resident,
            heap_total: memory.virtual_size,
            cache_size: self.cache.len(),
            cache_max_size: self.cache.max_size(),
            listener_count: self.listener_count(),
            active_timer_count: self.active_timer_count(),
            cache_bytes: self.cache.values().map(FileRecord::approx_bytes).sum(),
            destroyed: self.destroyed,
        }
    }

    /// Compares listeners, cache use and timers against expected bounds.
    pub fn detect_memory_leaks(&self) -> LeakReport {
        let mut report = LeakReport::new();
        let stats = self.get_memory_stats();
        let cache = self.cache.stats();

        if self.destroyed {
            if stats.cache_size > 0 || stats.listener_count > 0 || stats.active_timer_count > 0 {
                report.flag(
                    Severity::High,
                    format!(
                        "destroyed index still holds {} entries, {} listeners, {} timers",
                        stats.cache_size, stats.listener_count, stats.active_timer_count
                    ),
                    "call cleanup() again and drop the index",
                );
            }
            return report;
        }

        if stats.listener_count > 50 {
            report.flag(
                Severity::Medium,
                format!("{} change listeners registered", stats.listener_count),
                "unsubscribe listeners that are no longer used",
            );
        }

        if cache.max_size > 0 && cache.size * 10 >= cache.max_size * 9 {
            report.flag(
                Severity::Medium,
                format!("cache at {}/{} entries", cache.size, cache.max_size),
                "add ignore patterns or raise the cache limit",
            );
        }

        if cache.expired > 0 && cache.expired * 10 >= cache.size {
            report.flag(
                Severity::Low,
                format!("{} expired entries not yet purged", cache.expired),
                "run force_cleanup()",
            );
        }

        // Index: memory check + recompute. Watcher: debounce + retry.
        if stats.active_timer_count > 4 {
            report.flag(
                Severity::High,
                format!("{} timers pending", stats.active_timer_count),
                "cancel stale timers with cleanup()",
            );
        }

        if self.is_initialized() && !self.timers.is_scheduled(&IndexTimer::MemoryCheck) {
            report.flag(
                Severity::Medium,
                "memory monitor is not scheduled".to_string(),
                "reinitialize the workspace index",
            );
        }

        if stats.heap_used > self.config.memory_threshold {
            report.flag(
                Severity::High,
                format!("resident memory {} MiB over threshold", stats.heap_used / (1024 * 1024)),
                "run emergency_cleanup() or close idle workspaces",
            );
        }

        report
    }

    /// Registers a change listener.
    pub fn on_file_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(ChangeKind, &Path) + Send + Sync + 'static,
    {
        if self.destroyed {
            return Subscription::inert();
        }
        let mut registry = self.listeners.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.listeners.push((id, Arc::new(callback)));
        Subscription {
            id,
            registry: Arc::downgrade(&self.listeners),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().listeners.len()
    }

    /// Recent context history, oldest first.
    pub fn history(&self, limit: usize) -> Vec<HistoryEntry> {
        if self.destroyed {
            return Vec::new();
        }
        match (&self.store, &self.root) {
            (Some(store), Some(root)) => store.history(root, limit).unwrap_or_else(|e| {
                warn!("Couldn't read history: {}", e);
                Vec::new()
            }),
            _ => Vec::new(),
        }
    }

    /// Earliest instant at which `tick` has timer work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.destroyed {
            return None;
        }
        self.timers.next_deadline()
    }

    pub fn summary(&self) -> WorkspaceSummary {
        WorkspaceSummary {
            root: self.root.clone(),
            project: self.project.clone(),
            cache: self.cache.stats(),
            watch: self.root.as_ref().and_then(|root| self.watcher.status(root)),
            last_scan: self.last_scan.clone(),
            emergency_cleanups: self.emergency_cleanups,
            destroyed: self.destroyed,
        }
    }

    /// Tears everything down. Safe to call more than once.
    pub fn cleanup(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        if let Some(root) = &self.root {
            self.watcher.unwatch(root);
        }
        self.subscription = None;
        self.timers.cancel_all();
        self.cache.clear();
        self.listeners.lock().listeners.clear();
        if let Some(store) = self.store.take() {
            if let Err(e) = store.flush() {
                debug!("Couldn't flush metadata store: {}", e);
            }
        }
        self.project = None;

        info!(
            "Workspace index for {} cleaned up",
            self.root
                .as_ref()
                .map(|r| r.display().to_string())
                .unwrap_or_else(|| "<uninitialized>".to_string())
        );
    }
}

impl Drop for WorkspaceIndex {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Counts immediate subdirectories that look like projects of their own.
fn count_nested_projects(root: &Path, rules: &IgnoreRules) -> usize {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map_or(false, |ft| ft.is_dir()))
        .map(|e| e.path())
        .filter(|path| !rules.is_ignored(path, true))
        .filter(|path| looks_like_project_root(path))
        .count()
}
