//! The watch service.
//!
//! One service is constructed per process and handed to every workspace
//! index that needs it. It owns all watch handles, so the global watcher
//! ceiling is a plain counter checked under the service lock.
//!
//! Nothing in here runs on its own. The OS backend pushes raw events into
//! a channel; [`WatchService::pump`] drains that channel, filters and
//! queues events, and fires whatever debounce or retry timers are due.
//! Consumers read [`WatchNotification`]s from their [`WatchSubscription`].
//!
//! Per-root lifecycle:
//!
//! ```text
//! unwatched ──estimate──> active-native | active-polling
//!     │                           │ exhaustion
//!     └──too large / fallback──> inert        v
//!                               failed ──retry ok──> active-polling
//!                                 │ attempts exhausted
//!                                 v
//!                          permanently failed
//! ```

use crate::backend::{ActiveWatch, BackendError, NotifyBackend, RawEvent, WatchBackend, WatchTarget};
use crate::error::{Result, WatchError};
use crate::estimate::estimate_tree_size;
use crate::strategy::{StrategyPreset, WatchMode, WatchPlan};
use grove_core::{
    is_binary_path, system_clock, ChangeEvent, ChangeKind, IgnoreRules, SharedClock, StatSnapshot, TimerQueue,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender, TryIter};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Tunables for a [`WatchService`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Ceiling on watch handles, inert ones included.
    pub max_watchers: usize,
    /// Roots estimated above this many files are never watched.
    pub large_tree_threshold: usize,
    /// Top-level subdirectories sampled when estimating.
    pub sample_dirs: usize,
    pub debounce: Duration,
    /// Longest a pending event waits while new ones keep arriving.
    pub max_debounce_wait: Duration,
    pub max_retry_attempts: u32,
    pub retry_backoff: Duration,
    /// Permanently failed roots needed to enter fallback mode.
    pub fallback_threshold: usize,
    pub strategy: StrategyPreset,
    /// Directory depth walked by manual refresh.
    pub refresh_depth: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            max_watchers: 64,
            large_tree_threshold: 10_000,
            sample_dirs: 5,
            debounce: Duration::from_millis(500),
            max_debounce_wait: Duration::from_secs(2),
            max_retry_attempts: 3,
            retry_backoff: Duration::from_secs(2),
            fallback_threshold: 3,
            strategy: StrategyPreset::Conservative,
            refresh_depth: 8,
        }
    }
}

/// Why a root is registered without an OS watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    TooLarge { estimated_files: usize },
    /// The service is in fallback mode.
    Fallback,
    /// The strategy preset is `disabled`.
    Disabled,
    WatcherLimit,
    /// The root failed permanently earlier in this session.
    PreviouslyFailed,
    /// Released by aggressive cleanup after another root hit exhaustion.
    Released,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge { estimated_files } => {
                write!(f, "too large (~{} files)", estimated_files)
            }
            Self::Fallback => f.write_str("fallback mode"),
            Self::Disabled => f.write_str("watching disabled"),
            Self::WatcherLimit => f.write_str("watcher limit reached"),
            Self::PreviouslyFailed => f.write_str("previously failed"),
            Self::Released => f.write_str("released to free descriptors"),
        }
    }
}

/// State of one watched root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchState {
    ActiveNative,
    ActivePolling,
    Inert(SkipReason),
    /// Waiting for a scheduled retry.
    Failed { attempts: u32 },
    PermanentlyFailed,
}

impl WatchState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::ActiveNative | Self::ActivePolling)
    }

    fn for_plan(plan: &WatchPlan) -> Self {
        match plan.mode {
            WatchMode::Native => Self::ActiveNative,
            WatchMode::Polling { .. } => Self::ActivePolling,
        }
    }
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActiveNative => f.write_str("active (native)"),
            Self::ActivePolling => f.write_str("active (polling)"),
            Self::Inert(reason) => write!(f, "inert: {}", reason),
            Self::Failed { attempts } => write!(f, "failed ({} attempts, retrying)", attempts),
            Self::PermanentlyFailed => f.write_str("permanently failed"),
        }
    }
}

/// Delivered to the subscriber of a root.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchNotification {
    /// Latest coalesced change for one path.
    Changed(ChangeEvent),
    /// Every event of a flushed batch, in arrival order.
    Batch(Vec<ChangeEvent>),
    Skipped(SkipReason),
    /// The OS watch was dropped to free descriptors; use manual refresh.
    Released,
    Failed { attempts: u32, retrying: bool },
    /// A retry succeeded with the given plan.
    Recovered(WatchPlan),
    /// Service-wide fallback; new watches are skipped until reset.
    FallbackActivated,
}

/// Receiving end for one root's notifications.
#[derive(Debug)]
pub struct WatchSubscription {
    root: PathBuf,
    receiver: Receiver<WatchNotification>,
}

impl WatchSubscription {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Everything delivered since the last drain.
    pub fn drain(&self) -> Vec<WatchNotification> {
        self.receiver.try_iter().collect()
    }

    pub fn try_iter(&self) -> TryIter<'_, WatchNotification> {
        self.receiver.try_iter()
    }
}

/// Point-in-time view of one root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandleStatus {
    pub root: PathBuf,
    pub state: WatchState,
    pub plan: Option<WatchPlan>,
    pub attempts: u32,
    pub estimated_files: usize,
    pub pending_events: usize,
    pub registrations: usize,
}

/// Service-wide totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchStats {
    pub roots: usize,
    /// Handles counted against `max_watchers`.
    pub handles: usize,
    pub max_watchers: usize,
    pub active: usize,
    pub inert: usize,
    /// Roots in a failed state, permanently failed ones included.
    pub failed: usize,
    /// Roots that gave up this session, registered or not.
    pub permanently_failed: usize,
    pub fallback: bool,
    pub pending_timers: usize,
    pub strategy: StrategyPreset,
}

/// What one [`WatchService::pump`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    pub received: usize,
    pub dropped: usize,
    pub flushed: usize,
    pub retries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum WatchTimer {
    Debounce(PathBuf),
    Retry(PathBuf),
}

impl WatchTimer {
    fn root(&self) -> &Path {
        match self {
            Self::Debounce(root) | Self::Retry(root) => root,
        }
    }
}

struct RootEntry {
    state: WatchState,
    plan: Option<WatchPlan>,
    rules: IgnoreRules,
    attempts: u32,
    estimated_files: usize,
    /// False only for roots refused at the watcher limit.
    counted: bool,
    watch: Option<Box<dyn ActiveWatch>>,
    pending: Vec<ChangeEvent>,
    /// When the oldest pending event arrived.
    pending_since: Option<Instant>,
    /// Path set recorded by the last manual refresh, kept current by flushes.
    snapshot: Option<HashSet<PathBuf>>,
    sender: Sender<WatchNotification>,
}

impl RootEntry {
    fn notify(&self, notification: WatchNotification) {
        if self.sender.send(notification).is_err() {
            debug!("Dropping notification, subscriber is gone");
        }
    }

    fn apply_to_snapshot(&mut self, event: &ChangeEvent) {
        let Some(snapshot) = self.snapshot.as_mut() else {
            return;
        };
        match event.kind {
            ChangeKind::Add | ChangeKind::Modify => {
                if !event.stat.map_or(false, |s| s.is_dir) {
                    snapshot.insert(event.path.clone());
                }
            }
            ChangeKind::Remove => {
                snapshot.retain(|p| !p.starts_with(&event.path));
            }
        }
    }
}

struct ServiceState {
    config: WatchConfig,
    backend: Box<dyn WatchBackend>,
    clock: SharedClock,
    raw_tx: Sender<RawEvent>,
    raw_rx: Receiver<RawEvent>,
    roots: HashMap<PathBuf, RootEntry>,
    timers: TimerQueue<WatchTimer>,
    failed_roots: HashSet<PathBuf>,
    fallback: bool,
    shut_down: bool,
}

/// Cloneable handle to the process-wide watch service.
#[derive(Clone)]
pub struct WatchService {
    inner: Arc<Mutex<ServiceState>>,
}

impl fmt::Debug for WatchService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("WatchService")
            .field("roots", &state.roots.len())
            .field("fallback", &state.fallback)
            .field("strategy", &state.config.strategy)
            .finish_non_exhaustive()
    }
}

impl Default for WatchService {
    fn default() -> Self {
        Self::new(WatchConfig::default())
    }
}

impl WatchService {
    /// Creates a service backed by OS notifications and the system clock.
    pub fn new(config: WatchConfig) -> Self {
        Self::with_backend(config, Box::new(NotifyBackend::new()), system_clock())
    }

    pub fn with_backend(config: WatchConfig, backend: Box<dyn WatchBackend>, clock: SharedClock) -> Self {
        let (raw_tx, raw_rx) = channel();
        Self {
            inner: Arc::new(Mutex::new(ServiceState {
                config,
                backend,
                clock,
                raw_tx,
                raw_rx,
                roots: HashMap::new(),
                timers: TimerQueue::new(),
                failed_roots: HashSet::new(),
                fallback: false,
                shut_down: false,
            })),
        }
    }

    pub fn config(&self) -> WatchConfig {
        self.inner.lock().config.clone()
    }

    /// Starts watching `root`, filtering events through `rules`.
    ///
    /// Only configuration problems are errors. Every policy outcome (too
    /// large, fallback, disabled, limit, exhaustion) still returns a
    /// subscription whose first notification says what happened.
    pub fn watch(&self, root: &Path, rules: IgnoreRules) -> Result<WatchSubscription> {
        let mut state = self.inner.lock();
        if state.shut_down {
            return Err(WatchError::ShutDown);
        }

        let metadata = std::fs::metadata(root)
            .map_err(|e| WatchError::invalid_root(root, e.to_string()))?;
        if !metadata.is_dir() {
            return Err(WatchError::invalid_root(root, "not a directory"));
        }
        if state.roots.contains_key(root) {
            return Err(WatchError::AlreadyWatched(root.to_path_buf()));
        }

        let (sender, receiver) = channel();
        let subscription = WatchSubscription {
            root: root.to_path_buf(),
            receiver,
        };
        let mut entry = RootEntry {
            state: WatchState::Inert(SkipReason::Disabled),
            plan: None,
            rules,
            attempts: 0,
            estimated_files: 0,
            counted: true,
            watch: None,
            pending: Vec::new(),
            pending_since: None,
            snapshot: None,
            sender,
        };

        let handles = state.roots.values().filter(|e| e.counted).count();
        let planned = state.config.strategy.plan();
        let skip = match planned {
            None => Some(SkipReason::Disabled),
            Some(_) if handles >= state.config.max_watchers => {
                entry.counted = false;
                Some(SkipReason::WatcherLimit)
            }
            Some(_) if state.fallback => Some(SkipReason::Fallback),
            Some(_) if state.failed_roots.contains(root) => Some(SkipReason::PreviouslyFailed),
            Some(_) => {
                let estimate = estimate_tree_size(
                    root,
                    &entry.rules,
                    state.config.sample_dirs,
                    state.config.large_tree_threshold,
                )
                .map_err(|e| WatchError::invalid_root(root, e.to_string()))?;
                entry.estimated_files = estimate.estimated_files;
                if estimate.estimated_files > state.config.large_tree_threshold {
                    Some(SkipReason::TooLarge {
                        estimated_files: estimate.estimated_files,
                    })
                } else {
                    None
                }
            }
        };

        let plan = match (skip, planned) {
            (None, Some(plan)) => plan,
            (reason, _) => {
                let reason = reason.unwrap_or(SkipReason::Disabled);
                info!("Skipping watch on {}: {}", root.display(), reason);
                entry.state = WatchState::Inert(reason);
                entry.notify(WatchNotification::Skipped(reason));
                state.roots.insert(root.to_path_buf(), entry);
                return Ok(subscription);
            }
        };

        let target = WatchTarget {
            root: root.to_path_buf(),
            plan,
            rules: entry.rules.clone(),
        };
        let sink = state.raw_tx.clone();
        let started = state.backend.watch(&target, sink);
        entry.plan = Some(plan);
        entry.state = WatchState::for_plan(&plan);
        state.roots.insert(root.to_path_buf(), entry);

        match started {
            Ok(watch) => {
                info!(
                    "Watching {} ({}, ~{} files)",
                    root.display(),
                    state.config.strategy,
                    state.roots.get(root).map_or(0, |e| e.estimated_files)
                );
                if let Some(entry) = state.roots.get_mut(root) {
                    entry.watch = Some(watch);
                }
            }
            Err(err) => state.handle_backend_error(root, err),
        }

        Ok(subscription)
    }

    /// Stops watching `root` and discards anything pending for it.
    pub fn unwatch(&self, root: &Path) -> bool {
        let mut state = self.inner.lock();
        state.timers.cancel_where(|t| t.root() == root);
        match state.roots.remove(root) {
            Some(_) => {
                debug!("Unwatched {}", root.display());
                true
            }
            None => false,
        }
    }

    /// Drains raw events and fires due timers.
    pub fn pump(&self) -> PumpReport {
        let mut state = self.inner.lock();
        if state.shut_down {
            return PumpReport::default();
        }
        state.pump()
    }

    /// Walks `root` and reports what changed since the last refresh.
    ///
    /// Works in every state, which makes it the recovery path for skipped,
    /// released and failed roots. Events are delivered exactly like live
    /// ones and also returned.
    pub fn manual_refresh(&self, root: &Path) -> Result<Vec<ChangeEvent>> {
        let (rules, depth) = {
            let state = self.inner.lock();
            if state.shut_down {
                return Err(WatchError::ShutDown);
            }
            let entry = state
                .roots
                .get(root)
                .ok_or_else(|| WatchError::NotWatched(root.to_path_buf()))?;
            (entry.rules.clone(), state.config.refresh_depth)
        };

        // Walk without holding the lock.
        let current = collect_files(root, &rules, depth);

        let mut state = self.inner.lock();
        let entry = state
            .roots
            .get_mut(root)
            .ok_or_else(|| WatchError::NotWatched(root.to_path_buf()))?;

        // Paths deeper than the walk are kept but not diffed.
        let (previous, beyond): (HashSet<PathBuf>, HashSet<PathBuf>) = entry
            .snapshot
            .take()
            .unwrap_or_default()
            .into_iter()
            .partition(|p| within_depth(root, p, depth));
        let mut added: Vec<&PathBuf> = current.difference(&previous).collect();
        let mut removed: Vec<&PathBuf> = previous.difference(&current).collect();
        added.sort();
        removed.sort();

        let events: Vec<ChangeEvent> = added
            .into_iter()
            .map(|p| ChangeEvent::new(ChangeKind::Add, root, p.clone()).with_stat(StatSnapshot::read(p)))
            .chain(
                removed
                    .into_iter()
                    .map(|p| ChangeEvent::new(ChangeKind::Remove, root, p.clone())),
            )
            .collect();

        debug!(
            "Manual refresh of {}: {} files, {} changes",
            root.display(),
            current.len(),
            events.len()
        );
        let mut snapshot = current;
        snapshot.extend(beyond);
        entry.snapshot = Some(snapshot);

        if !events.is_empty() {
            for event in &events {
                entry.notify(WatchNotification::Changed(event.clone()));
            }
            entry.notify(WatchNotification::Batch(events.clone()));
        }
        Ok(events)
    }

    /// Seeds the path set manual refresh diffs against.
    pub fn record_snapshot<I>(&self, root: &Path, paths: I) -> bool
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut state = self.inner.lock();
        match state.roots.get_mut(root) {
            Some(entry) => {
                entry.snapshot = Some(paths.into_iter().collect());
                true
            }
            None => false,
        }
    }

    /// Changes the preset used for new watch requests.
    pub fn set_strategy(&self, strategy: StrategyPreset) {
        let mut state = self.inner.lock();
        info!("Watch strategy set to {}", strategy);
        state.config.strategy = strategy;
    }

    /// Leaves fallback mode and forgets which roots failed.
    pub fn reset_fallback(&self) {
        let mut state = self.inner.lock();
        if state.fallback {
            info!("Fallback mode cleared");
        }
        state.fallback = false;
        state.failed_roots.clear();
    }

    pub fn is_fallback(&self) -> bool {
        self.inner.lock().fallback
    }

    /// Drops pending events and the debounce timer for `root`.
    pub fn cancel_pending(&self, root: &Path) -> usize {
        let mut state = self.inner.lock();
        state.timers.cancel(&WatchTimer::Debounce(root.to_path_buf()));
        match state.roots.get_mut(root) {
            Some(entry) => {
                let count = entry.pending.len();
                entry.pending.clear();
                count
            }
            None => 0,
        }
    }

    /// Timers pending for `root`.
    pub fn scheduled_timers(&self, root: &Path) -> usize {
        self.inner.lock().timers.count_where(|t| t.root() == root)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.lock().timers.next_deadline()
    }

    pub fn status(&self, root: &Path) -> Option<HandleStatus> {
        let state = self.inner.lock();
        state.roots.get(root).map(|entry| HandleStatus {
            root: root.to_path_buf(),
            state: entry.state,
            plan: entry.plan,
            attempts: entry.attempts,
            estimated_files: entry.estimated_files,
            pending_events: entry.pending.len(),
            registrations: entry.watch.as_ref().map_or(0, |w| w.registrations()),
        })
    }

    pub fn stats(&self) -> WatchStats {
        let state = self.inner.lock();
        let mut stats = WatchStats {
            roots: state.roots.len(),
            handles: 0,
            max_watchers: state.config.max_watchers,
            active: 0,
            inert: 0,
            failed: 0,
            permanently_failed: state.failed_roots.len(),
            fallback: state.fallback,
            pending_timers: state.timers.len(),
            strategy: state.config.strategy,
        };
        for entry in state.roots.values() {
            if entry.counted {
                stats.handles += 1;
            }
            match entry.state {
                WatchState::ActiveNative | WatchState::ActivePolling => stats.active += 1,
                WatchState::Inert(_) => stats.inert += 1,
                WatchState::Failed { .. } | WatchState::PermanentlyFailed => stats.failed += 1,
            }
        }
        stats
    }

    /// Releases every watch and refuses further work.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock();
        if state.shut_down {
            return;
        }
        let count = state.roots.len();
        state.timers.cancel_all();
        state.roots.clear();
        state.shut_down = true;
        info!("Watch service shut down ({} roots released)", count);
    }
}

impl ServiceState {
    fn pump(&mut self) -> PumpReport {
        let mut report = PumpReport::default();
        let now = self.clock.now();
        let mut starved: Vec<PathBuf> = Vec::new();

        while let Ok(raw) = self.raw_rx.try_recv() {
            report.received += 1;
            match raw {
                RawEvent::Change { root, kind, path } => {
                    if !self.accept(&root, kind, path, now, &mut starved) {
                        report.dropped += 1;
                    }
                }
                RawEvent::Error {
                    root,
                    exhausted: true,
                    message,
                } => {
                    warn!("Watch on {} hit resource exhaustion: {}", root.display(), message);
                    if self.roots.get(&root).map_or(false, |e| e.state.is_active()) {
                        starved.push(root);
                    }
                }
                RawEvent::Error { root, message, .. } => {
                    warn!("Watch error on {}: {}", root.display(), message);
                }
            }
        }

        starved.sort();
        starved.dedup();
        for root in starved {
            self.handle_exhaustion(&root);
        }

        for timer in self.timers.fire_due(now) {
            match timer {
                WatchTimer::Debounce(root) => {
                    report.flushed += self.flush(&root);
                }
                WatchTimer::Retry(root) => {
                    report.retries += 1;
                    self.retry(&root);
                }
            }
        }

        report
    }

    /// Filters one raw event into the pending list. Returns false if dropped.
    fn accept(
        &mut self,
        root: &Path,
        kind: ChangeKind,
        path: PathBuf,
        now: Instant,
        starved: &mut Vec<PathBuf>,
    ) -> bool {
        let debounce = self.config.debounce;
        let max_wait = self.config.max_debounce_wait;
        let Some(entry) = self.roots.get_mut(root) else {
            return false;
        };
        // Late events from a watch that was already released.
        if !entry.state.is_active() {
            return false;
        }

        let relative = match path.strip_prefix(root) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
            _ => return false,
        };
        let stat = if kind == ChangeKind::Remove {
            None
        } else {
            StatSnapshot::read(&path)
        };
        let is_dir = stat.map_or(false, |s| s.is_dir);
        if entry.rules.is_ignored(&relative, is_dir) {
            return false;
        }

        let depth = relative.components().count().saturating_sub(1);
        if let Some(plan) = entry.plan {
            if !plan.covers_depth(depth) {
                return false;
            }
            // Depth-limited watches register directories one by one, so a
            // new directory needs its own registration.
            if kind == ChangeKind::Add && is_dir && plan.depth.is_some() && plan.covers_depth(depth + 1) {
                if let Some(watch) = entry.watch.as_mut() {
                    match watch.add_directory(&path) {
                        Ok(()) => {}
                        Err(err) if err.is_exhaustion() => starved.push(root.to_path_buf()),
                        Err(err) => warn!("Couldn't watch new directory {}: {}", path.display(), err),
                    }
                }
            }
        }

        if entry.pending.is_empty() {
            entry.pending_since = Some(now);
        }
        let oldest = entry.pending_since.unwrap_or(now);
        entry
            .pending
            .push(ChangeEvent::new(kind, root, path).with_stat(stat));
        // Trailing debounce, capped so steady churn still flushes.
        let deadline = (now + debounce).min(oldest + max_wait);
        self.timers
            .schedule(WatchTimer::Debounce(root.to_path_buf()), deadline);
        true
    }

    /// Emits the coalesced pending events for `root`. Returns how many
    /// individual notifications went out.
    fn flush(&mut self, root: &Path) -> usize {
        let Some(entry) = self.roots.get_mut(root) else {
            return 0;
        };
        if entry.pending.is_empty() {
            return 0;
        }

        let batch = std::mem::take(&mut entry.pending);
        let latest = coalesce(&batch);
        for event in &latest {
            entry.apply_to_snapshot(event);
            entry.notify(WatchNotification::Changed(event.clone()));
        }
        entry.notify(WatchNotification::Batch(batch));
        latest.len()
    }

    fn handle_backend_error(&mut self, root: &Path, err: BackendError) {
        match err {
            BackendError::ResourceExhausted(message) => {
                warn!("Watch on {} failed: resource exhausted ({})", root.display(), message);
                self.handle_exhaustion(root);
            }
            BackendError::Other(message) => {
                warn!("Watch on {} failed: {}", root.display(), message);
                self.mark_permanently_failed(root);
            }
        }
    }

    fn handle_exhaustion(&mut self, root: &Path) {
        match self.roots.get_mut(root) {
            Some(entry) if !matches!(entry.state, WatchState::PermanentlyFailed | WatchState::Inert(_)) => {
                entry.watch = None;
            }
            _ => return,
        }

        self.release_half(root);

        let max_attempts = self.config.max_retry_attempts;
        let Some(entry) = self.roots.get_mut(root) else {
            return;
        };
        entry.attempts += 1;
        let attempts = entry.attempts;

        if attempts < max_attempts {
            entry.state = WatchState::Failed { attempts };
            entry.notify(WatchNotification::Failed {
                attempts,
                retrying: true,
            });
            let at = self.clock.now() + self.config.retry_backoff;
            self.timers.schedule(WatchTimer::Retry(root.to_path_buf()), at);
            info!(
                "Retrying watch on {} in {:?} (attempt {}/{})",
                root.display(),
                self.config.retry_backoff,
                attempts + 1,
                max_attempts
            );
        } else {
            self.mark_permanently_failed(root);
        }
    }

    /// Drops roughly half of the other active watches, largest trees first.
    fn release_half(&mut self, failing: &Path) {
        let mut candidates: Vec<(usize, PathBuf)> = self
            .roots
            .iter()
            .filter(|(path, entry)| path.as_path() != failing && entry.watch.is_some())
            .map(|(path, entry)| (entry.estimated_files, path.clone()))
            .collect();
        if candidates.is_empty() {
            return;
        }
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        let release = (candidates.len() + 1) / 2;

        for (_, path) in candidates.into_iter().take(release) {
            self.flush(&path);
            self.timers.cancel(&WatchTimer::Debounce(path.clone()));
            if let Some(entry) = self.roots.get_mut(&path) {
                entry.watch = None;
                entry.state = WatchState::Inert(SkipReason::Released);
                entry.notify(WatchNotification::Released);
                info!("Released watch on {} to free descriptors", path.display());
            }
        }
    }

    fn mark_permanently_failed(&mut self, root: &Path) {
        self.timers.cancel(&WatchTimer::Retry(root.to_path_buf()));
        let Some(entry) = self.roots.get_mut(root) else {
            return;
        };
        entry.watch = None;
        entry.state = WatchState::PermanentlyFailed;
        entry.notify(WatchNotification::Failed {
            attempts: entry.attempts,
            retrying: false,
        });
        warn!(
            "Giving up on watching {} after {} attempts; use manual refresh",
            root.display(),
            entry.attempts
        );

        self.failed_roots.insert(root.to_path_buf());
        if !self.fallback && self.failed_roots.len() >= self.config.fallback_threshold {
            self.fallback = true;
            warn!(
                "{} roots failed permanently, entering fallback mode",
                self.failed_roots.len()
            );
            for entry in self.roots.values() {
                entry.notify(WatchNotification::FallbackActivated);
            }
        }
    }

    fn retry(&mut self, root: &Path) {
        let fallback = self.fallback;
        let Some(entry) = self.roots.get_mut(root) else {
            return;
        };
        if !matches!(entry.state, WatchState::Failed { .. }) {
            return;
        }
        if fallback {
            entry.state = WatchState::Inert(SkipReason::Fallback);
            entry.notify(WatchNotification::Skipped(SkipReason::Fallback));
            return;
        }

        let plan = WatchPlan::retry();
        let target = WatchTarget {
            root: root.to_path_buf(),
            plan,
            rules: entry.rules.clone(),
        };
        let sink = self.raw_tx.clone();

        match self.backend.watch(&target, sink) {
            Ok(watch) => {
                if let Some(entry) = self.roots.get_mut(root) {
                    entry.watch = Some(watch);
                    entry.plan = Some(plan);
                    entry.state = WatchState::ActivePolling;
                    entry.attempts = 0;
                    entry.notify(WatchNotification::Recovered(plan));
                }
                info!("Watch on {} recovered with polling", root.display());
            }
            Err(err) => self.handle_backend_error(root, err),
        }
    }
}

/// Latest event per path, ordered by when that latest event arrived.
fn coalesce(events: &[ChangeEvent]) -> Vec<ChangeEvent> {
    let mut seen = HashSet::new();
    let mut latest: Vec<ChangeEvent> = events
        .iter()
        .rev()
        .filter(|e| seen.insert(e.path.clone()))
        .cloned()
        .collect();
    latest.reverse();
    latest
}

fn collect_files(root: &Path, rules: &IgnoreRules, depth: usize) -> HashSet<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .max_depth(depth)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !rules.is_ignored(e.path(), e.file_type().is_dir()))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && !is_binary_path(entry.path()))
        .map(|entry| entry.into_path())
        .collect()
}

/// Whether `path` is no deeper than `depth` levels below `root`, counted
/// the way `WalkDir::max_depth` counts them.
fn within_depth(root: &Path, path: &Path, depth: usize) -> bool {
    path.strip_prefix(root)
        .map_or(false, |rel| rel.components().count() <= depth)
}

/// How long until the next timer is due, for sleeping event loops.
pub fn time_until(deadline: Option<Instant>, now: Instant, idle: Duration) -> Duration {
    match deadline {
        Some(at) => at.saturating_duration_since(now).min(idle),
        None => idle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: ChangeKind, path: &str) -> ChangeEvent {
        ChangeEvent::new(kind, Path::new("/w"), path)
    }

    #[test]
    fn test_coalesce_keeps_latest_per_path() {
        let events = vec![
            event(ChangeKind::Add, "/w/a"),
            event(ChangeKind::Modify, "/w/b"),
            event(ChangeKind::Modify, "/w/a"),
            event(ChangeKind::Remove, "/w/c"),
        ];
        let latest = coalesce(&events);

        let summary: Vec<_> = latest
            .iter()
            .map(|e| (e.kind, e.path.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (ChangeKind::Modify, "/w/b".to_string()),
                (ChangeKind::Modify, "/w/a".to_string()),
                (ChangeKind::Remove, "/w/c".to_string()),
            ]
        );
    }

    #[test]
    fn test_time_until_caps_at_idle() {
        let now = Instant::now();
        let idle = Duration::from_millis(200);
        assert_eq!(time_until(None, now, idle), idle);
        assert_eq!(time_until(Some(now + Duration::from_secs(5)), now, idle), idle);
        assert_eq!(
            time_until(Some(now + Duration::from_millis(50)), now, idle),
            Duration::from_millis(50)
        );
        assert_eq!(time_until(Some(now), now, idle), Duration::ZERO);
    }
}
