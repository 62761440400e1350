//! Bounded pool of workspace indexes.
//!
//! At most `max_instances` indexes stay open. Switching to a workspace
//! marks it active; the active one is never evicted. Everything else is
//! evicted least-recently-used first, or swept once it has been idle
//! longer than `idle_ttl`.

use crate::cleanable::Cleanable;
use crate::error::{PoolError, Result};
use grove_core::{system_clock, SharedClock, TimerQueue};
use grove_index::{IndexConfig, MemoryProbe, WorkspaceIndex};
use grove_watcher::{PumpReport, WatchService, WatchStats};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_instances: usize,
    /// Inactive instances idle longer than this are swept.
    pub idle_ttl: Duration,
    pub sweep_interval: Duration,
    /// Template for every index the pool opens.
    pub index: IndexConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_instances: 5,
            idle_ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            index: IndexConfig::default(),
        }
    }
}

/// One open workspace.
#[derive(Debug)]
pub struct WorkspaceInstance {
    pub index: WorkspaceIndex,
    path: PathBuf,
    created_at: Instant,
    last_accessed: Instant,
    active: bool,
}

impl WorkspaceInstance {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_accessed(&self) -> Instant {
        self.last_accessed
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_accessed)
    }
}

/// Result of a sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub evicted: Vec<PathBuf>,
    /// Expired cache entries purged from the survivors.
    pub purged: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolTickReport {
    pub pump: PumpReport,
    pub changes_applied: usize,
    pub sweep: Option<SweepReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceStats {
    pub path: PathBuf,
    pub active: bool,
    pub idle: Duration,
    pub cache_size: usize,
    pub total_files: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub instances: usize,
    pub max_instances: usize,
    pub active: Option<PathBuf>,
    pub evictions: usize,
    pub workspaces: Vec<InstanceStats>,
    pub watch: WatchStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PoolTimer {
    Sweep,
}

pub struct WorkspacePool {
    config: PoolConfig,
    watcher: WatchService,
    clock: SharedClock,
    probe: Option<Arc<dyn MemoryProbe>>,
    instances: HashMap<PathBuf, WorkspaceInstance>,
    active: Option<PathBuf>,
    timers: TimerQueue<PoolTimer>,
    evictions: usize,
    shut_down: bool,
}

impl WorkspacePool {
    pub fn new(config: PoolConfig, watcher: WatchService) -> Self {
        Self {
            config,
            watcher,
            clock: system_clock(),
            probe: None,
            instances: HashMap::new(),
            active: None,
            timers: TimerQueue::new(),
            evictions: 0,
            shut_down: false,
        }
    }

    /// Builder pattern: use another clock for the pool and its indexes.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Builder pattern: memory probe handed to every new index.
    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn watcher(&self) -> &WatchService {
        &self.watcher
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.instances.contains_key(&normalize(path))
    }

    pub fn active_path(&self) -> Option<&Path> {
        self.active.as_deref()
    }

    /// Returns the index for `path`, opening it if needed.
    ///
    /// Opening may evict another instance first. If initialization fails
    /// nothing is kept.
    pub async fn get_or_create(&mut self, path: &Path) -> Result<&mut WorkspaceIndex> {
        if self.shut_down {
            return Err(PoolError::ShutDown);
        }
        let key = normalize(path);
        let now = self.clock.now();

        if self.instances.contains_key(&key) {
            debug!("Reusing workspace {}", key.display());
            self.activate(&key, now);
        } else {
            self.open(&key, now).await?;
        }

        match self.instances.get_mut(&key) {
            Some(instance) => Ok(&mut instance.index),
            None => Err(PoolError::NotOpen(key)),
        }
    }

    async fn open(&mut self, key: &Path, now: Instant) -> Result<()> {
        if self.instances.len() >= self.config.max_instances.max(1) {
            match self.evict_one() {
                Some(evicted) => debug!("Made room by evicting {}", evicted.display()),
                None => debug!(
                    "Pool over capacity ({} open), active workspace kept",
                    self.instances.len()
                ),
            }
        }

        let mut index = WorkspaceIndex::new(self.config.index.clone(), self.watcher.clone())
            .with_clock(self.clock.clone());
        if let Some(probe) = &self.probe {
            index = index.with_memory_probe(Arc::clone(probe));
        }

        self.instances.insert(
            key.to_path_buf(),
            WorkspaceInstance {
                index,
                path: key.to_path_buf(),
                created_at: now,
                last_accessed: now,
                active: false,
            },
        );

        let initialized = match self.instances.get_mut(key) {
            Some(instance) => instance.index.initialize(key).await,
            None => return Err(PoolError::NotOpen(key.to_path_buf())),
        };
        if let Err(e) = initialized {
            if let Some(mut failed) = self.instances.remove(key) {
                failed.index.close();
            }
            return Err(e.into());
        }

        info!("Opened workspace {} ({} open)", key.display(), self.instances.len());
        self.activate(key, now);
        self.timers
            .schedule_if_absent(PoolTimer::Sweep, now + self.config.sweep_interval);
        Ok(())
    }

    fn activate(&mut self, key: &Path, now: Instant) {
        if let Some(previous) = self.active.take() {
            if let Some(instance) = self.instances.get_mut(&previous) {
                instance.active = false;
            }
        }
        if let Some(instance) = self.instances.get_mut(key) {
            instance.active = true;
            instance.last_accessed = now;
            self.active = Some(key.to_path_buf());
        }
    }

    /// Evicts the least recently used instance that isn't active.
    fn evict_one(&mut self) -> Option<PathBuf> {
        let victim = self
            .instances
            .values()
            .filter(|i| !i.active && self.active.as_deref() != Some(i.path.as_path()))
            .min_by_key(|i| i.last_accessed)
            .map(|i| i.path.clone())?;
        self.evict(&victim);
        Some(victim)
    }

    fn evict(&mut self, key: &Path) -> bool {
        let Some(mut instance) = self.instances.remove(key) else {
            return false;
        };
        instance.index.close();
        if self.active.as_deref() == Some(key) {
            self.active = None;
        }
        self.evictions += 1;
        info!("Evicted workspace {}", key.display());
        true
    }

    pub fn get(&self, path: &Path) -> Option<&WorkspaceIndex> {
        self.instances.get(&normalize(path)).map(|i| &i.index)
    }

    /// Like [`get`](Self::get) but mutable. Doesn't count as an access.
    pub fn get_mut(&mut self, path: &Path) -> Option<&mut WorkspaceIndex> {
        self.instances.get_mut(&normalize(path)).map(|i| &mut i.index)
    }

    pub fn instance(&self, path: &Path) -> Option<&WorkspaceInstance> {
        self.instances.get(&normalize(path))
    }

    /// Closes one workspace. Returns false if it wasn't open.
    pub fn close(&mut self, path: &Path) -> bool {
        let key = normalize(path);
        let Some(mut instance) = self.instances.remove(&key) else {
            return false;
        };
        instance.index.close();
        if self.active.as_deref() == Some(key.as_path()) {
            self.active = None;
        }
        info!("Closed workspace {}", key.display());
        true
    }

    /// Evicts idle inactive instances and purges expired entries elsewhere.
    pub fn force_cleanup(&mut self) -> SweepReport {
        let mut report = SweepReport::default();
        if self.shut_down {
            return report;
        }
        let now = self.clock.now();
        let ttl = self.config.idle_ttl;

        let mut idle: Vec<PathBuf> = self
            .instances
            .values()
            .filter(|i| !i.active && i.idle_for(now) > ttl)
            .map(|i| i.path.clone())
            .collect();
        idle.sort();
        for key in idle {
            if self.evict(&key) {
                report.evicted.push(key);
            }
        }

        for instance in self.instances.values_mut() {
            report.purged += sweep(&mut instance.index);
        }

        if !report.evicted.is_empty() || report.purged > 0 {
            info!(
                "Pool sweep: {} evicted, {} expired entries purged",
                report.evicted.len(),
                report.purged
            );
        }
        report
    }

    /// Pumps the watch service, ticks every index and runs the sweep when due.
    pub fn tick(&mut self) -> PoolTickReport {
        let mut report = PoolTickReport::default();
        if self.shut_down {
            return report;
        }

        report.pump = self.watcher.pump();
        for instance in self.instances.values_mut() {
            report.changes_applied += instance.index.tick().changes_applied;
        }

        let now = self.clock.now();
        if self.timers.fire_due(now).contains(&PoolTimer::Sweep) {
            report.sweep = Some(self.force_cleanup());
            if !self.instances.is_empty() {
                self.timers
                    .schedule(PoolTimer::Sweep, now + self.config.sweep_interval);
            }
        }
        report
    }

    /// Earliest instant at which `tick` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.instances
            .values()
            .filter_map(|i| i.index.next_deadline())
            .chain(self.timers.next_deadline())
            .chain(self.watcher.next_deadline())
            .min()
    }

    pub fn stats(&self) -> PoolStats {
        let now = self.clock.now();
        let mut workspaces: Vec<InstanceStats> = self
            .instances
            .values()
            .map(|i| InstanceStats {
                path: i.path.clone(),
                active: i.active,
                idle: i.idle_for(now),
                cache_size: i.index.cache_stats().size,
                total_files: i.index.get_statistics().map_or(0, |p| p.total_files),
            })
            .collect();
        workspaces.sort_by(|a, b| a.path.cmp(&b.path));

        PoolStats {
            instances: self.instances.len(),
            max_instances: self.config.max_instances,
            active: self.active.clone(),
            evictions: self.evictions,
            workspaces,
            watch: self.watcher.stats(),
        }
    }

    /// Stops the sweep and closes every instance.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.timers.cancel_all();
        let count = self.instances.len();
        for (_, mut instance) in self.instances.drain() {
            instance.index.close();
        }
        self.active = None;
        info!("Workspace pool shut down ({} closed)", count);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl Drop for WorkspacePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sweep<C: Cleanable>(item: &mut C) -> usize {
    if item.is_closed() {
        return 0;
    }
    item.force_cleanup()
}

/// Canonical form used as the pool key. Paths that can't be resolved are
/// kept as given; opening them fails validation anyway.
fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_keeps_unresolvable_paths() {
        let missing = Path::new("/definitely/not/here");
        assert_eq!(normalize(missing), missing);
    }

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.max_instances, 5);
        assert_eq!(config.idle_ttl, Duration::from_secs(1800));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
    }
}
