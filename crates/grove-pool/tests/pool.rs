use grove_core::ManualClock;
use grove_index::{FixedProbe, IndexError};
use grove_pool::{Cleanable, PoolConfig, PoolError, WorkspacePool};
use grove_watcher::{MemoryBackend, WatchConfig, WatchService};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

fn pool(max_instances: usize) -> (WorkspacePool, WatchService, Arc<ManualClock>) {
    let clock = ManualClock::shared();
    let service = WatchService::with_backend(
        WatchConfig::default(),
        Box::new(MemoryBackend::new()),
        clock.clone(),
    );
    let config = PoolConfig {
        max_instances,
        ..Default::default()
    };
    let pool = WorkspacePool::new(config, service.clone())
        .with_clock(clock.clone())
        .with_memory_probe(Arc::new(FixedProbe(None)));
    (pool, service, clock)
}

fn workspace(name: &str) -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join(format!("{}.rs", name)), "fn main() {}").unwrap();
    let root = dir.path().canonicalize().unwrap();
    (dir, root)
}

#[tokio::test]
async fn test_reopening_returns_same_instance() {
    let (mut pool, _service, _clock) = pool(5);
    let (_a, a) = workspace("a");

    pool.get_or_create(&a).await.unwrap();
    let files = pool.get_or_create(&a).await.unwrap().search_files("a.rs", 10);
    assert_eq!(files.len(), 1);
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.active_path(), Some(a.as_path()));
}

#[tokio::test]
async fn test_least_recently_used_inactive_is_evicted() {
    let (mut pool, service, clock) = pool(2);
    let (_a, a) = workspace("a");
    let (_b, b) = workspace("b");
    let (_c, c) = workspace("c");

    pool.get_or_create(&a).await.unwrap();
    clock.advance(Duration::from_secs(1));
    pool.get_or_create(&b).await.unwrap();
    clock.advance(Duration::from_secs(1));
    // Touch a again so b becomes the oldest.
    pool.get_or_create(&a).await.unwrap();
    clock.advance(Duration::from_secs(1));
    pool.get_or_create(&c).await.unwrap();

    assert_eq!(pool.len(), 2);
    assert!(pool.contains(&a));
    assert!(!pool.contains(&b));
    assert!(pool.contains(&c));
    assert!(service.status(&b).is_none());
    assert_eq!(pool.stats().evictions, 1);
    assert!(pool.instance(&c).unwrap().is_active());
    assert!(!pool.instance(&a).unwrap().is_active());
}

#[tokio::test]
async fn test_active_instance_is_never_evicted() {
    let (mut pool, _service, _clock) = pool(1);
    let (_a, a) = workspace("a");
    let (_b, b) = workspace("b");
    let (_c, c) = workspace("c");

    pool.get_or_create(&a).await.unwrap();
    pool.get_or_create(&b).await.unwrap();
    // a was active while b opened, so the pool overflowed instead.
    assert_eq!(pool.len(), 2);

    pool.get_or_create(&c).await.unwrap();
    assert!(!pool.contains(&a));
    assert!(pool.contains(&b));
    assert!(pool.contains(&c));
}

#[tokio::test]
async fn test_failed_initialize_is_not_retained() {
    let (mut pool, _service, _clock) = pool(5);
    let (dir, _) = workspace("a");
    let missing = dir.path().join("nope");

    let err = pool.get_or_create(&missing).await.unwrap_err();
    assert!(matches!(err, PoolError::Index(IndexError::MissingRoot(_))));
    assert!(pool.is_empty());
    assert_eq!(pool.active_path(), None);
}

#[tokio::test]
async fn test_sweep_evicts_idle_inactive_instances() {
    let (mut pool, service, clock) = pool(5);
    let (_a, a) = workspace("a");
    let (_b, b) = workspace("b");

    pool.get_or_create(&a).await.unwrap();
    pool.get_or_create(&b).await.unwrap();

    clock.advance(Duration::from_secs(30));
    assert!(pool.tick().sweep.is_none());

    clock.advance(Duration::from_secs(31 * 60));
    let sweep = pool.tick().sweep.unwrap();
    assert_eq!(sweep.evicted, vec![a.clone()]);
    assert!(!pool.contains(&a));
    // Idle, but active.
    assert!(pool.contains(&b));
    assert!(service.status(&a).is_none());
}

#[tokio::test]
async fn test_close_and_shutdown_release_everything() {
    let (mut pool, service, _clock) = pool(5);
    let (_a, a) = workspace("a");
    let (_b, b) = workspace("b");

    pool.get_or_create(&a).await.unwrap();
    pool.get_or_create(&b).await.unwrap();
    assert!(pool.close(&b));
    assert!(!pool.close(&b));
    assert_eq!(pool.active_path(), None);
    assert!(service.status(&b).is_none());

    pool.shutdown();
    assert!(pool.is_empty());
    assert!(service.status(&a).is_none());
    assert_eq!(service.stats().roots, 0);
    assert!(matches!(
        pool.get_or_create(&a).await,
        Err(PoolError::ShutDown)
    ));
    assert!(pool.tick().sweep.is_none());
}

#[tokio::test]
async fn test_closed_index_reports_closed() {
    let (mut pool, _service, _clock) = pool(5);
    let (_a, a) = workspace("a");

    let index = pool.get_or_create(&a).await.unwrap();
    assert!(!index.is_closed());
    index.close();
    index.close();
    assert!(index.is_closed());
    assert_eq!(Cleanable::force_cleanup(index), 0);
}
