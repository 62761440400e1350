use grove_core::{ChangeKind, IgnoreRules, ManualClock};
use grove_watcher::{
    BackendError, MemoryBackend, SkipReason, StrategyPreset, WatchConfig, WatchError, WatchMode,
    WatchNotification, WatchPlan, WatchService, WatchState,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

fn service(config: WatchConfig) -> (WatchService, MemoryBackend, Arc<ManualClock>) {
    let backend = MemoryBackend::new();
    let clock = ManualClock::shared();
    let service = WatchService::with_backend(config, Box::new(backend.clone()), clock.clone());
    (service, backend, clock)
}

fn workspace(files: &[&str]) -> TempDir {
    let dir = tempdir().unwrap();
    for file in files {
        let path = dir.path().join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }
    dir
}

fn rules(root: &Path) -> IgnoreRules {
    IgnoreRules::with_defaults(root).unwrap()
}

#[test]
fn test_large_tree_is_skipped_without_backend_call() {
    let dir = tempdir().unwrap();
    for sub in ["a", "b"] {
        fs::create_dir_all(dir.path().join(sub)).unwrap();
        for i in 0..20 {
            fs::write(dir.path().join(sub).join(format!("{}.txt", i)), "").unwrap();
        }
    }

    let config = WatchConfig {
        large_tree_threshold: 10,
        ..Default::default()
    };
    let (service, backend, _clock) = service(config);
    let sub = service.watch(dir.path(), rules(dir.path())).unwrap();

    assert_eq!(backend.call_count(), 0);
    let status = service.status(dir.path()).unwrap();
    assert!(matches!(status.state, WatchState::Inert(SkipReason::TooLarge { .. })));
    assert!(matches!(
        sub.drain().as_slice(),
        [WatchNotification::Skipped(SkipReason::TooLarge { .. })]
    ));
}

#[test]
fn test_three_exhaustions_mark_root_permanently_failed() {
    let dir = workspace(&["src/a.ts"]);
    let (service, backend, clock) = service(WatchConfig::default());
    backend.exhaust_next(3);

    let sub = service.watch(dir.path(), rules(dir.path())).unwrap();
    assert_eq!(
        service.status(dir.path()).unwrap().state,
        WatchState::Failed { attempts: 1 }
    );
    assert_eq!(service.scheduled_timers(dir.path()), 1);

    for _ in 0..2 {
        clock.advance(Duration::from_secs(2));
        service.pump();
    }

    let status = service.status(dir.path()).unwrap();
    assert_eq!(status.state, WatchState::PermanentlyFailed);
    assert_eq!(status.attempts, 3);
    assert_eq!(service.scheduled_timers(dir.path()), 0);
    assert_eq!(backend.call_count(), 3);

    // Retries use the conservative polling plan.
    let calls = backend.calls();
    assert_eq!(calls[1].1, WatchPlan::retry());
    assert_eq!(calls[2].1, WatchPlan::retry());

    clock.advance(Duration::from_secs(60));
    service.pump();
    assert_eq!(backend.call_count(), 3);

    let notes = sub.drain();
    assert_eq!(
        notes.last(),
        Some(&WatchNotification::Failed {
            attempts: 3,
            retrying: false
        })
    );
}

#[test]
fn test_retry_recovers_with_polling() {
    let dir = workspace(&["src/a.ts"]);
    let (service, backend, clock) = service(WatchConfig::default());
    backend.exhaust_next(1);

    let sub = service.watch(dir.path(), rules(dir.path())).unwrap();
    clock.advance(Duration::from_secs(2));
    let report = service.pump();

    assert_eq!(report.retries, 1);
    let status = service.status(dir.path()).unwrap();
    assert_eq!(status.state, WatchState::ActivePolling);
    assert_eq!(status.attempts, 0);
    assert!(matches!(status.plan.map(|p| p.mode), Some(WatchMode::Polling { .. })));
    assert!(sub
        .drain()
        .contains(&WatchNotification::Recovered(WatchPlan::retry())));
}

#[test]
fn test_exhaustion_releases_half_of_active_watches() {
    let small = workspace(&["a.ts"]);
    let large = workspace(&["a.ts", "b.ts", "c.ts", "d/e.ts"]);
    let failing = workspace(&["x.ts"]);
    let (service, backend, _clock) = service(WatchConfig::default());

    let small_sub = service.watch(small.path(), rules(small.path())).unwrap();
    let large_sub = service.watch(large.path(), rules(large.path())).unwrap();
    backend.exhaust_next(1);
    service.watch(failing.path(), rules(failing.path())).unwrap();

    assert_eq!(
        service.status(large.path()).unwrap().state,
        WatchState::Inert(SkipReason::Released)
    );
    assert!(!backend.is_live(large.path()));
    assert!(large_sub.drain().contains(&WatchNotification::Released));

    assert_eq!(service.status(small.path()).unwrap().state, WatchState::ActiveNative);
    assert!(backend.is_live(small.path()));
    assert!(small_sub.drain().is_empty());
}

#[test]
fn test_asynchronous_exhaustion_is_handled_on_pump() {
    let dir = workspace(&["src/a.ts"]);
    let (service, backend, _clock) = service(WatchConfig::default());
    let _sub = service.watch(dir.path(), rules(dir.path())).unwrap();

    assert!(backend.emit_error(dir.path(), true));
    service.pump();

    assert_eq!(
        service.status(dir.path()).unwrap().state,
        WatchState::Failed { attempts: 1 }
    );
    assert!(!backend.is_live(dir.path()));
}

#[test]
fn test_fallback_after_repeated_permanent_failures() {
    let config = WatchConfig {
        max_retry_attempts: 1,
        ..Default::default()
    };
    let (service, backend, _clock) = service(config);
    let roots: Vec<TempDir> = (0..4).map(|_| workspace(&["a.ts"])).collect();

    backend.exhaust_next(3);
    let first = service.watch(roots[0].path(), rules(roots[0].path())).unwrap();
    service.watch(roots[1].path(), rules(roots[1].path())).unwrap();
    assert!(!service.is_fallback());
    service.watch(roots[2].path(), rules(roots[2].path())).unwrap();

    assert!(service.is_fallback());
    assert!(first.drain().contains(&WatchNotification::FallbackActivated));

    let late = service.watch(roots[3].path(), rules(roots[3].path())).unwrap();
    assert_eq!(backend.call_count(), 3);
    assert_eq!(
        late.drain(),
        vec![WatchNotification::Skipped(SkipReason::Fallback)]
    );

    service.reset_fallback();
    assert!(service.unwatch(roots[3].path()));
    service.watch(roots[3].path(), rules(roots[3].path())).unwrap();
    assert_eq!(backend.call_count(), 4);
    assert_eq!(service.stats().permanently_failed, 0);
}

#[test]
fn test_debounce_coalesces_burst() {
    let dir = workspace(&["a.ts", "b.ts"]);
    let root = dir.path();
    let (service, backend, clock) = service(WatchConfig::default());
    let sub = service.watch(root, rules(root)).unwrap();

    backend.emit(root, ChangeKind::Add, root.join("a.ts"));
    backend.emit(root, ChangeKind::Modify, root.join("b.ts"));
    clock.advance(Duration::from_millis(300));
    service.pump();
    backend.emit(root, ChangeKind::Modify, root.join("a.ts"));
    clock.advance(Duration::from_millis(300));
    service.pump();

    // The third event pushed the deadline out.
    assert!(sub.drain().is_empty());
    assert_eq!(service.status(root).unwrap().pending_events, 3);

    clock.advance(Duration::from_millis(500));
    let report = service.pump();
    assert_eq!(report.flushed, 2);

    let notes = sub.drain();
    assert_eq!(notes.len(), 3);
    match (&notes[0], &notes[1], &notes[2]) {
        (
            WatchNotification::Changed(first),
            WatchNotification::Changed(second),
            WatchNotification::Batch(batch),
        ) => {
            assert_eq!(first.path, root.join("b.ts"));
            assert_eq!(second.path, root.join("a.ts"));
            assert_eq!(second.kind, ChangeKind::Modify);
            assert_eq!(batch.len(), 3);
            assert_eq!(batch[0].kind, ChangeKind::Add);
        }
        other => panic!("unexpected notifications: {:?}", other),
    }
    assert_eq!(service.scheduled_timers(root), 0);
}

#[test]
fn test_ignored_events_never_reach_the_queue() {
    let dir = workspace(&["src/a.ts", "node_modules/pkg/index.js"]);
    let root = dir.path();
    let (service, backend, clock) = service(WatchConfig::default());
    let sub = service.watch(root, rules(root)).unwrap();

    backend.emit(root, ChangeKind::Modify, root.join("node_modules/pkg/index.js"));
    backend.emit(root, ChangeKind::Add, root.join(".git/index"));
    let report = service.pump();

    assert_eq!(report.received, 2);
    assert_eq!(report.dropped, 2);
    assert_eq!(service.scheduled_timers(root), 0);
    clock.advance(Duration::from_secs(1));
    service.pump();
    assert!(sub.drain().is_empty());
}

#[test]
fn test_manual_refresh_diffs_against_previous_walk() {
    let dir = workspace(&["src/a.ts", "src/b.ts", "deps/lib/x.js"]);
    let root = dir.path();
    let config = WatchConfig {
        strategy: StrategyPreset::Disabled,
        ..Default::default()
    };
    let (service, _backend, _clock) = service(config);
    let mut patterns = grove_core::default_patterns();
    patterns.push("deps".into());
    let sub = service
        .watch(root, IgnoreRules::new(root, &patterns).unwrap())
        .unwrap();
    sub.drain();

    let first = service.manual_refresh(root).unwrap();
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|e| e.kind == ChangeKind::Add));

    let second = service.manual_refresh(root).unwrap();
    assert!(second.is_empty());

    fs::remove_file(root.join("src/a.ts")).unwrap();
    fs::write(root.join("src/c.ts"), "c").unwrap();
    let third = service.manual_refresh(root).unwrap();
    let summary: Vec<_> = third.iter().map(|e| (e.kind, e.relative_path.clone())).collect();
    assert_eq!(
        summary,
        vec![
            (ChangeKind::Add, Path::new("src/c.ts").to_path_buf()),
            (ChangeKind::Remove, Path::new("src/a.ts").to_path_buf()),
        ]
    );

    let notes = sub.drain();
    assert!(matches!(notes.last(), Some(WatchNotification::Batch(b)) if b.len() == 2));
}

#[test]
fn test_recorded_snapshot_seeds_refresh() {
    let dir = workspace(&["a.ts", "b.ts"]);
    let root = dir.path();
    let (service, _backend, _clock) = service(WatchConfig::default());
    let _sub = service.watch(root, rules(root)).unwrap();

    service.record_snapshot(root, vec![root.join("a.ts"), root.join("b.ts")]);
    assert!(service.manual_refresh(root).unwrap().is_empty());
}

#[test]
fn test_refresh_leaves_deep_and_binary_files_alone() {
    let dir = workspace(&["top.ts", "a/b/c/deep.ts", "logo.png"]);
    let root = dir.path();
    let (service, _backend, _clock) = service(WatchConfig {
        strategy: StrategyPreset::Disabled,
        refresh_depth: 2,
        ..Default::default()
    });
    let _sub = service.watch(root, rules(root)).unwrap();

    service.record_snapshot(root, vec![root.join("top.ts"), root.join("a/b/c/deep.ts")]);
    assert!(service.manual_refresh(root).unwrap().is_empty());
    // The deep path survives in the snapshot too.
    assert!(service.manual_refresh(root).unwrap().is_empty());

    fs::remove_file(root.join("top.ts")).unwrap();
    let events = service.manual_refresh(root).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ChangeKind::Remove);
    assert_eq!(events[0].path, root.join("top.ts"));
}

#[test]
fn test_sustained_churn_flushes_after_max_wait() {
    let dir = workspace(&["a.ts"]);
    let root = dir.path();
    let (service, backend, clock) = service(WatchConfig {
        debounce: Duration::from_millis(500),
        max_debounce_wait: Duration::from_secs(2),
        ..Default::default()
    });
    let sub = service.watch(root, rules(root)).unwrap();
    sub.drain();

    let mut flushed_at = None;
    for step in 1..=10u64 {
        backend.emit(root, ChangeKind::Modify, root.join("a.ts"));
        service.pump();
        clock.advance(Duration::from_millis(300));
        if service.pump().flushed > 0 {
            flushed_at = Some(step * 300);
            break;
        }
    }

    // Events every 300ms never leave a 500ms gap.
    let flushed_at = flushed_at.expect("churn never flushed");
    assert!(flushed_at <= 2_100, "flushed after {}ms", flushed_at);
    assert!(matches!(sub.drain().last(), Some(WatchNotification::Batch(_))));
    assert_eq!(service.status(root).unwrap().pending_events, 0);
}

#[test]
fn test_non_exhaustion_failure_is_reported_not_returned() {
    let dir = workspace(&["a.ts"]);
    let root = dir.path();
    let (service, backend, _clock) = service(WatchConfig::default());
    backend.fail_next(BackendError::Other("permission denied".into()));

    let sub = service.watch(root, rules(root)).unwrap();

    assert_eq!(service.status(root).unwrap().state, WatchState::PermanentlyFailed);
    assert!(matches!(
        sub.drain().as_slice(),
        [WatchNotification::Failed { retrying: false, .. }]
    ));
    let stats = service.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.permanently_failed, 1);
    assert_eq!(service.manual_refresh(root).unwrap().len(), 1);
}

#[test]
fn test_disabled_strategy_and_watcher_limit() {
    let a = workspace(&["a.ts"]);
    let b = workspace(&["b.ts"]);
    let config = WatchConfig {
        max_watchers: 1,
        ..Default::default()
    };
    let (service, backend, _clock) = service(config);

    service.watch(a.path(), rules(a.path())).unwrap();
    let refused = service.watch(b.path(), rules(b.path())).unwrap();
    assert_eq!(
        refused.drain(),
        vec![WatchNotification::Skipped(SkipReason::WatcherLimit)]
    );
    assert_eq!(service.stats().handles, 1);
    assert_eq!(backend.call_count(), 1);

    service.unwatch(a.path());
    service.unwatch(b.path());
    service.set_strategy(StrategyPreset::Disabled);
    let disabled = service.watch(a.path(), rules(a.path())).unwrap();
    assert_eq!(
        disabled.drain(),
        vec![WatchNotification::Skipped(SkipReason::Disabled)]
    );
    assert_eq!(backend.call_count(), 1);
}

#[test]
fn test_invalid_root_is_reported() {
    let dir = workspace(&["file.txt"]);
    let (service, _backend, _clock) = service(WatchConfig::default());

    let missing = dir.path().join("missing");
    assert!(matches!(
        service.watch(&missing, rules(&missing)),
        Err(WatchError::InvalidRoot { .. })
    ));

    let file = dir.path().join("file.txt");
    assert!(matches!(
        service.watch(&file, rules(&file)),
        Err(WatchError::InvalidRoot { .. })
    ));

    let _sub = service.watch(dir.path(), rules(dir.path())).unwrap();
    assert!(matches!(
        service.watch(dir.path(), rules(dir.path())),
        Err(WatchError::AlreadyWatched(_))
    ));
    assert!(matches!(
        service.manual_refresh(&missing),
        Err(WatchError::NotWatched(_))
    ));
}

#[test]
fn test_shutdown_releases_everything() {
    let dir = workspace(&["a.ts"]);
    let (service, backend, _clock) = service(WatchConfig::default());
    let _sub = service.watch(dir.path(), rules(dir.path())).unwrap();
    assert_eq!(backend.live_count(), 1);

    service.shutdown();
    assert_eq!(backend.live_count(), 0);
    assert!(matches!(
        service.watch(dir.path(), rules(dir.path())),
        Err(WatchError::ShutDown)
    ));
}
