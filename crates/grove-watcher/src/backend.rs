//! OS watch primitives.
//!
//! A [`WatchBackend`] turns a [`WatchTarget`] into a live [`ActiveWatch`]
//! that pushes [`RawEvent`]s into a channel. The service never talks to
//! `notify` directly, which keeps exhaustion handling testable: the
//! [`MemoryBackend`] can be told to fail the way a descriptor-starved
//! kernel would.
//!
//! Dropping an `ActiveWatch` releases whatever OS resources it holds.

use crate::strategy::{WatchMode, WatchPlan};
use grove_core::{ChangeKind, IgnoreRules};
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Unfiltered event straight from a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    Change {
        root: PathBuf,
        kind: ChangeKind,
        path: PathBuf,
    },
    Error {
        root: PathBuf,
        /// True when the OS ran out of watch descriptors or file handles.
        exhausted: bool,
        message: String,
    },
}

pub type RawEventSink = Sender<RawEvent>;

/// Why a backend couldn't start or extend a watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    ResourceExhausted(String),
    Other(String),
}

impl BackendError {
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Self::ResourceExhausted(_))
    }

    /// Classifies a `notify` error.
    ///
    /// inotify reports a full watch table as ENOSPC, and running out of
    /// descriptors surfaces as EMFILE or ENFILE.
    pub fn from_notify(err: &notify::Error) -> Self {
        match &err.kind {
            notify::ErrorKind::MaxFilesWatch => Self::ResourceExhausted(err.to_string()),
            notify::ErrorKind::Io(io) if matches!(io.raw_os_error(), Some(23 | 24 | 28)) => {
                Self::ResourceExhausted(err.to_string())
            }
            _ => Self::Other(err.to_string()),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceExhausted(msg) => write!(f, "resource exhausted: {}", msg),
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

/// What to watch and how.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    pub root: PathBuf,
    pub plan: WatchPlan,
    pub rules: IgnoreRules,
}

/// A live watch. Dropping it stops the watch.
pub trait ActiveWatch: Send {
    /// Starts observing a directory that appeared after the watch began.
    ///
    /// Only meaningful for depth-limited plans; recursive watches pick up
    /// new directories on their own.
    fn add_directory(&mut self, path: &Path) -> Result<(), BackendError>;

    /// Number of OS-level registrations held.
    fn registrations(&self) -> usize;
}

/// Source of live watches.
pub trait WatchBackend: Send {
    fn watch(
        &mut self,
        target: &WatchTarget,
        sink: RawEventSink,
    ) -> Result<Box<dyn ActiveWatch>, BackendError>;
}

/// Backend built on the `notify` crate.
#[derive(Debug, Default)]
pub struct NotifyBackend;

impl NotifyBackend {
    pub fn new() -> Self {
        Self
    }
}

fn map_event_kind(kind: &EventKind, path: &Path) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Add),
        // Renames arrive as one event per side; whichever side still exists
        // is the new name.
        EventKind::Modify(ModifyKind::Name(_)) => {
            if path.exists() {
                Some(ChangeKind::Add)
            } else {
                Some(ChangeKind::Remove)
            }
        }
        EventKind::Modify(_) => Some(ChangeKind::Modify),
        EventKind::Remove(_) => Some(ChangeKind::Remove),
        _ => None,
    }
}

fn event_handler(
    root: PathBuf,
    sink: RawEventSink,
) -> impl FnMut(notify::Result<Event>) + Send + 'static {
    move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for path in event.paths {
                let Some(kind) = map_event_kind(&event.kind, &path) else {
                    continue;
                };
                let raw = RawEvent::Change {
                    root: root.clone(),
                    kind,
                    path,
                };
                if sink.send(raw).is_err() {
                    debug!("Watch service gone, dropping event");
                    return;
                }
            }
        }
        Err(e) => {
            let classified = BackendError::from_notify(&e);
            let _ = sink.send(RawEvent::Error {
                root: root.clone(),
                exhausted: classified.is_exhaustion(),
                message: classified.to_string(),
            });
        }
    }
}

struct NotifyWatch {
    watcher: Box<dyn Watcher + Send>,
    registrations: usize,
}

impl NotifyWatch {
    fn register(&mut self, path: &Path, mode: RecursiveMode) -> Result<(), BackendError> {
        self.watcher
            .watch(path, mode)
            .map_err(|e| BackendError::from_notify(&e))?;
        self.registrations += 1;
        Ok(())
    }
}

impl ActiveWatch for NotifyWatch {
    fn add_directory(&mut self, path: &Path) -> Result<(), BackendError> {
        self.register(path, RecursiveMode::NonRecursive)
    }

    fn registrations(&self) -> usize {
        self.registrations
    }
}

impl WatchBackend for NotifyBackend {
    fn watch(
        &mut self,
        target: &WatchTarget,
        sink: RawEventSink,
    ) -> Result<Box<dyn ActiveWatch>, BackendError> {
        let handler = event_handler(target.root.clone(), sink);

        let watcher: Box<dyn Watcher + Send> = match target.plan.mode {
            WatchMode::Native => Box::new(
                notify::recommended_watcher(handler).map_err(|e| BackendError::from_notify(&e))?,
            ),
            WatchMode::Polling { interval } => {
                let config = Config::default()
                    .with_poll_interval(interval)
                    .with_compare_contents(false);
                Box::new(
                    PollWatcher::new(handler, config).map_err(|e| BackendError::from_notify(&e))?,
                )
            }
        };

        let mut watch = NotifyWatch {
            watcher,
            registrations: 0,
        };

        match target.plan.depth {
            None => watch.register(&target.root, RecursiveMode::Recursive)?,
            Some(depth) => {
                // One non-recursive registration per directory keeps ignored
                // subtrees from ever costing a descriptor.
                let rules = &target.rules;
                let dirs = WalkDir::new(&target.root)
                    .follow_links(false)
                    .max_depth(depth)
                    .into_iter()
                    .filter_entry(|e| e.file_type().is_dir() && !rules.is_ignored(e.path(), true));

                for entry in dirs {
                    match entry {
                        Ok(entry) => watch.register(entry.path(), RecursiveMode::NonRecursive)?,
                        Err(e) => warn!("Skipping unreadable directory: {}", e),
                    }
                }
            }
        }

        debug!(
            "Watching {} with {} registrations ({:?})",
            target.root.display(),
            watch.registrations,
            target.plan.mode
        );
        Ok(Box::new(watch))
    }
}

#[derive(Default)]
struct MemoryState {
    failures: VecDeque<BackendError>,
    calls: Vec<(PathBuf, WatchPlan)>,
    sinks: HashMap<PathBuf, RawEventSink>,
    live: HashSet<PathBuf>,
    added_directories: Vec<PathBuf>,
}

/// Scripted in-process backend.
///
/// Every watch succeeds unless a failure was queued with
/// [`MemoryBackend::fail_next`]. Events are injected with
/// [`MemoryBackend::emit`]. Clones share state, so a test can keep one
/// handle while the service owns another.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next watch call fail with `error`.
    pub fn fail_next(&self, error: BackendError) {
        self.state.lock().failures.push_back(error);
    }

    /// Queues `count` resource-exhaustion failures.
    pub fn exhaust_next(&self, count: usize) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state
                .failures
                .push_back(BackendError::ResourceExhausted("too many open files".into()));
        }
    }

    /// Every watch call so far, failed ones included.
    pub fn calls(&self) -> Vec<(PathBuf, WatchPlan)> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Roots with a watch that hasn't been dropped.
    pub fn is_live(&self, root: &Path) -> bool {
        self.state.lock().live.contains(root)
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn added_directories(&self) -> Vec<PathBuf> {
        self.state.lock().added_directories.clone()
    }

    /// Injects a change event for a live root. Returns false if the root
    /// has no live watch.
    pub fn emit(&self, root: &Path, kind: ChangeKind, path: impl Into<PathBuf>) -> bool {
        let state = self.state.lock();
        if !state.live.contains(root) {
            return false;
        }
        match state.sinks.get(root) {
            Some(sink) => sink
                .send(RawEvent::Change {
                    root: root.to_path_buf(),
                    kind,
                    path: path.into(),
                })
                .is_ok(),
            None => false,
        }
    }

    /// Injects an asynchronous backend error for a live root.
    pub fn emit_error(&self, root: &Path, exhausted: bool) -> bool {
        let state = self.state.lock();
        match state.sinks.get(root) {
            Some(sink) if state.live.contains(root) => sink
                .send(RawEvent::Error {
                    root: root.to_path_buf(),
                    exhausted,
                    message: "injected".into(),
                })
                .is_ok(),
            _ => false,
        }
    }
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryBackend")
            .field("calls", &state.calls.len())
            .field("live", &state.live.len())
            .finish()
    }
}

struct MemoryWatch {
    root: PathBuf,
    state: Arc<Mutex<MemoryState>>,
    registrations: usize,
}

impl ActiveWatch for MemoryWatch {
    fn add_directory(&mut self, path: &Path) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        state.added_directories.push(path.to_path_buf());
        self.registrations += 1;
        Ok(())
    }

    fn registrations(&self) -> usize {
        self.registrations
    }
}

impl Drop for MemoryWatch {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.live.remove(&self.root);
        state.sinks.remove(&self.root);
    }
}

impl WatchBackend for MemoryBackend {
    fn watch(
        &mut self,
        target: &WatchTarget,
        sink: RawEventSink,
    ) -> Result<Box<dyn ActiveWatch>, BackendError> {
        let mut state = self.state.lock();
        state.calls.push((target.root.clone(), target.plan));
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        state.live.insert(target.root.clone());
        state.sinks.insert(target.root.clone(), sink);

        Ok(Box::new(MemoryWatch {
            root: target.root.clone(),
            state: Arc::clone(&self.state),
            registrations: 1,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::StrategyPreset;
    use std::fs;
    use std::sync::mpsc::channel;
    use tempfile::tempdir;

    #[test]
    fn test_exhaustion_classification() {
        let max = notify::Error::new(notify::ErrorKind::MaxFilesWatch);
        assert!(BackendError::from_notify(&max).is_exhaustion());

        let emfile = notify::Error::io(std::io::Error::from_raw_os_error(24));
        assert!(BackendError::from_notify(&emfile).is_exhaustion());

        let missing = notify::Error::path_not_found();
        assert!(!BackendError::from_notify(&missing).is_exhaustion());
    }

    #[test]
    fn test_depth_limited_watch_skips_ignored_dirs() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg/lib")).unwrap();

        let target = WatchTarget {
            root: dir.path().to_path_buf(),
            plan: WatchPlan {
                mode: WatchMode::Polling {
                    interval: std::time::Duration::from_secs(60),
                },
                depth: Some(3),
            },
            rules: IgnoreRules::with_defaults(dir.path()).unwrap(),
        };
        let (tx, _rx) = channel();
        let watch = NotifyBackend::new().watch(&target, tx).unwrap();

        // root, src, src/nested
        assert_eq!(watch.registrations(), 3);
    }

    #[test]
    fn test_memory_backend_releases_on_drop() {
        let mut backend = MemoryBackend::new();
        let probe = backend.clone();
        let root = PathBuf::from("/work");
        let target = WatchTarget {
            root: root.clone(),
            plan: StrategyPreset::Aggressive.plan().unwrap(),
            rules: IgnoreRules::with_defaults(&root).unwrap(),
        };

        let (tx, rx) = channel();
        let watch = backend.watch(&target, tx).unwrap();
        assert!(probe.emit(&root, ChangeKind::Add, "/work/a.rs"));
        assert_eq!(rx.try_iter().count(), 1);

        drop(watch);
        assert!(!probe.is_live(&root));
        assert!(!probe.emit(&root, ChangeKind::Add, "/work/b.rs"));
    }

    #[test]
    fn test_memory_backend_scripted_failure() {
        let mut backend = MemoryBackend::new();
        backend.exhaust_next(1);
        let root = PathBuf::from("/work");
        let target = WatchTarget {
            root: root.clone(),
            plan: WatchPlan::retry(),
            rules: IgnoreRules::with_defaults(&root).unwrap(),
        };

        let (tx, _rx) = channel();
        let err = backend.watch(&target, tx.clone()).err().unwrap();
        assert!(err.is_exhaustion());
        assert!(backend.watch(&target, tx).is_ok());
        assert_eq!(backend.call_count(), 2);
    }
}
