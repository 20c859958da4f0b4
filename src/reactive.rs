//! Reactive value containers and change watchers.
//!
//! The store reacts to parameter and payload mutation through an explicit
//! observer layer: a `Reactive<T>` bumps a version counter when a write
//! changes its value and watcher tasks wake on version changes. Writes are
//! equality-gated, so re-assigning the current value is a no-op for
//! watchers. Debounce, edge detection, and the ignore-updates escape hatch
//! are small state machines layered on top of the version stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::future::{BoxFuture, select_all};
use tokio::sync::watch;
use tokio::time::sleep;

use crate::lock::RwLockExt;

/// A shared, observable value.
///
/// Writes that change the value notify every subscribed watcher; reads
/// clone the current value. Cloning the handle shares the same underlying
/// cell.
pub struct Reactive<T> {
    value: Arc<RwLock<T>>,
    version: Arc<watch::Sender<u64>>,
}

impl<T> Clone for Reactive<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            version: Arc::clone(&self.version),
        }
    }
}

impl<T: Clone + Send + Sync> Reactive<T> {
    pub fn new(value: T) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            value: Arc::new(RwLock::new(value)),
            version: Arc::new(version),
        }
    }

    pub fn get(&self) -> T {
        self.value.read_recovered("reactive.get").clone()
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump(&self) {
        self.version.send_modify(|version| *version += 1);
    }
}

impl<T: Clone + Send + Sync + PartialEq> Reactive<T> {
    /// Replace the value. Watchers are only notified when the new value
    /// differs from the current one.
    pub fn set(&self, value: T) {
        let changed = {
            let mut current = self.value.write_recovered("reactive.set");
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        };
        if changed {
            self.bump();
        }
    }

    /// Mutate the value in place. Watchers are only notified when the
    /// mutation changed it.
    pub fn update(&self, mutate: impl FnOnce(&mut T)) {
        let changed = {
            let mut current = self.value.write_recovered("reactive.update");
            let previous = current.clone();
            mutate(&mut current);
            *current != previous
        };
        if changed {
            self.bump();
        }
    }
}

// ============================================================================
// Ignore-updates escape hatch
// ============================================================================

/// Marks programmatic writes so watchers skip them.
///
/// `run` mutes the associated source for the duration of the closure and
/// leaves the mark at the closure's final version, so a write-back of a
/// server response does not re-trigger auto-execution while later organic
/// writes still do.
#[derive(Clone)]
pub struct IgnoreUpdates {
    mark: Arc<AtomicU64>,
    version: Arc<dyn Fn() -> u64 + Send + Sync>,
}

impl IgnoreUpdates {
    pub(crate) fn new(mark: Arc<AtomicU64>, version: Arc<dyn Fn() -> u64 + Send + Sync>) -> Self {
        Self { mark, version }
    }

    /// No watched source: the closure still runs, nothing is marked.
    pub(crate) fn disabled() -> Self {
        Self {
            mark: Arc::new(AtomicU64::new(0)),
            version: Arc::new(|| 0),
        }
    }

    pub fn run(&self, write: impl FnOnce()) {
        self.mark.store(u64::MAX, Ordering::Release);
        write();
        self.mark.store((self.version)(), Ordering::Release);
    }
}

// ============================================================================
// Watcher tasks
// ============================================================================

/// One watched version stream, with an optional ignore mark.
pub(crate) struct SourceWatch {
    rx: watch::Receiver<u64>,
    ignore_mark: Option<Arc<AtomicU64>>,
    last_seen: u64,
}

impl SourceWatch {
    pub fn new(rx: watch::Receiver<u64>) -> Self {
        let last_seen = *rx.borrow();
        Self {
            rx,
            ignore_mark: None,
            last_seen,
        }
    }

    pub fn ignorable(rx: watch::Receiver<u64>, mark: Arc<AtomicU64>) -> Self {
        let last_seen = *rx.borrow();
        Self {
            rx,
            ignore_mark: Some(mark),
            last_seen,
        }
    }
}

/// Handle over a spawned watcher; `stop` is idempotent.
pub(crate) struct WatchTask {
    stop: Arc<watch::Sender<bool>>,
}

impl WatchTask {
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

/// Spawn a watcher over a set of version sources.
///
/// The handler fires after a change survives debouncing and at least one
/// changed source is not muted by its ignore mark. Handler executions are
/// serialized within the watcher task.
pub(crate) fn spawn_watch<F>(
    mut sources: Vec<SourceWatch>,
    debounce: Duration,
    mut handler: F,
) -> WatchTask
where
    F: FnMut() -> BoxFuture<'static, ()> + Send + 'static,
{
    debug_assert!(!sources.is_empty(), "watcher needs at least one source");
    let (stop_tx, mut stop_rx) = watch::channel(false);

    tokio::spawn(async move {
        loop {
            {
                let changes: Vec<_> = sources
                    .iter_mut()
                    .map(|source| Box::pin(source.rx.changed()))
                    .collect();
                tokio::select! {
                    _ = stop_rx.changed() => return,
                    _ = select_all(changes) => {}
                }
            }

            if !debounce.is_zero() {
                // trailing debounce: keep absorbing changes until quiet
                loop {
                    let changes: Vec<_> = sources
                        .iter_mut()
                        .map(|source| Box::pin(source.rx.changed()))
                        .collect();
                    tokio::select! {
                        _ = stop_rx.changed() => return,
                        _ = sleep(debounce) => break,
                        _ = select_all(changes) => {}
                    }
                }
            }

            let mut significant = false;
            for source in sources.iter_mut() {
                let version = *source.rx.borrow_and_update();
                if version > source.last_seen {
                    let muted = source
                        .ignore_mark
                        .as_ref()
                        .is_some_and(|mark| version <= mark.load(Ordering::Acquire));
                    if !muted {
                        significant = true;
                    }
                    source.last_seen = version;
                }
            }

            if significant {
                handler().await;
            }
        }
    });

    WatchTask {
        stop: Arc::new(stop_tx),
    }
}
