//! Reactive trigger wiring.
//!
//! Decides *when* a read executes or a submit resubmits, decoupled from the
//! coordinator's request logic. Four trigger families exist: immediate
//! execution at setup, auto-execution on watched source changes, an
//! edge-triggered gate transition, and external focus/visibility signals.
//! Every family is gated by the call's execute-when predicate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::debug;

use crate::reactive::{Reactive, SourceWatch, WatchTask, spawn_watch};

/// A coordinator operation the trigger layer can fire.
pub(crate) trait TriggerRunner: Send + Sync + 'static {
    /// Run one execution; failures are recorded in store state, not raised.
    fn fire(self: Arc<Self>) -> BoxFuture<'static, ()>;

    /// Evaluate the execute-when gate against current inputs.
    fn gate(&self) -> bool;
}

/// Everything the trigger layer needs to wire one handle.
pub(crate) struct TriggerSpec {
    pub immediate: bool,
    pub auto_execute: bool,
    pub debounce: Duration,
    /// Parameter/payload version sources, ignore marks attached.
    pub watch_sources: Vec<SourceWatch>,
    /// The gate's own signal, when it is a reactive boolean.
    pub gate_signal: Option<Reactive<bool>>,
    pub focus: Option<Reactive<bool>>,
    pub visibility: Option<Reactive<bool>>,
}

/// The spawned watcher set behind one handle; `stop` is idempotent.
pub(crate) struct TriggerSet {
    watchers: Vec<WatchTask>,
}

impl TriggerSet {
    pub fn stop(&self) {
        for watcher in &self.watchers {
            watcher.stop();
        }
    }
}

pub(crate) fn init_triggers(runner: Arc<dyn TriggerRunner>, spec: TriggerSpec) -> TriggerSet {
    let mut watchers = Vec::new();
    let gate_now = runner.gate();

    if spec.auto_execute {
        // continuous sync: any change to the watched inputs re-fires
        let mut sources = spec.watch_sources;
        if let Some(signal) = &spec.gate_signal {
            sources.push(SourceWatch::new(signal.subscribe()));
        }
        if !sources.is_empty() {
            let fire = Arc::clone(&runner);
            watchers.push(spawn_watch(sources, spec.debounce, move || {
                let fire = Arc::clone(&fire);
                async move {
                    if fire.gate() {
                        Arc::clone(&fire).fire().await;
                    }
                }
                .boxed()
            }));
        }
    } else {
        // conditional one-shot: only a false→true gate transition re-fires
        let mut sources = spec.watch_sources;
        if let Some(signal) = &spec.gate_signal {
            sources = vec![SourceWatch::new(signal.subscribe())];
        }
        if !sources.is_empty() {
            let fire = Arc::clone(&runner);
            let last = Arc::new(AtomicBool::new(gate_now));
            watchers.push(spawn_watch(sources, spec.debounce, move || {
                let fire = Arc::clone(&fire);
                let last = Arc::clone(&last);
                async move {
                    let now = fire.gate();
                    let before = last.swap(now, Ordering::AcqRel);
                    if now && !before {
                        Arc::clone(&fire).fire().await;
                    }
                }
                .boxed()
            }));
        }
    }

    for signal in [&spec.focus, &spec.visibility].into_iter().flatten() {
        let fire = Arc::clone(&runner);
        let source = signal.clone();
        watchers.push(spawn_watch(
            vec![SourceWatch::new(signal.subscribe())],
            Duration::ZERO,
            move || {
                let fire = Arc::clone(&fire);
                let source = source.clone();
                async move {
                    if source.get() && fire.gate() {
                        Arc::clone(&fire).fire().await;
                    }
                }
                .boxed()
            },
        ));
    }

    if spec.immediate {
        if gate_now {
            tokio::spawn(Arc::clone(&runner).fire());
        } else {
            debug!("immediate execution skipped: gate is closed");
        }
    }

    TriggerSet { watchers }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct CountingRunner {
        fired: AtomicUsize,
        gate: Reactive<bool>,
    }

    impl TriggerRunner for CountingRunner {
        fn fire(self: Arc<Self>) -> BoxFuture<'static, ()> {
            async move {
                self.fired.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        }

        fn gate(&self) -> bool {
            self.gate.get()
        }
    }

    fn runner(open: bool) -> Arc<CountingRunner> {
        Arc::new(CountingRunner {
            fired: AtomicUsize::new(0),
            gate: Reactive::new(open),
        })
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn immediate_fires_once_when_gate_is_open() {
        let runner = runner(true);
        let _set = init_triggers(
            runner.clone(),
            TriggerSpec {
                immediate: true,
                auto_execute: false,
                debounce: Duration::ZERO,
                watch_sources: Vec::new(),
                gate_signal: Some(runner.gate.clone()),
                focus: None,
                visibility: None,
            },
        );

        settle().await;
        assert_eq!(runner.fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gate_transition_fires_edge_triggered() {
        let runner = runner(false);
        let _set = init_triggers(
            runner.clone(),
            TriggerSpec {
                immediate: true,
                auto_execute: false,
                debounce: Duration::ZERO,
                watch_sources: Vec::new(),
                gate_signal: Some(runner.gate.clone()),
                focus: None,
                visibility: None,
            },
        );

        settle().await;
        assert_eq!(runner.fired.load(Ordering::SeqCst), 0);

        runner.gate.set(true);
        settle().await;
        assert_eq!(runner.fired.load(Ordering::SeqCst), 1);

        // true→true is not an edge
        runner.gate.set(true);
        settle().await;
        assert_eq!(runner.fired.load(Ordering::SeqCst), 1);

        runner.gate.set(false);
        settle().await;
        runner.gate.set(true);
        settle().await;
        assert_eq!(runner.fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn closed_gate_blocks_focus_triggers() {
        let runner = runner(false);
        let focus = Reactive::new(false);
        let _set = init_triggers(
            runner.clone(),
            TriggerSpec {
                immediate: false,
                auto_execute: false,
                debounce: Duration::ZERO,
                watch_sources: Vec::new(),
                gate_signal: None,
                focus: Some(focus.clone()),
                visibility: None,
            },
        );

        focus.set(true);
        settle().await;
        assert_eq!(runner.fired.load(Ordering::SeqCst), 0);

        runner.gate.set(true);
        focus.set(false);
        settle().await;
        focus.set(true);
        settle().await;
        assert_eq!(runner.fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_tears_down_every_trigger() {
        let runner = runner(true);
        let set = init_triggers(
            runner.clone(),
            TriggerSpec {
                immediate: false,
                auto_execute: false,
                debounce: Duration::ZERO,
                watch_sources: Vec::new(),
                gate_signal: Some(runner.gate.clone()),
                focus: None,
                visibility: None,
            },
        );

        set.stop();
        set.stop();
        runner.gate.set(false);
        settle().await;
        runner.gate.set(true);
        settle().await;
        assert_eq!(runner.fired.load(Ordering::SeqCst), 0);
    }
}
