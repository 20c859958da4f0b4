//! Idle-driven garbage collection.
//!
//! A background task watches the store's activity marker and, on the
//! busy→idle transition after the configured quiet window, runs one
//! collection pass: disabled queries first, then entries no query references
//! any more. The ordering matters: entries orphaned by the query sweep are
//! collected in the same pass.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::debug;

use crate::state::StoreState;

/// Handle over the collector task; `stop` is idempotent.
pub(crate) struct GcTask {
    stop: Arc<watch::Sender<bool>>,
}

impl GcTask {
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

pub(crate) fn spawn_gc<T>(state: Arc<StoreState<T>>, idle_after: Duration) -> GcTask
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    let (stop_tx, mut stop_rx) = watch::channel(false);

    tokio::spawn(async move {
        let mut ticker = interval(idle_after.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut was_idle = false;

        loop {
            tokio::select! {
                _ = stop_rx.changed() => return,
                _ = ticker.tick() => {}
            }

            let idle = state.idle_for() >= idle_after;
            if idle && !was_idle {
                let queries = state.clear_queries();
                let entries = state.clean_hashes();
                if queries > 0 || entries > 0 {
                    debug!(queries, entries, "idle collection pass reclaimed state");
                }
            }
            was_idle = idle;
        }
    });

    GcTask {
        stop: Arc::new(stop_tx),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::entry::pending_pair;
    use crate::keys::{Action, cache_key, default_hash_function};
    use crate::params::ParamMap;

    use super::*;

    #[derive(Debug, Clone, Serialize)]
    struct Row {
        id: String,
    }

    #[tokio::test(start_paused = true)]
    async fn idle_pass_collects_disabled_queries() {
        let state = Arc::new(StoreState::<Row>::new());
        let key = cache_key(
            Action::Read,
            false,
            &json!({ "id": "1" }).as_object().cloned().expect("object"),
            &default_hash_function(),
        );

        let (_tx, pending) = pending_pair();
        let seq = state.begin_request(&key, Action::Read, false, ParamMap::new(), None, pending);
        state.apply_success(&key, seq, vec![Row { id: "1".into() }], None, "id");
        state.attach("short-lived", &key, false);
        state.disable_query("short-lived");

        let task = spawn_gc(Arc::clone(&state), Duration::from_millis(100));

        // not yet idle long enough for the first tick's check
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(state.query_count(), 0);
        assert_eq!(state.entry_count(), 0);

        task.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn activity_defers_collection() {
        let state = Arc::new(StoreState::<Row>::new());
        state.attach(
            "busy",
            &cache_key(
                Action::Read,
                false,
                &ParamMap::new(),
                &default_hash_function(),
            ),
            false,
        );
        state.disable_query("busy");

        let task = spawn_gc(Arc::clone(&state), Duration::from_millis(100));

        // keep touching inside the quiet window
        for _ in 0..3 {
            state.touch();
            tokio::time::sleep(Duration::from_millis(60)).await;
            assert_eq!(state.query_count(), 1);
        }

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(state.query_count(), 0);

        task.stop();
    }
}
