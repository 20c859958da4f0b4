//! The repository store.
//!
//! A `RepositoryStore` owns the shared state every query created under it
//! feeds: the entity table, the hash entry store, and the query registry. It
//! is constructed once per named store, hands out read/submit/remove handles,
//! and tears its collector down on `shutdown` (or drop).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::call::CallState;
use crate::config::{ExecuteWhen, ReadOptions, RemoveOptions, StoreConfig, SubmitOptions};
use crate::entry::QuerySnapshot;
use crate::gc::{GcTask, spawn_gc};
use crate::keys::{EntityKey, HashFn, default_hash_function};
use crate::params::{ParamMap, ParamsInput};
use crate::reactive::{IgnoreUpdates, Reactive, SourceWatch};
use crate::read::{ReadContext, ReadHandle};
use crate::remove::{RemoveContext, RemoveHandle};
use crate::repository::Repository;
use crate::state::StoreState;
use crate::submit::{SubmitContext, SubmitHandle};
use crate::trigger::{TriggerSpec, init_triggers};

/// Resolved store configuration shared by every handle.
pub(crate) struct StoreDefaults {
    pub key_property: String,
    pub default_persistence_ms: u64,
    pub default_debounce_ms: u64,
    pub default_parameters: ParamMap,
    pub hash: HashFn,
}

/// A submit payload argument: one record, a batch, or a bound reactive
/// record whose changes can drive auto-submission.
pub enum PayloadInput<T> {
    Value(Vec<T>),
    Reactive(Reactive<Option<T>>),
}

impl<T> From<T> for PayloadInput<T> {
    fn from(record: T) -> Self {
        Self::Value(vec![record])
    }
}

impl<T> From<Vec<T>> for PayloadInput<T> {
    fn from(records: Vec<T>) -> Self {
        Self::Value(records)
    }
}

impl<T> From<Reactive<Option<T>>> for PayloadInput<T> {
    fn from(record: Reactive<Option<T>>) -> Self {
        Self::Reactive(record)
    }
}

impl<T> From<&Reactive<Option<T>>> for PayloadInput<T> {
    fn from(record: &Reactive<Option<T>>) -> Self {
        Self::Reactive(record.clone())
    }
}

/// Client-side store over a resource repository.
pub struct RepositoryStore<T> {
    name: String,
    repository: Arc<dyn Repository<T>>,
    defaults: Arc<StoreDefaults>,
    state: Arc<StoreState<T>>,
    gc: Option<GcTask>,
    query_counter: AtomicU64,
}

impl<T> RepositoryStore<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    /// Create a named store over a repository.
    ///
    /// When called inside a tokio runtime and `clean_up_every_ms` is not
    /// zero, the idle garbage collector starts immediately.
    pub fn new(repository: Arc<dyn Repository<T>>, name: impl Into<String>, config: StoreConfig) -> Self {
        let name = name.into();
        let defaults = Arc::new(StoreDefaults {
            key_property: config.key_property,
            default_persistence_ms: config.default_persistence_ms,
            default_debounce_ms: config.default_debounce_ms,
            default_parameters: config.default_parameters,
            hash: config.hash_function.unwrap_or_else(default_hash_function),
        });
        let state = Arc::new(StoreState::new());

        let gc = if config.clean_up_every_ms == 0 {
            None
        } else if Handle::try_current().is_ok() {
            Some(spawn_gc(
                Arc::clone(&state),
                Duration::from_millis(config.clean_up_every_ms),
            ))
        } else {
            warn!(
                store = %name,
                "no async runtime at construction, idle collection disabled"
            );
            None
        };

        debug!(store = %name, "repository store created");
        Self {
            name,
            repository,
            defaults,
            state,
            gc,
            query_counter: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn next_query_name(&self) -> String {
        let n = self.query_counter.fetch_add(1, Ordering::AcqRel) + 1;
        format!("{}-query-{n}", self.name)
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Bind a read operation to a query and wire its triggers.
    pub fn read(&self, params: impl Into<ParamsInput>, options: ReadOptions) -> ReadHandle<T> {
        let (params_value, params_reactive) = match params.into() {
            ParamsInput::Value(map) => (map, None),
            ParamsInput::Reactive(reactive) => (ParamMap::new(), Some(reactive)),
        };
        let query_name = options
            .name
            .clone()
            .unwrap_or_else(|| self.next_query_name());

        let ctx = Arc::new(ReadContext {
            state: Arc::clone(&self.state),
            repository: Arc::clone(&self.repository),
            defaults: Arc::clone(&self.defaults),
            query_name,
            call: Arc::new(CallState::new()),
            params_value,
            params_reactive,
            group: options.group,
            directory: options.directory,
            persistence_ms: options
                .persistence_ms
                .unwrap_or(self.defaults.default_persistence_ms),
            execute_when: options.execute_when.clone(),
            reset_when: options.reset_when.clone(),
            repository_options: options.repository_options.clone(),
            last_params: std::sync::Mutex::new(None),
        });

        let mark = Arc::new(AtomicU64::new(0));
        let (ignore, watch_sources) = match &ctx.params_reactive {
            Some(reactive) => {
                let version_source = reactive.clone();
                (
                    IgnoreUpdates::new(
                        Arc::clone(&mark),
                        Arc::new(move || version_source.version()),
                    ),
                    vec![SourceWatch::ignorable(reactive.subscribe(), mark)],
                )
            }
            None => (IgnoreUpdates::disabled(), Vec::new()),
        };

        let gate_signal = match &options.execute_when {
            ExecuteWhen::Signal(signal) => Some(signal.clone()),
            _ => None,
        };
        let triggers = init_triggers(
            ctx.clone(),
            TriggerSpec {
                immediate: options.immediate,
                auto_execute: options.auto_execute,
                debounce: Duration::from_millis(
                    options
                        .auto_execute_debounce_ms
                        .unwrap_or(self.defaults.default_debounce_ms),
                ),
                watch_sources,
                gate_signal,
                focus: options.auto_execute_on_focus.clone(),
                visibility: options.auto_execute_on_visibility.clone(),
            },
        );

        ReadHandle {
            ctx,
            triggers,
            ignore,
            keep_alive: options.keep_alive,
        }
    }

    /// Bind a submit operation to a query and wire its triggers.
    ///
    /// The entity type must be comparable so the write-back of the server's
    /// canonical record only notifies watchers when it actually changed the
    /// bound payload.
    pub fn submit(
        &self,
        payload: impl Into<PayloadInput<T>>,
        params: impl Into<ParamsInput>,
        options: SubmitOptions<T>,
    ) -> SubmitHandle<T>
    where
        T: PartialEq,
    {
        let (payload_value, payload_reactive) = match payload.into() {
            PayloadInput::Value(records) => (records, None),
            PayloadInput::Reactive(reactive) => (Vec::new(), Some(reactive)),
        };
        let (params_value, params_reactive) = match params.into() {
            ParamsInput::Value(map) => (map, None),
            ParamsInput::Reactive(reactive) => (ParamMap::new(), Some(reactive)),
        };
        let query_name = options
            .name
            .clone()
            .unwrap_or_else(|| self.next_query_name());

        let mark = Arc::new(AtomicU64::new(0));
        let mut watch_sources = Vec::new();
        let ignore = match &payload_reactive {
            Some(reactive) => {
                let version_source = reactive.clone();
                watch_sources.push(SourceWatch::ignorable(
                    reactive.subscribe(),
                    Arc::clone(&mark),
                ));
                IgnoreUpdates::new(mark, Arc::new(move || version_source.version()))
            }
            None => IgnoreUpdates::disabled(),
        };
        if let Some(reactive) = &params_reactive {
            watch_sources.push(SourceWatch::new(reactive.subscribe()));
        }

        let ctx = Arc::new(SubmitContext {
            state: Arc::clone(&self.state),
            repository: Arc::clone(&self.repository),
            defaults: Arc::clone(&self.defaults),
            query_name,
            call: Arc::new(CallState::new()),
            payload_value,
            payload_reactive,
            params_value,
            params_reactive,
            execute_when: options.execute_when.clone(),
            action_override: options.action,
            repository_options: options.repository_options.clone(),
            ignore,
        });

        let gate_signal = match &options.execute_when {
            crate::config::SubmitExecuteWhen::Signal(signal) => Some(signal.clone()),
            _ => None,
        };
        let triggers = init_triggers(
            ctx.clone(),
            TriggerSpec {
                immediate: options.immediate,
                auto_execute: options.auto_execute,
                debounce: Duration::from_millis(
                    options
                        .auto_execute_debounce_ms
                        .unwrap_or(self.defaults.default_debounce_ms),
                ),
                watch_sources,
                gate_signal,
                focus: options.auto_execute_on_focus.clone(),
                visibility: options.auto_execute_on_visibility.clone(),
            },
        );

        SubmitHandle {
            ctx,
            triggers,
            keep_alive: options.keep_alive,
        }
    }

    /// Bind a remove operation; with `immediate` (the default) it executes
    /// right away.
    pub fn remove(
        &self,
        params: impl Into<ParamsInput>,
        options: RemoveOptions,
    ) -> RemoveHandle<T> {
        let (params_value, params_reactive) = match params.into() {
            ParamsInput::Value(map) => (map, None),
            ParamsInput::Reactive(reactive) => (ParamMap::new(), Some(reactive)),
        };
        let ctx = Arc::new(RemoveContext {
            state: Arc::clone(&self.state),
            repository: Arc::clone(&self.repository),
            defaults: Arc::clone(&self.defaults),
            query_name: options.name.unwrap_or_else(|| self.next_query_name()),
            call: Arc::new(CallState::new()),
            params_value,
            params_reactive,
            repository_options: options.repository_options,
        });

        if options.immediate {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                let _ = crate::remove::execute(ctx, None).await;
            });
        }

        RemoveHandle { ctx }
    }

    // ========================================================================
    // Derived views
    // ========================================================================

    /// Dereference one entity by key.
    pub fn get_item_by_key(&self, key: impl Into<EntityKey>) -> Option<T> {
        self.state.item(&key.into())
    }

    /// Dereference a key list, dropping absent keys and preserving order.
    pub fn get_items_by_keys<K: Into<EntityKey>>(&self, keys: impl IntoIterator<Item = K>) -> Vec<T> {
        let keys: Vec<EntityKey> = keys.into_iter().map(Into::into).collect();
        self.state.items(&keys)
    }

    /// Aggregated view over a named query.
    pub fn get_query_by_name(&self, name: &str) -> Option<QuerySnapshot<T>> {
        self.state.resolve(name)
    }

    /// Notified on every material state change; derived views resubscribe
    /// and recompute.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.state.subscribe()
    }

    // ========================================================================
    // Collection
    // ========================================================================

    /// Drop disabled queries, releasing their entry memberships.
    pub fn clear_queries(&self) -> usize {
        self.state.clear_queries()
    }

    /// Drop entries no query references any more.
    pub fn clean_hashes(&self) -> usize {
        self.state.clean_hashes()
    }

    /// Stop the idle collector; idempotent.
    pub fn shutdown(&self) {
        if let Some(gc) = &self.gc {
            gc.stop();
        }
    }
}

impl<T> Drop for RepositoryStore<T> {
    fn drop(&mut self) {
        if let Some(gc) = &self.gc {
            gc.stop();
        }
    }
}
