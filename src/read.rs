//! Read coordination.
//!
//! Each execution resolves effective parameters, derives the cache key, and
//! decides between serving the cache, joining an in-flight request, or
//! issuing a new one. Issuing supersedes the query's previous in-flight
//! request; completions validate the response and propagate records into the
//! entity table. Failures are recorded in state and polled, never raised.

use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::counter;
use serde::Serialize;
use tracing::{debug, warn};

use crate::call::{CallState, ExecuteOptions, ExecuteOutcome};
use crate::config::{ExecuteWhen, ResetWhen};
use crate::entry::{PendingShare, Status, now_ms, pending_pair};
use crate::error::StoreError;
use crate::keys::{Action, cache_key, record_key};
use crate::lock::MutexExt;
use crate::params::{ParamMap, merge_params};
use crate::reactive::{IgnoreUpdates, Reactive};
use crate::repository::{Repository, RequestOptions};
use crate::state::StoreState;
use crate::store::StoreDefaults;
use crate::trigger::{TriggerRunner, TriggerSet};

const METRIC_READ_HIT: &str = "scorta_store_read_cache_hit_total";
const METRIC_READ_MISS: &str = "scorta_store_read_cache_miss_total";

pub(crate) struct ReadContext<T> {
    pub state: Arc<StoreState<T>>,
    pub repository: Arc<dyn Repository<T>>,
    pub defaults: Arc<StoreDefaults>,
    pub query_name: String,
    pub call: Arc<CallState>,
    pub params_value: ParamMap,
    pub params_reactive: Option<Reactive<ParamMap>>,
    pub group: bool,
    pub directory: bool,
    pub persistence_ms: u64,
    pub execute_when: ExecuteWhen,
    pub reset_when: Option<ResetWhen>,
    pub repository_options: ParamMap,
    /// Previous resolved parameters, for `reset_when` comparisons.
    pub last_params: Mutex<Option<ParamMap>>,
}

impl<T> ReadContext<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    fn current_params(&self) -> ParamMap {
        match &self.params_reactive {
            Some(reactive) => reactive.get(),
            None => self.params_value.clone(),
        }
    }

    fn gate_allows(&self) -> bool {
        match &self.execute_when {
            ExecuteWhen::Always => true,
            ExecuteWhen::Signal(signal) => signal.get(),
            ExecuteWhen::Predicate(check) => check(&self.current_params()),
        }
    }
}

impl<T> TriggerRunner for ReadContext<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    fn fire(self: Arc<Self>) -> BoxFuture<'static, ()> {
        async move {
            let _ = execute(self, ExecuteOptions::default()).await;
        }
        .boxed()
    }

    fn gate(&self) -> bool {
        self.gate_allows()
    }
}

/// Effective parameters for one execution, in precedence order: explicit
/// argument, current reactive value, the query's last recorded params, then
/// the parameters supplied at handle creation. The result is merged over the
/// store's default parameters.
fn resolve_params<T>(ctx: &ReadContext<T>, explicit: Option<ParamMap>) -> ParamMap
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    let base = if let Some(params) = explicit {
        params
    } else if let Some(reactive) = &ctx.params_reactive {
        reactive.get()
    } else if let Some(snapshot) = ctx.state.resolve(&ctx.query_name) {
        snapshot.params
    } else {
        ctx.params_value.clone()
    };
    merge_params(&ctx.defaults.default_parameters, base)
}

fn should_reset<T>(ctx: &ReadContext<T>, next: &ParamMap, previous: Option<&ParamMap>) -> bool
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    match &ctx.reset_when {
        None => false,
        Some(ResetWhen::Signal(signal)) => signal.get(),
        Some(ResetWhen::Predicate(check)) => check(next, previous),
    }
}

enum CacheDecision {
    Fresh,
    InFlight(PendingShare),
    Miss,
}

pub(crate) async fn execute<T>(
    ctx: Arc<ReadContext<T>>,
    options: ExecuteOptions,
) -> ExecuteOutcome<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    let state = &ctx.state;
    state.touch();
    let generation = ctx.call.next_generation();

    let effective = resolve_params(&ctx, options.params);

    let previous = ctx.last_params.lock_recovered("read.previous_params").clone();
    if should_reset(&ctx, &effective, previous.as_ref()) {
        debug!(query = %ctx.query_name, "discarding accumulated results before execution");
        state.reset_query(&ctx.query_name);
    }
    *ctx.last_params.lock_recovered("read.remember_params") = Some(effective.clone());

    let key = cache_key(Action::Read, ctx.directory, &effective, &ctx.defaults.hash);

    let now = now_ms();
    let decision = state
        .with_entry(&key, |entry| {
            if !entry.is_fresh(ctx.persistence_ms, now) {
                return CacheDecision::Miss;
            }
            match entry.status {
                Status::Loading => entry
                    .pending
                    .clone()
                    .map(CacheDecision::InFlight)
                    .unwrap_or(CacheDecision::Miss),
                Status::Success if !options.force => CacheDecision::Fresh,
                _ => CacheDecision::Miss,
            }
        })
        .unwrap_or(CacheDecision::Miss);

    match decision {
        CacheDecision::Fresh => {
            counter!(METRIC_READ_HIT).increment(1);
            debug!(query = %ctx.query_name, key = %key, "read served from cache");
            state.attach(&ctx.query_name, &key, ctx.group);
            ctx.call.apply(generation, Status::Success, None);
            return outcome(&ctx, Status::Success, false, None);
        }
        CacheDecision::InFlight(pending) => {
            counter!(METRIC_READ_HIT).increment(1);
            debug!(query = %ctx.query_name, key = %key, "read joined in-flight request");
            state.attach(&ctx.query_name, &key, ctx.group);
            ctx.call.apply(generation, Status::Loading, None);
            pending.await;
            let (status, error) = state
                .with_entry(&key, |entry| (entry.status, entry.error.clone()))
                .unwrap_or((Status::Idle, None));
            let aborted = status == Status::Idle;
            ctx.call.apply(generation, status, error.clone());
            return outcome(&ctx, status, aborted, error);
        }
        CacheDecision::Miss => {}
    }
    counter!(METRIC_READ_MISS).increment(1);

    if !ctx.group {
        let superseded = state.superseded_aborts(&ctx.query_name, &key);
        if !superseded.is_empty() {
            debug!(
                query = %ctx.query_name,
                count = superseded.len(),
                "aborting superseded in-flight requests"
            );
        }
        for handle in superseded {
            handle.abort(Some("superseded"));
        }
    }

    ctx.call.apply(generation, Status::Loading, None);

    let request = ctx.repository.read(
        effective.clone(),
        RequestOptions {
            key: Some(key.clone()),
            extra: ctx.repository_options.clone(),
        },
    );
    let (done, pending) = pending_pair();
    let sequence = state.begin_request(
        &key,
        Action::Read,
        ctx.directory,
        effective,
        request.abort.clone(),
        pending,
    );
    state.attach(&ctx.query_name, &key, ctx.group);

    let completion = request.response.await;

    let (status, aborted, error) = match completion {
        Err(source) => {
            let error = StoreError::transport("read", source);
            warn!(query = %ctx.query_name, key = %key, %error, "read failed");
            state.apply_error(&key, sequence, error.clone());
            ctx.call.apply(generation, Status::Error, Some(error.clone()));
            (Status::Error, false, Some(error))
        }
        Ok(response) if response.aborted => {
            state.apply_aborted(&key, sequence);
            ctx.call.apply(generation, Status::Idle, None);
            (Status::Idle, true, None)
        }
        Ok(response) => match response.data {
            None => {
                let error = StoreError::empty_response("read");
                state.apply_error(&key, sequence, error.clone());
                ctx.call.apply(generation, Status::Error, Some(error.clone()));
                (Status::Error, false, Some(error))
            }
            Some(data) => {
                let key_property = &ctx.defaults.key_property;
                let unkeyed = !ctx.directory
                    && !data.is_empty()
                    && data
                        .iter()
                        .any(|record| record_key(record, key_property).is_none());
                if unkeyed {
                    let error = StoreError::missing_key_property("read", key_property);
                    state.apply_error(&key, sequence, error.clone());
                    ctx.call.apply(generation, Status::Error, Some(error.clone()));
                    (Status::Error, false, Some(error))
                } else {
                    state.apply_success(&key, sequence, data, response.metadata, key_property);
                    ctx.call.apply(generation, Status::Success, None);
                    (Status::Success, false, None)
                }
            }
        },
    };
    let _ = done.send(());

    outcome(&ctx, status, aborted, error)
}

/// Outcome of this execution: the status it concluded with (a newer
/// execution may have moved the call on already) over the query's current
/// aggregate data.
fn outcome<T>(
    ctx: &ReadContext<T>,
    status: Status,
    aborted: bool,
    error: Option<StoreError>,
) -> ExecuteOutcome<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    let (data, metadata) = ctx
        .state
        .resolve(&ctx.query_name)
        .map(|snapshot| (snapshot.data, snapshot.metadata))
        .unwrap_or_default();
    ExecuteOutcome {
        status,
        aborted,
        error,
        data,
        metadata,
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Live view over a read operation.
///
/// State accessors recompute from shared store state on every call; `changed`
/// resolves when either the backing state or this call's lifecycle moves.
pub struct ReadHandle<T> {
    pub(crate) ctx: Arc<ReadContext<T>>,
    pub(crate) triggers: TriggerSet,
    pub(crate) ignore: IgnoreUpdates,
    pub(crate) keep_alive: bool,
}

impl<T> ReadHandle<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    /// Name of the query this handle feeds.
    pub fn query_name(&self) -> &str {
        &self.ctx.query_name
    }

    pub fn status(&self) -> Status {
        self.ctx.call.status()
    }

    pub fn is_loading(&self) -> bool {
        self.status().is_loading()
    }

    pub fn is_success(&self) -> bool {
        self.status().is_success()
    }

    pub fn is_error(&self) -> bool {
        self.status().is_error()
    }

    /// This call's own error, when its last execution failed.
    pub fn error(&self) -> Option<StoreError> {
        self.ctx.call.error()
    }

    /// Every member error of the backing query, first one primary.
    pub fn errors(&self) -> Vec<StoreError> {
        self.query().map(|snapshot| snapshot.errors).unwrap_or_default()
    }

    /// Aggregated records of the backing query.
    pub fn data(&self) -> Vec<T> {
        self.query().map(|snapshot| snapshot.data).unwrap_or_default()
    }

    /// First aggregated record.
    pub fn item(&self) -> Option<T> {
        self.query().and_then(|snapshot| snapshot.data.into_iter().next())
    }

    pub fn metadata(&self) -> ParamMap {
        self.query()
            .map(|snapshot| snapshot.metadata)
            .unwrap_or_default()
    }

    pub fn query(&self) -> Option<crate::entry::QuerySnapshot<T>> {
        self.ctx.state.resolve(&self.ctx.query_name)
    }

    /// Run one execution with default options.
    pub async fn execute(&self) -> ExecuteOutcome<T> {
        execute(Arc::clone(&self.ctx), ExecuteOptions::default()).await
    }

    /// Run one execution with explicit parameters or a forced refetch.
    pub async fn execute_with(&self, options: ExecuteOptions) -> ExecuteOutcome<T> {
        execute(Arc::clone(&self.ctx), options).await
    }

    /// Discard the query's accumulated members.
    pub fn reset(&self) {
        self.ctx.state.reset_query(&self.ctx.query_name);
    }

    /// Stop every reactive trigger; idempotent.
    pub fn stop(&self) {
        self.triggers.stop();
    }

    /// Run a programmatic parameter write without re-triggering
    /// auto-execution.
    pub fn ignore_updates(&self, write: impl FnOnce()) {
        self.ignore.run(write);
    }

    /// Teardown: stop triggers and disable the query so the next idle pass
    /// collects it. `keep_alive` handles skip this.
    pub fn cleanup(&self) {
        if self.keep_alive {
            return;
        }
        self.stop();
        self.ctx.state.disable_query(&self.ctx.query_name);
    }

    /// Resolves when the call's lifecycle or the backing store state moves.
    pub async fn changed(&self) {
        let mut status = self.ctx.call.subscribe();
        let mut version = self.ctx.state.subscribe();
        tokio::select! {
            _ = status.changed() => {}
            _ = version.changed() => {}
        }
    }
}
