//! Submit coordination.
//!
//! Creates or updates entities. Unless the caller overrides it, the action
//! is inferred from the payload: every record keyed means update, none keyed
//! means create, and a mixed batch is a configuration error. On success the
//! server's canonical response is written into the entity table and, when the
//! payload is a bound reactive value, back into that binding without waking
//! the auto-submit watcher.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::call::{CallState, ExecuteOutcome};
use crate::config::SubmitExecuteWhen;
use crate::entry::{Status, pending_pair};
use crate::error::StoreError;
use crate::keys::{Action, cache_key, record_key, record_key_value};
use crate::params::{ParamMap, merge_params};
use crate::reactive::{IgnoreUpdates, Reactive};
use crate::repository::{PendingRequest, ReadResponse, Repository, RequestOptions};
use crate::state::StoreState;
use crate::store::StoreDefaults;
use crate::trigger::{TriggerRunner, TriggerSet};

pub(crate) struct SubmitContext<T> {
    pub state: Arc<StoreState<T>>,
    pub repository: Arc<dyn Repository<T>>,
    pub defaults: Arc<StoreDefaults>,
    pub query_name: String,
    pub call: Arc<CallState>,
    pub payload_value: Vec<T>,
    pub payload_reactive: Option<Reactive<Option<T>>>,
    pub params_value: ParamMap,
    pub params_reactive: Option<Reactive<ParamMap>>,
    pub execute_when: SubmitExecuteWhen<T>,
    pub action_override: Option<Action>,
    pub repository_options: ParamMap,
    /// Marks write-backs of server responses so they do not resubmit.
    pub ignore: IgnoreUpdates,
}

impl<T> SubmitContext<T>
where
    T: Clone + PartialEq + Serialize + Send + Sync + 'static,
{
    fn current_payload(&self) -> Vec<T> {
        match &self.payload_reactive {
            Some(reactive) => reactive.get().into_iter().collect(),
            None => self.payload_value.clone(),
        }
    }

    fn current_params(&self) -> ParamMap {
        match &self.params_reactive {
            Some(reactive) => reactive.get(),
            None => self.params_value.clone(),
        }
    }

    fn gate_allows(&self) -> bool {
        match &self.execute_when {
            SubmitExecuteWhen::Always => true,
            SubmitExecuteWhen::Signal(signal) => signal.get(),
            SubmitExecuteWhen::Predicate(check) => {
                check(&self.current_payload(), &self.current_params())
            }
        }
    }
}

impl<T> TriggerRunner for SubmitContext<T>
where
    T: Clone + PartialEq + Serialize + Send + Sync + 'static,
{
    fn fire(self: Arc<Self>) -> BoxFuture<'static, ()> {
        async move {
            let _ = execute(self, None, None).await;
        }
        .boxed()
    }

    fn gate(&self) -> bool {
        self.gate_allows()
    }
}

pub(crate) async fn execute<T>(
    ctx: Arc<SubmitContext<T>>,
    payload_override: Option<Vec<T>>,
    params_override: Option<ParamMap>,
) -> ExecuteOutcome<T>
where
    T: Clone + PartialEq + Serialize + Send + Sync + 'static,
{
    let state = &ctx.state;
    state.touch();
    let generation = ctx.call.next_generation();

    let payload = payload_override.unwrap_or_else(|| ctx.current_payload());
    if payload.is_empty() {
        debug!(query = %ctx.query_name, "submit skipped: empty payload");
        return outcome(&ctx, ctx.call.status(), false, ctx.call.error());
    }
    let mut params = merge_params(
        &ctx.defaults.default_parameters,
        params_override.unwrap_or_else(|| ctx.current_params()),
    );

    let key_property = &ctx.defaults.key_property;
    let key_values: Vec<Option<Value>> = payload
        .iter()
        .map(|record| record_key_value(record, key_property))
        .collect();

    let action = match ctx.action_override {
        Some(action) => action,
        None => {
            let keyed = key_values.iter().filter(|value| value.is_some()).count();
            if keyed == key_values.len() {
                Action::Update
            } else if keyed == 0 {
                Action::Create
            } else {
                let error = StoreError::ambiguous_batch(key_property);
                warn!(query = %ctx.query_name, %error, "submit rejected");
                ctx.call
                    .apply(generation, Status::Error, Some(error.clone()));
                return outcome(&ctx, Status::Error, false, Some(error));
            }
        }
    };

    // a lone keyed record addresses itself through the parameters
    if payload.len() == 1
        && !params.contains_key(key_property)
        && let Some(Some(value)) = key_values.first()
    {
        params.insert(key_property.clone(), value.clone());
    }

    let key = cache_key(action, false, &params, &ctx.defaults.hash);

    let superseded = state.superseded_aborts(&ctx.query_name, &key);
    for handle in superseded {
        handle.abort(Some("superseded"));
    }

    ctx.call.apply(generation, Status::Loading, None);

    let request_options = RequestOptions {
        key: Some(key.clone()),
        extra: ctx.repository_options.clone(),
    };
    let request: PendingRequest<ReadResponse<T>> = match action {
        Action::Create => ctx
            .repository
            .create(payload.clone(), params.clone(), request_options),
        _ => ctx
            .repository
            .update(payload.clone(), params.clone(), request_options),
    };
    let (done, pending) = pending_pair();
    let sequence = state.begin_request(
        &key,
        action,
        false,
        params,
        request.abort.clone(),
        pending,
    );
    state.attach(&ctx.query_name, &key, false);

    let completion = request.response.await;

    let (status, aborted, error) = match completion {
        Err(source) => {
            let error = StoreError::transport("submit", source);
            warn!(query = %ctx.query_name, key = %key, %error, "submit failed");
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
                let error = StoreError::empty_response("submit");
                state.apply_error(&key, sequence, error.clone());
                ctx.call.apply(generation, Status::Error, Some(error.clone()));
                (Status::Error, false, Some(error))
            }
            Some(data) => {
                let unkeyed = data
                    .iter()
                    .any(|record| record_key(record, key_property).is_none());
                if unkeyed {
                    let error = StoreError::missing_key_property("submit", key_property);
                    state.apply_error(&key, sequence, error.clone());
                    ctx.call.apply(generation, Status::Error, Some(error.clone()));
                    (Status::Error, false, Some(error))
                } else {
                    let canonical = data.first().cloned();
                    state.apply_success(&key, sequence, data, response.metadata, key_property);
                    if let Some(reactive) = &ctx.payload_reactive
                        && let Some(canonical) = canonical
                    {
                        // the server's record replaces the draft without
                        // waking the auto-submit watcher
                        ctx.ignore.run(|| reactive.set(Some(canonical)));
                    }
                    ctx.call.apply(generation, Status::Success, None);
                    (Status::Success, false, None)
                }
            }
        },
    };
    let _ = done.send(());

    outcome(&ctx, status, aborted, error)
}

/// Outcome of this execution: the status it concluded with over the query's
/// current aggregate data.
fn outcome<T>(
    ctx: &SubmitContext<T>,
    status: Status,
    aborted: bool,
    error: Option<StoreError>,
) -> ExecuteOutcome<T>
where
    T: Clone + PartialEq + Serialize + Send + Sync + 'static,
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

/// Live view over a submit operation.
pub struct SubmitHandle<T> {
    pub(crate) ctx: Arc<SubmitContext<T>>,
    pub(crate) triggers: TriggerSet,
    pub(crate) keep_alive: bool,
}

impl<T> SubmitHandle<T>
where
    T: Clone + PartialEq + Serialize + Send + Sync + 'static,
{
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

    pub fn error(&self) -> Option<StoreError> {
        self.ctx.call.error()
    }

    pub fn errors(&self) -> Vec<StoreError> {
        self.query().map(|snapshot| snapshot.errors).unwrap_or_default()
    }

    pub fn data(&self) -> Vec<T> {
        self.query().map(|snapshot| snapshot.data).unwrap_or_default()
    }

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

    /// Resubmit the currently bound payload and parameters.
    pub async fn execute(&self) -> ExecuteOutcome<T> {
        execute(Arc::clone(&self.ctx), None, None).await
    }

    /// Resubmit an explicit payload and/or parameters.
    pub async fn execute_with(
        &self,
        payload: Option<Vec<T>>,
        params: Option<ParamMap>,
    ) -> ExecuteOutcome<T> {
        execute(Arc::clone(&self.ctx), payload, params).await
    }

    pub fn stop(&self) {
        self.triggers.stop();
    }

    /// Run a programmatic payload write without re-triggering auto-submit.
    pub fn ignore_updates(&self, write: impl FnOnce()) {
        self.ctx.ignore.run(write);
    }

    pub fn cleanup(&self) {
        if self.keep_alive {
            return;
        }
        self.stop();
        self.ctx.state.disable_query(&self.ctx.query_name);
    }

    pub async fn changed(&self) {
        let mut status = self.ctx.call.subscribe();
        let mut version = self.ctx.state.subscribe();
        tokio::select! {
            _ = status.changed() => {}
            _ = version.changed() => {}
        }
    }
}
