//! Remove coordination.
//!
//! Removal requires the key property in its parameters before any repository
//! call happens; the value may be a single key or an array of keys. On
//! success every referenced key is deleted from the entity table.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::call::{CallState, RemoveOutcome};
use crate::entry::{Status, pending_pair};
use crate::error::StoreError;
use crate::keys::{Action, EntityKey, cache_key};
use crate::params::{ParamMap, merge_params};
use crate::reactive::Reactive;
use crate::repository::{Repository, RequestOptions};
use crate::state::StoreState;
use crate::store::StoreDefaults;

pub(crate) struct RemoveContext<T> {
    pub state: Arc<StoreState<T>>,
    pub repository: Arc<dyn Repository<T>>,
    pub defaults: Arc<StoreDefaults>,
    pub query_name: String,
    pub call: Arc<CallState>,
    pub params_value: ParamMap,
    pub params_reactive: Option<Reactive<ParamMap>>,
    pub repository_options: ParamMap,
}

impl<T> RemoveContext<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    fn current_params(&self) -> ParamMap {
        match &self.params_reactive {
            Some(reactive) => reactive.get(),
            None => self.params_value.clone(),
        }
    }
}

/// Keys referenced by the parameter value: a single scalar or an array.
fn referenced_keys(value: &Value) -> Vec<EntityKey> {
    match value {
        Value::Array(values) => values.iter().filter_map(EntityKey::from_value).collect(),
        scalar => EntityKey::from_value(scalar).into_iter().collect(),
    }
}

pub(crate) async fn execute<T>(
    ctx: Arc<RemoveContext<T>>,
    params_override: Option<ParamMap>,
) -> RemoveOutcome
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    let state = &ctx.state;
    state.touch();
    let generation = ctx.call.next_generation();

    let params = merge_params(
        &ctx.defaults.default_parameters,
        params_override.unwrap_or_else(|| ctx.current_params()),
    );

    let key_property = &ctx.defaults.key_property;
    let Some(target) = params.get(key_property).cloned() else {
        let error = StoreError::missing_remove_key(key_property);
        warn!(query = %ctx.query_name, %error, "remove rejected");
        ctx.call.apply(generation, Status::Error, Some(error.clone()));
        return RemoveOutcome {
            status: Status::Error,
            aborted: false,
            error: Some(error),
        };
    };

    let key = cache_key(Action::Remove, false, &params, &ctx.defaults.hash);

    let superseded = state.superseded_aborts(&ctx.query_name, &key);
    for handle in superseded {
        handle.abort(Some("superseded"));
    }

    ctx.call.apply(generation, Status::Loading, None);

    let request = ctx.repository.remove(
        params.clone(),
        RequestOptions {
            key: Some(key.clone()),
            extra: ctx.repository_options.clone(),
        },
    );
    let (done, pending) = pending_pair();
    let sequence = state.begin_request(
        &key,
        Action::Remove,
        false,
        params,
        request.abort.clone(),
        pending,
    );
    state.attach(&ctx.query_name, &key, false);

    let completion = request.response.await;

    let (status, aborted, error) = match completion {
        Err(source) => {
            let error = StoreError::transport("remove", source);
            warn!(query = %ctx.query_name, key = %key, %error, "remove failed");
            state.apply_error(&key, sequence, error.clone());
            ctx.call.apply(generation, Status::Error, Some(error.clone()));
            (Status::Error, false, Some(error))
        }
        Ok(response) if response.aborted => {
            state.apply_aborted(&key, sequence);
            ctx.call.apply(generation, Status::Idle, None);
            (Status::Idle, true, None)
        }
        Ok(_) => {
            let keys = referenced_keys(&target);
            debug!(query = %ctx.query_name, removed = keys.len(), "entities removed");
            state.remove_items(&keys);
            state.apply_success(&key, sequence, Vec::new(), None, key_property);
            ctx.call.apply(generation, Status::Success, None);
            (Status::Success, false, None)
        }
    };
    let _ = done.send(());

    RemoveOutcome {
        status,
        aborted,
        error,
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Live view over a remove operation: the status subset plus `execute`.
pub struct RemoveHandle<T> {
    pub(crate) ctx: Arc<RemoveContext<T>>,
}

impl<T> RemoveHandle<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
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

    pub async fn execute(&self) -> RemoveOutcome {
        execute(Arc::clone(&self.ctx), None).await
    }

    pub async fn execute_with(&self, params: ParamMap) -> RemoveOutcome {
        execute(Arc::clone(&self.ctx), Some(params)).await
    }

    pub async fn changed(&self) {
        let mut status = self.ctx.call.subscribe();
        let _ = status.changed().await;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn referenced_keys_accept_scalars_and_arrays() {
        assert_eq!(
            referenced_keys(&json!("abc")),
            vec![EntityKey::from("abc")]
        );
        assert_eq!(
            referenced_keys(&json!(["a", "b"])),
            vec![EntityKey::from("a"), EntityKey::from("b")]
        );
        assert!(referenced_keys(&json!(null)).is_empty());
    }
}
