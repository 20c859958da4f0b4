//! Shared test fixtures: a scripted in-memory repository.
//!
//! Scripts are consumed in FIFO order, one per repository call. Gated
//! scripts stay pending until the test opens the gate, which is how loading
//! states and abort races are made observable.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use scorta::{
    AbortHandle, Action, ParamMap, PendingRequest, ReadResponse, RemoveResponse, Repository,
    RequestOptions,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub id: Option<String>,
    pub name: String,
}

impl Widget {
    pub fn keyed(id: &str, name: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            name: name.to_string(),
        }
    }

    pub fn unkeyed(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
        }
    }
}

pub fn params(value: Value) -> ParamMap {
    value.as_object().cloned().expect("object literal")
}

/// Install a fmt subscriber when debugging a failing test; honors RUST_LOG.
pub fn trace() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Wait until a condition holds, bailing out after a few seconds.
pub async fn wait_until(check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Give spawned triggers and watchers a chance to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

pub enum Script {
    Respond {
        data: Option<Vec<Widget>>,
        metadata: Option<ParamMap>,
    },
    Gated {
        release: oneshot::Receiver<()>,
        data: Vec<Widget>,
    },
    Aborted,
    Fail(String),
}

/// Opens a gated script's response.
pub struct Gate(oneshot::Sender<()>);

impl Gate {
    pub fn open(self) {
        let _ = self.0.send(());
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub action: Action,
    pub params: ParamMap,
    pub payload: Vec<Widget>,
}

#[derive(Default)]
pub struct MockRepository {
    scripts: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_data(&self, data: Vec<Widget>) {
        self.push_script(Script::Respond {
            data: Some(data),
            metadata: None,
        });
    }

    pub fn push_response(&self, data: Option<Vec<Widget>>, metadata: Option<ParamMap>) {
        self.push_script(Script::Respond { data, metadata });
    }

    pub fn push_gated(&self, data: Vec<Widget>) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.push_script(Script::Gated { release: rx, data });
        Gate(tx)
    }

    pub fn push_aborted(&self) {
        self.push_script(Script::Aborted);
    }

    pub fn push_failure(&self, message: &str) {
        self.push_script(Script::Fail(message.to_string()));
    }

    fn push_script(&self, script: Script) {
        self.scripts.lock().expect("scripts lock").push_back(script);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, action: Action, params: &ParamMap, payload: Vec<Widget>) -> Script {
        self.calls.lock().expect("calls lock").push(RecordedCall {
            action,
            params: params.clone(),
            payload,
        });
        self.scripts
            .lock()
            .expect("scripts lock")
            .pop_front()
            .expect("unexpected repository call: no script queued")
    }

    fn respond(&self, action: Action, params: &ParamMap, payload: Vec<Widget>) -> PendingRequest<ReadResponse<Widget>> {
        match self.record(action, params, payload) {
            Script::Respond { data, metadata } => PendingRequest {
                response: async move {
                    Ok(ReadResponse {
                        data,
                        metadata,
                        aborted: false,
                    })
                }
                .boxed(),
                abort: None,
            },
            Script::Aborted => PendingRequest {
                response: async move { Ok(ReadResponse::aborted()) }.boxed(),
                abort: None,
            },
            Script::Gated { release, data } => {
                let (abort_tx, abort_rx) = oneshot::channel::<()>();
                let abort = AbortHandle::new(move |_reason| {
                    let _ = abort_tx.send(());
                });
                PendingRequest {
                    response: async move {
                        tokio::select! {
                            _ = release => Ok(ReadResponse::of(data)),
                            _ = abort_rx => Ok(ReadResponse::aborted()),
                        }
                    }
                    .boxed(),
                    abort: Some(abort),
                }
            }
            Script::Fail(message) => PendingRequest {
                response: async move { Err(message.into()) }.boxed(),
                abort: None,
            },
        }
    }
}

impl Repository<Widget> for MockRepository {
    fn read(&self, params: ParamMap, _options: RequestOptions) -> PendingRequest<ReadResponse<Widget>> {
        self.respond(Action::Read, &params, Vec::new())
    }

    fn create(
        &self,
        payload: Vec<Widget>,
        params: ParamMap,
        _options: RequestOptions,
    ) -> PendingRequest<ReadResponse<Widget>> {
        self.respond(Action::Create, &params, payload)
    }

    fn update(
        &self,
        payload: Vec<Widget>,
        params: ParamMap,
        _options: RequestOptions,
    ) -> PendingRequest<ReadResponse<Widget>> {
        self.respond(Action::Update, &params, payload)
    }

    fn remove(
        &self,
        params: ParamMap,
        _options: RequestOptions,
    ) -> PendingRequest<RemoveResponse> {
        let request = self.respond(Action::Remove, &params, Vec::new());
        PendingRequest {
            response: async move {
                let response = request.response.await?;
                Ok(RemoveResponse {
                    aborted: response.aborted,
                })
            }
            .boxed(),
            abort: request.abort,
        }
    }
}
