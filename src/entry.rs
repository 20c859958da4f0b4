//! Cache entry and query data model.
//!
//! A `HashEntry` is the cached outcome and lifecycle state of one concrete
//! request; a `Query` is a named logical operation composed of one or more
//! entries. Directory entries hold response data inline; regular entries hold
//! only entity keys and dereference through the entity table, so payloads are
//! never duplicated across entries.

use std::collections::HashSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::oneshot;

use crate::error::StoreError;
use crate::keys::{Action, CacheKey, EntityKey};
use crate::params::ParamMap;
use crate::repository::AbortHandle;

/// Request lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

impl Status {
    pub fn is_loading(self) -> bool {
        self == Self::Loading
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    pub fn is_error(self) -> bool {
        self == Self::Error
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Success => "success",
            Self::Error => "error",
        })
    }
}

/// Wall-clock milliseconds, the basis of entry freshness.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Completion signal shared by every caller joined to one in-flight request.
pub(crate) type PendingShare = Shared<BoxFuture<'static, ()>>;

/// Create the completion signal for a request about to be issued.
///
/// Dropping the sender also completes waiters, so a panicking request task
/// cannot strand them.
pub(crate) fn pending_pair() -> (oneshot::Sender<()>, PendingShare) {
    let (tx, rx) = oneshot::channel::<()>();
    (tx, rx.map(|_| ()).boxed().shared())
}

/// Cached outcome and lifecycle of one (action, parameter set) request.
pub(crate) struct HashEntry<T> {
    pub action: Action,
    pub status: Status,
    pub directory: bool,
    /// Completion time of the last material change, in unix ms.
    pub timestamp: u64,
    pub params: ParamMap,
    pub metadata: ParamMap,
    /// Entity keys produced by the response; empty for directory entries.
    pub keys: Vec<EntityKey>,
    /// Inline response data; populated for directory entries only.
    pub data: Vec<T>,
    pub error: Option<StoreError>,
    pub abort: Option<AbortHandle>,
    pub pending: Option<PendingShare>,
    /// Bumped per issued request; completions with a stale sequence are
    /// ignored, so a superseded response can never clobber fresher state.
    pub request_seq: u64,
    /// Names of the queries currently referencing this entry.
    pub queries: HashSet<String>,
}

impl<T> HashEntry<T> {
    pub fn new(action: Action, directory: bool) -> Self {
        Self {
            action,
            status: Status::Idle,
            directory,
            timestamp: 0,
            params: ParamMap::new(),
            metadata: ParamMap::new(),
            keys: Vec::new(),
            data: Vec::new(),
            error: None,
            abort: None,
            pending: None,
            request_seq: 0,
            queries: HashSet::new(),
        }
    }

    /// Lazily evaluated staleness: entries never expire on their own.
    pub fn is_fresh(&self, persistence_ms: u64, now: u64) -> bool {
        self.timestamp + persistence_ms > now
    }
}

/// A named logical operation over one or more cache entries.
#[derive(Debug, Clone, Default)]
pub(crate) struct Query {
    /// Member cache keys in insertion order; grouped queries accumulate,
    /// plain queries hold exactly one.
    pub hashes: Vec<CacheKey>,
    pub enabled: bool,
}

/// Aggregated view over a query's member entries.
#[derive(Debug, Clone)]
pub struct QuerySnapshot<T> {
    pub name: String,
    pub data: Vec<T>,
    pub keys: Vec<EntityKey>,
    pub metadata: ParamMap,
    /// Params of the most recently updated member.
    pub params: ParamMap,
    pub timestamp: u64,
    pub enabled: bool,
    pub is_loading: bool,
    pub is_error: bool,
    pub is_success: bool,
    /// Every member error in member order; the first is the primary one.
    pub errors: Vec<StoreError>,
}

impl<T> QuerySnapshot<T> {
    pub(crate) fn empty(name: &str, enabled: bool) -> Self {
        Self {
            name: name.to_string(),
            data: Vec::new(),
            keys: Vec::new(),
            metadata: ParamMap::new(),
            params: ParamMap::new(),
            timestamp: 0,
            enabled,
            is_loading: false,
            is_error: false,
            is_success: false,
            errors: Vec::new(),
        }
    }

    /// Primary error, when any member errored.
    pub fn error(&self) -> Option<&StoreError> {
        self.errors.first()
    }

    /// First aggregated record.
    pub fn item(&self) -> Option<&T> {
        self.data.first()
    }
}
