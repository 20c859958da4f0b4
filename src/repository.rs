//! Resource repository contract.
//!
//! The store never performs network work itself: it hands resolved
//! parameters to a `Repository` implementation and interprets the pending
//! result. A response without data signals failure, `aborted: true` signals
//! cooperative cancellation, and an `Err` signals a transport-level failure.

use std::fmt;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use crate::keys::CacheKey;
use crate::lock::MutexExt;
use crate::params::ParamMap;

/// Opaque transport failure raised by a repository implementation.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a read or submit call.
#[derive(Debug, Clone, Default)]
pub struct ReadResponse<T> {
    /// Returned records; `None` means the request failed to produce data.
    pub data: Option<Vec<T>>,
    /// Response metadata (paging cursors, totals) merged into query views.
    pub metadata: Option<ParamMap>,
    /// Set when the request was cancelled before completion.
    pub aborted: bool,
}

impl<T> ReadResponse<T> {
    pub fn of(data: Vec<T>) -> Self {
        Self {
            data: Some(data),
            metadata: None,
            aborted: false,
        }
    }

    pub fn with_metadata(data: Vec<T>, metadata: ParamMap) -> Self {
        Self {
            data: Some(data),
            metadata: Some(metadata),
            aborted: false,
        }
    }

    pub fn aborted() -> Self {
        Self {
            data: None,
            metadata: None,
            aborted: true,
        }
    }
}

/// Outcome of a remove call.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveResponse {
    pub aborted: bool,
}

/// Options forwarded to the repository with every call.
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// The cache key computed for this request, for correlation.
    pub key: Option<CacheKey>,
    /// Caller-supplied pass-through options, opaque to the store.
    pub extra: ParamMap,
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("key", &self.key)
            .field("extra_keys", &self.extra.len())
            .finish()
    }
}

/// A request in flight: the pending response plus an optional cancel handle.
pub struct PendingRequest<R> {
    pub response: BoxFuture<'static, Result<R, TransportError>>,
    pub abort: Option<AbortHandle>,
}

/// The read/create/update/remove collaborator the store coordinates.
pub trait Repository<T>: Send + Sync {
    fn read(&self, params: ParamMap, options: RequestOptions) -> PendingRequest<ReadResponse<T>>;

    fn create(
        &self,
        payload: Vec<T>,
        params: ParamMap,
        options: RequestOptions,
    ) -> PendingRequest<ReadResponse<T>>;

    fn update(
        &self,
        payload: Vec<T>,
        params: ParamMap,
        options: RequestOptions,
    ) -> PendingRequest<ReadResponse<T>>;

    fn remove(&self, params: ParamMap, options: RequestOptions)
    -> PendingRequest<RemoveResponse>;
}

// ============================================================================
// Cooperative cancellation
// ============================================================================

type AbortFn = Box<dyn FnOnce(Option<String>) + Send>;

/// Cancel handle for an in-flight request.
///
/// Cancellation is cooperative: the repository decides what aborting means.
/// The handle fires at most once; later calls are no-ops, so the store can
/// hold clones in cache entries without double-cancel concerns.
#[derive(Clone)]
pub struct AbortHandle {
    inner: Arc<Mutex<Option<AbortFn>>>,
}

impl AbortHandle {
    pub fn new(abort: impl FnOnce(Option<String>) + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::new(abort)))),
        }
    }

    pub fn abort(&self, reason: Option<&str>) {
        let abort = self.inner.lock_recovered("abort_handle.abort").take();
        if let Some(abort) = abort {
            abort(reason.map(str::to_string));
        }
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let spent = self.inner.lock_recovered("abort_handle.debug").is_none();
        f.debug_struct("AbortHandle").field("spent", &spent).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn abort_fires_at_most_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let handle = AbortHandle::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let alias = handle.clone();

        handle.abort(Some("superseded"));
        alias.abort(None);
        handle.abort(None);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn abort_receives_the_reason() {
        let seen: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let handle = AbortHandle::new(move |reason| {
            *sink.lock().expect("reason lock") = reason;
        });

        handle.abort(Some("superseded"));
        assert_eq!(
            seen.lock().expect("reason lock").as_deref(),
            Some("superseded")
        );
    }
}
