//! Per-call lifecycle state.
//!
//! Each read/submit/remove handle tracks the lifecycle of its own latest
//! execution, separate from the aggregate state of the query it feeds. A
//! generation counter orders overlapping executions on the same handle:
//! a completion only lands if no newer execution has started since.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use crate::entry::Status;
use crate::error::StoreError;
use crate::lock::RwLockExt;
use crate::params::ParamMap;

pub(crate) struct CallState {
    status: watch::Sender<Status>,
    error: RwLock<Option<StoreError>>,
    generation: AtomicU64,
}

impl CallState {
    pub fn new() -> Self {
        let (status, _) = watch::channel(Status::Idle);
        Self {
            status,
            error: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Claim the next execution generation for this call.
    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Apply a transition, unless a newer execution has started since
    /// `generation` was claimed. Entering `Loading` clears the prior error.
    pub fn apply(&self, generation: u64, status: Status, error: Option<StoreError>) {
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        {
            let mut slot = self.error.write_recovered("call.apply");
            *slot = if status == Status::Loading { None } else { error };
        }
        self.status.send_replace(status);
    }

    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    pub fn error(&self) -> Option<StoreError> {
        self.error.read_recovered("call.error").clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }
}

/// Per-execution options for a read.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Parameters for this execution, overriding every other source.
    pub params: Option<ParamMap>,
    /// Bypass the cache even for a fresh successful entry.
    pub force: bool,
}

impl ExecuteOptions {
    pub fn forced() -> Self {
        Self {
            params: None,
            force: true,
        }
    }

    pub fn with_params(params: ParamMap) -> Self {
        Self {
            params: Some(params),
            force: false,
        }
    }
}

/// Result of one read or submit execution.
///
/// Failures are reported here and through the handle, never as a panic or a
/// rejected future.
#[derive(Debug, Clone)]
pub struct ExecuteOutcome<T> {
    pub status: Status,
    pub aborted: bool,
    pub error: Option<StoreError>,
    pub data: Vec<T>,
    pub metadata: ParamMap,
}

impl<T> ExecuteOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_error(&self) -> bool {
        self.status.is_error()
    }
}

/// Result of one remove execution.
#[derive(Debug, Clone)]
pub struct RemoveOutcome {
    pub status: Status,
    pub aborted: bool,
    pub error: Option<StoreError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_generation_cannot_apply() {
        let call = CallState::new();
        let first = call.next_generation();
        let second = call.next_generation();

        call.apply(second, Status::Loading, None);
        call.apply(first, Status::Error, Some(StoreError::empty_response("read")));

        assert_eq!(call.status(), Status::Loading);
        assert!(call.error().is_none());
    }

    #[test]
    fn loading_clears_the_previous_error() {
        let call = CallState::new();
        let generation = call.next_generation();
        call.apply(
            generation,
            Status::Error,
            Some(StoreError::empty_response("read")),
        );
        assert!(call.error().is_some());

        let generation = call.next_generation();
        call.apply(generation, Status::Loading, None);
        assert_eq!(call.status(), Status::Loading);
        assert!(call.error().is_none());
    }
}
