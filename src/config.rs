//! Store and per-call configuration.
//!
//! A `StoreConfig` is resolved once per store; read/submit/remove options are
//! plain structs with `Default` impls so call sites can use struct-update
//! syntax for the handful of fields they care about.

use std::sync::Arc;

use crate::keys::{Action, HashFn};
use crate::params::ParamMap;
use crate::reactive::Reactive;

const DEFAULT_KEY_PROPERTY: &str = "id";
const DEFAULT_PERSISTENCE_MS: u64 = 60 * 60 * 1000;
const DEFAULT_DEBOUNCE_MS: u64 = 0;
const DEFAULT_CLEAN_UP_EVERY_MS: u64 = 3 * 1000;

/// Store-wide configuration.
#[derive(Clone)]
pub struct StoreConfig {
    /// Property that identifies an entity within responses and parameters.
    pub key_property: String,
    /// How long a completed entry satisfies reads without a refetch.
    pub default_persistence_ms: u64,
    /// Default debounce applied to auto-execute watchers.
    pub default_debounce_ms: u64,
    /// Parameters merged under every call's parameters.
    pub default_parameters: ParamMap,
    /// Hash over the canonical parameter string; `None` uses the built-in.
    pub hash_function: Option<HashFn>,
    /// Idle window before a garbage collection pass; `0` disables the task.
    pub clean_up_every_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key_property: DEFAULT_KEY_PROPERTY.to_string(),
            default_persistence_ms: DEFAULT_PERSISTENCE_MS,
            default_debounce_ms: DEFAULT_DEBOUNCE_MS,
            default_parameters: ParamMap::new(),
            hash_function: None,
            clean_up_every_ms: DEFAULT_CLEAN_UP_EVERY_MS,
        }
    }
}

// ============================================================================
// Trigger predicates
// ============================================================================

/// Gate evaluated before every trigger firing of a read.
#[derive(Clone, Default)]
pub enum ExecuteWhen {
    #[default]
    Always,
    /// Reactive boolean; its false→true transitions also fire edge triggers.
    Signal(Reactive<bool>),
    /// Predicate over the current parameters.
    Predicate(Arc<dyn Fn(&ParamMap) -> bool + Send + Sync>),
}

impl ExecuteWhen {
    pub fn predicate(check: impl Fn(&ParamMap) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(check))
    }
}

/// Gate evaluated before every trigger firing of a submit.
pub enum SubmitExecuteWhen<T> {
    Always,
    Signal(Reactive<bool>),
    /// Predicate over the current payload and parameters.
    Predicate(Arc<dyn Fn(&[T], &ParamMap) -> bool + Send + Sync>),
}

impl<T> SubmitExecuteWhen<T> {
    pub fn predicate(check: impl Fn(&[T], &ParamMap) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(check))
    }
}

impl<T> Default for SubmitExecuteWhen<T> {
    fn default() -> Self {
        Self::Always
    }
}

impl<T> Clone for SubmitExecuteWhen<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Always => Self::Always,
            Self::Signal(signal) => Self::Signal(signal.clone()),
            Self::Predicate(check) => Self::Predicate(Arc::clone(check)),
        }
    }
}

/// Decides whether a read execution discards the query's accumulated
/// members before proceeding (pagination jumped rather than incremented).
#[derive(Clone)]
pub enum ResetWhen {
    Signal(Reactive<bool>),
    /// Predicate over the next and previous resolved parameters.
    Predicate(Arc<dyn Fn(&ParamMap, Option<&ParamMap>) -> bool + Send + Sync>),
}

impl ResetWhen {
    pub fn predicate(
        check: impl Fn(&ParamMap, Option<&ParamMap>) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::Predicate(Arc::new(check))
    }
}

// ============================================================================
// Per-call options
// ============================================================================

/// Options for `RepositoryStore::read`.
#[derive(Clone)]
pub struct ReadOptions {
    /// Query name; generated when absent.
    pub name: Option<String>,
    /// Accumulate result sets instead of superseding them.
    pub group: bool,
    /// Keep response data inline instead of normalizing into the entity
    /// table (aggregate views with no usable key property).
    pub directory: bool,
    /// Skip teardown on `cleanup`.
    pub keep_alive: bool,
    /// Execute once at creation when the gate allows it.
    pub immediate: bool,
    /// Per-call persistence override in milliseconds.
    pub persistence_ms: Option<u64>,
    pub execute_when: ExecuteWhen,
    pub reset_when: Option<ResetWhen>,
    /// Re-execute whenever the watched parameters change.
    pub auto_execute: bool,
    /// Debounce override for the auto-execute watcher, in milliseconds.
    pub auto_execute_debounce_ms: Option<u64>,
    /// Re-execute on false→true transitions of an external focus signal.
    pub auto_execute_on_focus: Option<Reactive<bool>>,
    /// Re-execute on false→true transitions of an external visibility signal.
    pub auto_execute_on_visibility: Option<Reactive<bool>>,
    /// Opaque options forwarded to the repository.
    pub repository_options: ParamMap,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            name: None,
            group: false,
            directory: false,
            keep_alive: false,
            immediate: true,
            persistence_ms: None,
            execute_when: ExecuteWhen::Always,
            reset_when: None,
            auto_execute: false,
            auto_execute_debounce_ms: None,
            auto_execute_on_focus: None,
            auto_execute_on_visibility: None,
            repository_options: ParamMap::new(),
        }
    }
}

/// Options for `RepositoryStore::submit`.
#[derive(Clone)]
pub struct SubmitOptions<T> {
    pub name: Option<String>,
    pub keep_alive: bool,
    pub immediate: bool,
    pub execute_when: SubmitExecuteWhen<T>,
    /// Re-submit whenever the watched payload or parameters change.
    pub auto_execute: bool,
    pub auto_execute_debounce_ms: Option<u64>,
    pub auto_execute_on_focus: Option<Reactive<bool>>,
    pub auto_execute_on_visibility: Option<Reactive<bool>>,
    /// Explicit action, overriding create-or-update inference.
    pub action: Option<Action>,
    pub repository_options: ParamMap,
}

impl<T> Default for SubmitOptions<T> {
    fn default() -> Self {
        Self {
            name: None,
            keep_alive: false,
            immediate: true,
            execute_when: SubmitExecuteWhen::Always,
            auto_execute: false,
            auto_execute_debounce_ms: None,
            auto_execute_on_focus: None,
            auto_execute_on_visibility: None,
            action: None,
            repository_options: ParamMap::new(),
        }
    }
}

/// Options for `RepositoryStore::remove`.
#[derive(Clone)]
pub struct RemoveOptions {
    pub name: Option<String>,
    /// Execute at creation without waiting for an explicit call.
    pub immediate: bool,
    pub repository_options: ParamMap,
}

impl Default for RemoveOptions {
    fn default() -> Self {
        Self {
            name: None,
            immediate: true,
            repository_options: ParamMap::new(),
        }
    }
}
