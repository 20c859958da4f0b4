//! Scorta, a client-side repository store.
//!
//! Sits between callers and a remote resource repository, deduplicating
//! in-flight and recent requests, merging grouped result sets, tracking
//! per-request lifecycle, and keeping a normalized entity table in sync with
//! query results.
//!
//! The moving parts:
//!
//! - **Entity table**: key to latest entity snapshot, last write wins.
//! - **Hash entry store**: cache key to request outcome and lifecycle.
//! - **Query registry**: query name to member entries, aggregated on read.
//! - **Coordinators**: [`RepositoryStore::read`], [`RepositoryStore::submit`],
//!   [`RepositoryStore::remove`] decide between cache, in-flight join, and
//!   refetch, and supersede stale requests.
//! - **Triggers**: immediate, auto-execute, gate-edge, and focus/visibility
//!   firing, all debounced and stoppable.
//! - **Garbage collector**: idle-driven sweep of disabled queries and
//!   unreferenced entries.
//!
//! ## Example
//!
//! ```ignore
//! let store = RepositoryStore::new(repository, "articles", StoreConfig::default());
//! let articles = store.read(params, ReadOptions::default());
//! articles.execute().await;
//! assert!(articles.is_success());
//! ```

mod call;
mod config;
mod entry;
mod error;
mod gc;
mod keys;
mod lock;
mod params;
mod reactive;
mod read;
mod remove;
mod repository;
mod state;
mod store;
mod submit;
mod trigger;

pub use call::{ExecuteOptions, ExecuteOutcome, RemoveOutcome};
pub use config::{
    ExecuteWhen, ReadOptions, RemoveOptions, ResetWhen, StoreConfig, SubmitExecuteWhen,
    SubmitOptions,
};
pub use entry::{QuerySnapshot, Status};
pub use error::StoreError;
pub use keys::{Action, CacheKey, EntityKey, HashFn, cache_key, default_hash_function};
pub use params::{ParamMap, ParamsInput, merge_params};
pub use reactive::{IgnoreUpdates, Reactive};
pub use read::ReadHandle;
pub use remove::RemoveHandle;
pub use repository::{
    AbortHandle, PendingRequest, ReadResponse, RemoveResponse, Repository, RequestOptions,
    TransportError,
};
pub use store::{PayloadInput, RepositoryStore};
pub use submit::SubmitHandle;
