//! Shared store state.
//!
//! One `StoreState` holds the three process-wide maps every query created
//! under a store shares: the entity table, the hash entry store, and the
//! query registry. Mutations are synchronous sections between await points;
//! the maps sit behind RwLocks taken in a fixed order (queries, then hashes,
//! then items) and every material change bumps a version channel so derived
//! views know to recompute.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::entry::{HashEntry, PendingShare, Query, QuerySnapshot, Status, now_ms};
use crate::error::StoreError;
use crate::keys::{Action, CacheKey, EntityKey, record_key};
use crate::lock::RwLockExt;
use crate::params::ParamMap;
use crate::repository::AbortHandle;

const METRIC_QUERIES_RECLAIMED: &str = "scorta_store_queries_reclaimed_total";
const METRIC_ENTRIES_RECLAIMED: &str = "scorta_store_entries_reclaimed_total";

pub(crate) struct StoreState<T> {
    items: RwLock<HashMap<EntityKey, T>>,
    hashes: RwLock<HashMap<CacheKey, HashEntry<T>>>,
    queries: RwLock<HashMap<String, Query>>,
    version: watch::Sender<u64>,
    /// Milliseconds since `epoch` of the last coordinator activity.
    last_activity_ms: AtomicU64,
    epoch: tokio::time::Instant,
}

impl<T> StoreState<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            items: RwLock::new(HashMap::new()),
            hashes: RwLock::new(HashMap::new()),
            queries: RwLock::new(HashMap::new()),
            version,
            last_activity_ms: AtomicU64::new(0),
            epoch: tokio::time::Instant::now(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn notify(&self) {
        self.version.send_modify(|version| *version += 1);
    }

    // ========================================================================
    // Activity tracking (drives the idle garbage collector)
    // ========================================================================

    pub fn touch(&self) {
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        self.last_activity_ms.store(elapsed, Ordering::Release);
    }

    pub fn idle_for(&self) -> Duration {
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_activity_ms.load(Ordering::Acquire);
        Duration::from_millis(elapsed.saturating_sub(last))
    }

    // ========================================================================
    // Entity table
    // ========================================================================

    pub fn item(&self, key: &EntityKey) -> Option<T> {
        self.items.read_recovered("state.item").get(key).cloned()
    }

    /// Dereference a key list, dropping absent keys and preserving order.
    pub fn items(&self, keys: &[EntityKey]) -> Vec<T> {
        let items = self.items.read_recovered("state.items");
        keys.iter().filter_map(|key| items.get(key).cloned()).collect()
    }

    pub fn remove_items(&self, keys: &[EntityKey]) {
        {
            let mut items = self.items.write_recovered("state.remove_items");
            for key in keys {
                items.remove(key);
            }
        }
        self.notify();
    }

    // ========================================================================
    // Hash entries
    // ========================================================================

    pub fn with_entry<R>(
        &self,
        key: &CacheKey,
        read: impl FnOnce(&HashEntry<T>) -> R,
    ) -> Option<R> {
        self.hashes.read_recovered("state.with_entry").get(key).map(read)
    }

    /// Transition an entry to `Loading` for a freshly issued request.
    ///
    /// Creates the entry if needed and returns the request sequence number
    /// the eventual completion must present to be applied.
    pub fn begin_request(
        &self,
        key: &CacheKey,
        action: Action,
        directory: bool,
        params: ParamMap,
        abort: Option<AbortHandle>,
        pending: PendingShare,
    ) -> u64 {
        let seq = {
            let mut hashes = self.hashes.write_recovered("state.begin_request");
            let entry = hashes
                .entry(key.clone())
                .or_insert_with(|| HashEntry::new(action, directory));
            entry.action = action;
            entry.directory = directory;
            entry.status = Status::Loading;
            entry.error = None;
            entry.params = params;
            entry.timestamp = now_ms();
            entry.abort = abort;
            entry.pending = Some(pending);
            entry.request_seq += 1;
            entry.request_seq
        };
        self.notify();
        seq
    }

    /// Record a successful completion, propagating records into the entity
    /// table unless the entry is a directory.
    pub fn apply_success(
        &self,
        key: &CacheKey,
        seq: u64,
        data: Vec<T>,
        metadata: Option<ParamMap>,
        key_property: &str,
    ) -> bool {
        let applied = {
            let mut hashes = self.hashes.write_recovered("state.apply_success");
            let Some(entry) = hashes.get_mut(key) else {
                return false;
            };
            if entry.request_seq != seq {
                debug!(key = %key, action = %entry.action, "stale success ignored");
                return false;
            }
            entry.status = Status::Success;
            entry.timestamp = now_ms();
            entry.error = None;
            entry.abort = None;
            entry.pending = None;
            entry.metadata = metadata.unwrap_or_default();
            if entry.directory {
                entry.data = data;
                entry.keys.clear();
            } else {
                entry.data.clear();
                entry.keys.clear();
                let mut items = self.items.write_recovered("state.apply_success.items");
                for record in data {
                    if let Some(entity_key) = record_key(&record, key_property) {
                        entry.keys.push(entity_key.clone());
                        items.insert(entity_key, record);
                    }
                }
            }
            true
        };
        if applied {
            self.notify();
        }
        applied
    }

    pub fn apply_error(&self, key: &CacheKey, seq: u64, error: StoreError) -> bool {
        let applied = {
            let mut hashes = self.hashes.write_recovered("state.apply_error");
            let Some(entry) = hashes.get_mut(key) else {
                return false;
            };
            if entry.request_seq != seq {
                debug!(key = %key, action = %entry.action, "stale error ignored");
                return false;
            }
            entry.status = Status::Error;
            entry.timestamp = now_ms();
            entry.error = Some(error);
            entry.abort = None;
            entry.pending = None;
            true
        };
        if applied {
            self.notify();
        }
        applied
    }

    /// An aborted completion resolves to idle, never to success or error.
    pub fn apply_aborted(&self, key: &CacheKey, seq: u64) -> bool {
        let applied = {
            let mut hashes = self.hashes.write_recovered("state.apply_aborted");
            let Some(entry) = hashes.get_mut(key) else {
                return false;
            };
            if entry.request_seq != seq {
                debug!(key = %key, action = %entry.action, "stale abort ignored");
                return false;
            }
            entry.status = Status::Idle;
            entry.abort = None;
            entry.pending = None;
            true
        };
        if applied {
            self.notify();
        }
        applied
    }

    // ========================================================================
    // Query registry
    // ========================================================================

    /// Bind a query to a cache key.
    ///
    /// Grouped queries accumulate members; plain queries release every
    /// previous member first, which decrements those entries' reference
    /// counts and makes them collectible.
    pub fn attach(&self, name: &str, key: &CacheKey, group: bool) {
        {
            let mut queries = self.queries.write_recovered("state.attach");
            let mut hashes = self.hashes.write_recovered("state.attach.hashes");
            let query = queries.entry(name.to_string()).or_default();
            query.enabled = true;
            if group {
                if !query.hashes.contains(key) {
                    query.hashes.push(key.clone());
                }
            } else if !(query.hashes.len() == 1 && query.hashes[0] == *key) {
                for old in query.hashes.drain(..) {
                    if old != *key
                        && let Some(entry) = hashes.get_mut(&old)
                    {
                        entry.queries.remove(name);
                    }
                }
                query.hashes.push(key.clone());
            }
            hashes
                .entry(key.clone())
                .or_insert_with(|| HashEntry::new(Action::Read, false))
                .queries
                .insert(name.to_string());
        }
        self.notify();
    }

    /// Aggregate a query's member entries into a snapshot.
    pub fn resolve(&self, name: &str) -> Option<QuerySnapshot<T>> {
        let queries = self.queries.read_recovered("state.resolve");
        let query = queries.get(name)?;
        let hashes = self.hashes.read_recovered("state.resolve.hashes");
        let items = self.items.read_recovered("state.resolve.items");

        let mut snapshot = QuerySnapshot::empty(name, query.enabled);
        for key in &query.hashes {
            let Some(entry) = hashes.get(key) else {
                continue;
            };
            match entry.status {
                Status::Loading => snapshot.is_loading = true,
                Status::Success => snapshot.is_success = true,
                Status::Error => snapshot.is_error = true,
                Status::Idle => {}
            }
            if let Some(error) = &entry.error {
                snapshot.errors.push(error.clone());
            }
            if entry.directory {
                snapshot.data.extend(entry.data.iter().cloned());
            } else {
                for entity_key in &entry.keys {
                    if let Some(item) = items.get(entity_key) {
                        snapshot.data.push(item.clone());
                    }
                }
                snapshot.keys.extend(entry.keys.iter().cloned());
            }
            for (meta_key, meta_value) in &entry.metadata {
                snapshot.metadata.insert(meta_key.clone(), meta_value.clone());
            }
            if entry.timestamp >= snapshot.timestamp {
                snapshot.timestamp = entry.timestamp;
                snapshot.params = entry.params.clone();
            }
        }
        Some(snapshot)
    }

    /// Cancel handles of the query's loading members other than `next_key`.
    ///
    /// Handles are returned rather than fired so the caller can invoke them
    /// outside the lock.
    pub fn superseded_aborts(&self, name: &str, next_key: &CacheKey) -> Vec<AbortHandle> {
        let queries = self.queries.read_recovered("state.superseded_aborts");
        let Some(query) = queries.get(name) else {
            return Vec::new();
        };
        let hashes = self.hashes.read_recovered("state.superseded_aborts.hashes");
        query
            .hashes
            .iter()
            .filter(|key| *key != next_key)
            .filter_map(|key| hashes.get(key))
            .filter(|entry| entry.status == Status::Loading)
            .filter_map(|entry| entry.abort.clone())
            .collect()
    }

    /// Disable a query without releasing members: late completions can still
    /// be recorded until the next collection pass.
    pub fn disable_query(&self, name: &str) {
        {
            let mut queries = self.queries.write_recovered("state.disable_query");
            let Some(query) = queries.get_mut(name) else {
                return;
            };
            query.enabled = false;
        }
        debug!(query = name, "query disabled");
        self.notify();
    }

    /// Immediately release every membership, discarding accumulated results.
    pub fn reset_query(&self, name: &str) {
        {
            let mut queries = self.queries.write_recovered("state.reset_query");
            let Some(query) = queries.get_mut(name) else {
                return;
            };
            let mut hashes = self.hashes.write_recovered("state.reset_query.hashes");
            for old in query.hashes.drain(..) {
                if let Some(entry) = hashes.get_mut(&old) {
                    entry.queries.remove(name);
                }
            }
        }
        debug!(query = name, "query reset");
        self.notify();
    }

    // ========================================================================
    // Collection passes
    // ========================================================================

    /// Drop disabled queries, releasing their entry memberships.
    pub fn clear_queries(&self) -> usize {
        let dropped = {
            let mut queries = self.queries.write_recovered("state.clear_queries");
            let mut hashes = self.hashes.write_recovered("state.clear_queries.hashes");
            let disabled: Vec<String> = queries
                .iter()
                .filter(|(_, query)| !query.enabled)
                .map(|(name, _)| name.clone())
                .collect();
            for name in &disabled {
                if let Some(query) = queries.remove(name) {
                    for key in query.hashes {
                        if let Some(entry) = hashes.get_mut(&key) {
                            entry.queries.remove(name);
                        }
                    }
                }
            }
            disabled.len()
        };
        if dropped > 0 {
            counter!(METRIC_QUERIES_RECLAIMED).increment(dropped as u64);
            self.notify();
        }
        dropped
    }

    /// Drop entries no query references any more. Runs after
    /// `clear_queries` so entries orphaned in the same pass are collected.
    pub fn clean_hashes(&self) -> usize {
        let dropped = {
            let mut hashes = self.hashes.write_recovered("state.clean_hashes");
            let before = hashes.len();
            hashes.retain(|_, entry| !entry.queries.is_empty());
            before - hashes.len()
        };
        if dropped > 0 {
            counter!(METRIC_ENTRIES_RECLAIMED).increment(dropped as u64);
            self.notify();
        }
        dropped
    }

    #[cfg(test)]
    pub fn entry_count(&self) -> usize {
        self.hashes.read_recovered("state.entry_count").len()
    }

    #[cfg(test)]
    pub fn query_count(&self) -> usize {
        self.queries.read_recovered("state.query_count").len()
    }
}
