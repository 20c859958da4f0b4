//! Cache and entity key derivation.
//!
//! A `CacheKey` identifies one concrete (action, directory flag, parameter
//! set) combination: equal parameters under the same action always resolve to
//! the same key, which is what deduplicates overlapping requests. An
//! `EntityKey` is the canonical scalar value of a record's configured key
//! property, used to address the entity table.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::params::{ParamMap, canonical_params};

/// The repository operation a cache entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Read,
    Create,
    Update,
    Remove,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Remove => "remove",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Injectable hash over the canonical parameter string.
pub type HashFn = Arc<dyn Fn(&str) -> u64 + Send + Sync>;

/// Default parameter hash, built on the standard library hasher.
pub fn default_hash_function() -> HashFn {
    Arc::new(|input: &str| {
        let mut hasher = DefaultHasher::new();
        input.hash(&mut hasher);
        hasher.finish()
    })
}

/// Deterministic identifier of one (action, parameter set) request shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the cache key for a request.
pub fn cache_key(action: Action, directory: bool, params: &ParamMap, hash: &HashFn) -> CacheKey {
    let digest = hash(&canonical_params(params));
    if directory {
        CacheKey(format!("{action}-directory-{digest}"))
    } else {
        CacheKey(format!("{action}-{digest}"))
    }
}

// ============================================================================
// Entity keys
// ============================================================================

/// Canonical scalar form of a record's key property value.
///
/// Valid key values are non-null scalars; the empty string does not count.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(String);

impl EntityKey {
    /// Accepts scalar JSON values, rejecting null, empty strings, and
    /// compound values.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) if !text.is_empty() => Some(Self(text.clone())),
            Value::Number(number) => Some(Self(number.to_string())),
            Value::Bool(flag) => Some(Self(flag.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<i64> for EntityKey {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<u64> for EntityKey {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

/// Raw key property value of a record, if it carries a valid one.
pub fn record_key_value<T: Serialize>(record: &T, key_property: &str) -> Option<Value> {
    let value = serde_json::to_value(record).ok()?;
    let key = value.get(key_property)?;
    EntityKey::from_value(key)?;
    Some(key.clone())
}

/// Canonical entity key of a record, if it carries a valid one.
pub fn record_key<T: Serialize>(record: &T, key_property: &str) -> Option<EntityKey> {
    record_key_value(record, key_property)
        .as_ref()
        .and_then(EntityKey::from_value)
}
