//! Request parameter maps.
//!
//! Parameters are JSON object maps. `serde_json`'s default map keeps keys
//! sorted, so serializing a map always yields the same string for the same
//! logical parameters, which is the identity the cache key derivation
//! relies on.

use serde_json::Value;

use crate::reactive::Reactive;

/// A map of request parameters, as handed to the repository.
pub type ParamMap = serde_json::Map<String, Value>;

/// Merge `over` on top of `base`, `over` winning on key collisions.
///
/// Used to apply the store's `default_parameters` under every call.
pub fn merge_params(base: &ParamMap, over: ParamMap) -> ParamMap {
    if base.is_empty() {
        return over;
    }
    let mut merged = base.clone();
    for (key, value) in over {
        merged.insert(key, value);
    }
    merged
}

/// Canonical serialized form of a parameter map, used for hashing.
pub fn canonical_params(params: &ParamMap) -> String {
    serde_json::to_string(params).unwrap_or_else(|_| String::from("{}"))
}

/// A parameter argument: either a plain map or a reactive handle whose
/// changes can drive auto-execution.
#[derive(Clone)]
pub enum ParamsInput {
    Value(ParamMap),
    Reactive(Reactive<ParamMap>),
}

impl Default for ParamsInput {
    fn default() -> Self {
        Self::Value(ParamMap::new())
    }
}

impl From<ParamMap> for ParamsInput {
    fn from(params: ParamMap) -> Self {
        Self::Value(params)
    }
}

impl From<Reactive<ParamMap>> for ParamsInput {
    fn from(params: Reactive<ParamMap>) -> Self {
        Self::Reactive(params)
    }
}

impl From<&Reactive<ParamMap>> for ParamsInput {
    fn from(params: &Reactive<ParamMap>) -> Self {
        Self::Reactive(params.clone())
    }
}
