//! Store error taxonomy.
//!
//! Every failure is captured at the coordinator boundary and written into
//! cache state; nothing is re-thrown to callers. Handles poll `error()` and
//! the aggregated `errors()` list instead.

use std::fmt::Display;

use thiserror::Error;

/// Errors recorded against a request outcome.
///
/// `Clone` on purpose: the same error is visible through the hash entry, the
/// originating call, and every query that aggregates the entry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The repository resolved without data where data was required.
    #[error("{operation}: empty response is not allowed")]
    EmptyResponse { operation: &'static str },

    /// A returned record lacks a usable value for the configured key property.
    #[error("{operation}: response must contain a `{key_property}` property")]
    MissingKeyProperty {
        operation: &'static str,
        key_property: String,
    },

    /// `remove` was invoked without the key property in its parameters.
    #[error("remove: params must contain a `{key_property}` property")]
    MissingRemoveKey { key_property: String },

    /// A submit payload mixes records with and without a key value, so the
    /// create-or-update inference has no defensible answer. Callers pass an
    /// explicit action to proceed.
    #[error("submit: payload mixes records with and without a `{key_property}` value, pass an explicit action")]
    AmbiguousBatch { key_property: String },

    /// The repository call itself failed; the source is opaque to the store.
    #[error("{operation}: transport failure: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },
}

impl StoreError {
    pub fn empty_response(operation: &'static str) -> Self {
        Self::EmptyResponse { operation }
    }

    pub fn missing_key_property(operation: &'static str, key_property: impl Into<String>) -> Self {
        Self::MissingKeyProperty {
            operation,
            key_property: key_property.into(),
        }
    }

    pub fn missing_remove_key(key_property: impl Into<String>) -> Self {
        Self::MissingRemoveKey {
            key_property: key_property.into(),
        }
    }

    pub fn ambiguous_batch(key_property: impl Into<String>) -> Self {
        Self::AmbiguousBatch {
            key_property: key_property.into(),
        }
    }

    pub fn transport(operation: &'static str, source: impl Display) -> Self {
        Self::Transport {
            operation,
            message: source.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_key_property() {
        let error = StoreError::missing_key_property("read", "id");
        assert_eq!(
            error.to_string(),
            "read: response must contain a `id` property"
        );

        let error = StoreError::missing_remove_key("uuid");
        assert_eq!(
            error.to_string(),
            "remove: params must contain a `uuid` property"
        );
    }

    #[test]
    fn transport_keeps_the_source_message() {
        let error = StoreError::transport("read", "connection reset");
        assert_eq!(error.to_string(), "read: transport failure: connection reset");
    }
}
