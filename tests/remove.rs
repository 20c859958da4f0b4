//! Remove coordination end to end: parameter validation, entity deletion,
//! and immediate execution.

mod common;

use std::sync::Arc;

use serde_json::json;

use scorta::{
    ReadOptions, RemoveOptions, RepositoryStore, Status, StoreConfig, StoreError,
};

use common::{MockRepository, Widget, params, settle, wait_until};

fn store(mock: &Arc<MockRepository>) -> RepositoryStore<Widget> {
    RepositoryStore::new(
        mock.clone(),
        "articles",
        StoreConfig {
            clean_up_every_ms: 0,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn remove_requires_the_key_property() {
    let mock = MockRepository::new();
    let store = store(&mock);

    let handle = store.remove(
        params(json!({ "q": "x" })),
        RemoveOptions {
            immediate: false,
            ..Default::default()
        },
    );
    let outcome = handle.execute().await;

    assert!(outcome.error.is_some());
    assert_eq!(outcome.error, Some(StoreError::missing_remove_key("id")));
    assert_eq!(
        outcome.error.expect("error set").to_string(),
        "remove: params must contain a `id` property"
    );
    // the repository is never consulted for invalid parameters
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn removal_round_trip_empties_the_entity_table() {
    let mock = MockRepository::new();
    mock.push_data(vec![Widget::keyed("X", "doomed")]);
    let store = store(&mock);

    let read = store.read(params(json!({ "id": "X" })), ReadOptions::default());
    wait_until(|| read.is_success()).await;
    assert!(store.get_item_by_key("X").is_some());

    mock.push_data(Vec::new());
    let remove = store.remove(
        params(json!({ "id": "X" })),
        RemoveOptions {
            immediate: false,
            ..Default::default()
        },
    );
    let outcome = remove.execute().await;

    assert_eq!(outcome.status, Status::Success);
    assert_eq!(store.get_item_by_key("X"), None);
}

#[tokio::test]
async fn remove_accepts_a_key_array() {
    let mock = MockRepository::new();
    mock.push_data(vec![Widget::keyed("1", "a"), Widget::keyed("2", "b")]);
    let store = store(&mock);

    let read = store.read(params(json!({ "tag": "all" })), ReadOptions::default());
    wait_until(|| read.is_success()).await;

    mock.push_data(Vec::new());
    let remove = store.remove(
        params(json!({ "id": ["1", "2"] })),
        RemoveOptions {
            immediate: false,
            ..Default::default()
        },
    );
    let outcome = remove.execute().await;

    assert_eq!(outcome.status, Status::Success);
    assert_eq!(store.get_item_by_key("1"), None);
    assert_eq!(store.get_item_by_key("2"), None);
}

#[tokio::test]
async fn immediate_remove_executes_at_creation() {
    let mock = MockRepository::new();
    mock.push_data(vec![Widget::keyed("X", "doomed")]);
    let store = store(&mock);

    let read = store.read(params(json!({ "id": "X" })), ReadOptions::default());
    wait_until(|| read.is_success()).await;

    mock.push_data(Vec::new());
    let remove = store.remove(params(json!({ "id": "X" })), RemoveOptions::default());
    wait_until(|| remove.is_success()).await;
    assert_eq!(store.get_item_by_key("X"), None);
}

#[tokio::test]
async fn aborted_removal_deletes_nothing() {
    let mock = MockRepository::new();
    mock.push_data(vec![Widget::keyed("X", "spared")]);
    let store = store(&mock);

    let read = store.read(params(json!({ "id": "X" })), ReadOptions::default());
    wait_until(|| read.is_success()).await;

    mock.push_aborted();
    let remove = store.remove(
        params(json!({ "id": "X" })),
        RemoveOptions {
            immediate: false,
            ..Default::default()
        },
    );
    let outcome = remove.execute().await;

    assert!(outcome.aborted);
    assert_eq!(outcome.status, Status::Idle);
    assert!(store.get_item_by_key("X").is_some());
}

#[tokio::test]
async fn failed_removal_reports_transport_error() {
    let mock = MockRepository::new();
    mock.push_failure("gone away");
    let store = store(&mock);

    let remove = store.remove(params(json!({ "id": "X" })), RemoveOptions::default());
    wait_until(|| remove.is_error()).await;
    assert_eq!(
        remove.error(),
        Some(StoreError::transport("remove", "gone away"))
    );
    settle().await;
    assert_eq!(mock.call_count(), 1);
}
