//! Store-level behavior: cross-query cache sharing, reference-counted
//! collection, the idle collector, and teardown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use scorta::{ReadOptions, RepositoryStore, StoreConfig};

use common::{MockRepository, Widget, params, wait_until};

fn store_with(mock: &Arc<MockRepository>, config: StoreConfig) -> RepositoryStore<Widget> {
    RepositoryStore::new(mock.clone(), "articles", config)
}

fn store(mock: &Arc<MockRepository>) -> RepositoryStore<Widget> {
    store_with(
        mock,
        StoreConfig {
            clean_up_every_ms: 0,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn equal_parameters_share_one_entry_across_queries() {
    let mock = MockRepository::new();
    mock.push_data(vec![Widget::keyed("X", "shared")]);
    let store = store(&mock);

    let first = store.read(
        params(json!({ "id": "X" })),
        ReadOptions {
            name: Some("first".into()),
            ..Default::default()
        },
    );
    wait_until(|| first.is_success()).await;

    let second = store.read(
        params(json!({ "id": "X" })),
        ReadOptions {
            name: Some("second".into()),
            immediate: false,
            ..Default::default()
        },
    );
    let outcome = second.execute().await;

    assert!(outcome.is_success());
    assert_eq!(outcome.data, vec![Widget::keyed("X", "shared")]);
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn collection_respects_reference_counts() {
    let mock = MockRepository::new();
    mock.push_data(vec![Widget::keyed("X", "shared")]);
    let store = store(&mock);

    let first = store.read(
        params(json!({ "id": "X" })),
        ReadOptions {
            name: Some("first".into()),
            ..Default::default()
        },
    );
    wait_until(|| first.is_success()).await;

    let second = store.read(
        params(json!({ "id": "X" })),
        ReadOptions {
            name: Some("second".into()),
            immediate: false,
            ..Default::default()
        },
    );
    second.execute().await;

    // disabling one query leaves the shared entry referenced by the other
    first.cleanup();
    assert_eq!(store.clear_queries(), 1);
    assert_eq!(store.clean_hashes(), 0);
    assert!(store.get_query_by_name("first").is_none());
    assert_eq!(second.data(), vec![Widget::keyed("X", "shared")]);

    // once the last reference is gone the entry goes too
    second.cleanup();
    assert_eq!(store.clear_queries(), 1);
    assert_eq!(store.clean_hashes(), 1);
    assert!(store.get_query_by_name("second").is_none());

    // the entity table is untouched by collection
    assert_eq!(store.get_item_by_key("X"), Some(Widget::keyed("X", "shared")));
}

#[tokio::test]
async fn keep_alive_handles_survive_cleanup() {
    let mock = MockRepository::new();
    mock.push_data(vec![Widget::keyed("X", "pinned")]);
    let store = store(&mock);

    let handle = store.read(
        params(json!({ "id": "X" })),
        ReadOptions {
            name: Some("pinned".into()),
            keep_alive: true,
            ..Default::default()
        },
    );
    wait_until(|| handle.is_success()).await;

    handle.cleanup();
    assert_eq!(store.clear_queries(), 0);
    assert!(store.get_query_by_name("pinned").is_some());
}

#[tokio::test(start_paused = true)]
async fn idle_collector_sweeps_disabled_queries() {
    let mock = MockRepository::new();
    mock.push_data(vec![Widget::keyed("X", "short-lived")]);
    let store = store_with(
        &mock,
        StoreConfig {
            clean_up_every_ms: 100,
            ..Default::default()
        },
    );

    let handle = store.read(
        params(json!({ "id": "X" })),
        ReadOptions {
            name: Some("transient".into()),
            ..Default::default()
        },
    );
    wait_until(|| handle.is_success()).await;
    handle.cleanup();
    assert!(store.get_query_by_name("transient").is_some());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(store.get_query_by_name("transient").is_none());

    store.shutdown();
}

#[tokio::test]
async fn default_parameters_underlie_every_call() {
    let mock = MockRepository::new();
    mock.push_data(vec![Widget::keyed("X", "scoped")]);
    let store = store_with(
        &mock,
        StoreConfig {
            clean_up_every_ms: 0,
            default_parameters: params(json!({ "tenant": "acme" })),
            ..Default::default()
        },
    );

    let handle = store.read(params(json!({ "id": "X" })), ReadOptions::default());
    wait_until(|| handle.is_success()).await;

    let sent = &mock.calls()[0].params;
    assert_eq!(sent.get("tenant"), Some(&json!("acme")));
    assert_eq!(sent.get("id"), Some(&json!("X")));
}

#[tokio::test]
async fn key_lists_dereference_in_order() {
    let mock = MockRepository::new();
    mock.push_data(vec![
        Widget::keyed("1", "a"),
        Widget::keyed("2", "b"),
        Widget::keyed("3", "c"),
    ]);
    let store = store(&mock);

    let handle = store.read(params(json!({ "tag": "all" })), ReadOptions::default());
    wait_until(|| handle.is_success()).await;

    // absent keys drop out, the rest keep the requested order
    let items = store.get_items_by_keys(["3", "missing", "1"]);
    assert_eq!(items, vec![Widget::keyed("3", "c"), Widget::keyed("1", "a")]);
}

#[tokio::test]
async fn generated_query_names_do_not_collide() {
    let mock = MockRepository::new();
    mock.push_data(vec![Widget::keyed("1", "a")]);
    mock.push_data(vec![Widget::keyed("2", "b")]);
    let store = store(&mock);

    let first = store.read(params(json!({ "id": "1" })), ReadOptions::default());
    let second = store.read(params(json!({ "id": "2" })), ReadOptions::default());

    assert_ne!(first.query_name(), second.query_name());
    wait_until(|| first.is_success() && second.is_success()).await;
    assert_eq!(first.item(), Some(Widget::keyed("1", "a")));
    assert_eq!(second.item(), Some(Widget::keyed("2", "b")));
}

#[tokio::test]
async fn subscribe_notifies_on_material_change() {
    let mock = MockRepository::new();
    mock.push_data(vec![Widget::keyed("X", "watched")]);
    let store = store(&mock);

    let mut version = store.subscribe();
    let before = *version.borrow_and_update();

    let handle = store.read(params(json!({ "id": "X" })), ReadOptions::default());
    wait_until(|| handle.is_success()).await;

    assert!(*version.borrow_and_update() > before);
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let mock = MockRepository::new();
    let store = store_with(&mock, StoreConfig::default());
    store.shutdown();
    store.shutdown();
}
