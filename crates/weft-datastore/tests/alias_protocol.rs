//! Alias protocol: reservation, sequenced arbitration, pending waits.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use weft_core::identifiers::{Alias, DataStoreId};
use weft_core::messages::ContainerMessage;
use weft_core::CollectionConfig;
use weft_datastore::{AliasResult, ChannelCollection, ObjectClass};
use weft_testkit::{MockRegistry, MockRuntime};

fn counter_class() -> ObjectClass {
    ObjectClass::DataObject {
        package_path: vec!["counter".to_string()],
    }
}

fn attached_collection() -> (Arc<MockRuntime>, Arc<ChannelCollection>) {
    let runtime = MockRuntime::attached();
    let collection = Arc::new(ChannelCollection::new(
        runtime.clone(),
        MockRegistry::new(),
        CollectionConfig::default(),
    ));
    (runtime, collection)
}

async fn remote_attach(collection: &ChannelCollection, id: &str) {
    let message: ContainerMessage = serde_json::from_value(json!({
        "type": "Attach",
        "contents": {"id": id, "type": "counter"}
    }))
    .unwrap();
    collection.process(&message, false, None, None).await.unwrap();
}

/// Run until the runtime has `count` submitted messages, yielding to let
/// spawned alias futures make progress.
async fn drain_until_submitted(runtime: &MockRuntime, count: usize) -> Vec<ContainerMessage> {
    for _ in 0..1000 {
        if runtime.submitted_messages().len() >= count {
            return runtime.submitted_messages();
        }
        tokio::task::yield_now().await;
    }
    panic!("alias op was never submitted");
}

#[tokio::test]
async fn alias_round_trip_resolves_success() {
    let (runtime, collection) = attached_collection();
    remote_attach(&collection, "1").await;

    let pending = tokio::spawn({
        let collection = collection.clone();
        async move {
            collection
                .alias(&DataStoreId::new("1"), Alias::new("root"))
                .await
        }
    });
    let submitted = drain_until_submitted(&runtime, 1).await;

    // The echoed alias op commits and resolves the local promise.
    collection.process(&submitted[0], true, None, None).await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(result, AliasResult::Success);
    assert_eq!(
        collection.alias_target(&Alias::new("root")),
        Some(DataStoreId::new("1"))
    );
    // Alias commit marks the store root and reports the container edge.
    assert!(collection
        .get_context(&DataStoreId::new("1"))
        .unwrap()
        .is_root());
    assert!(runtime
        .gc_edges()
        .contains(&("/".to_string(), "/1".to_string())));
}

#[tokio::test]
async fn lower_sequenced_remote_alias_wins() {
    let (runtime, collection) = attached_collection();
    remote_attach(&collection, "1").await;
    remote_attach(&collection, "2").await;

    let pending = tokio::spawn({
        let collection = collection.clone();
        async move {
            collection
                .alias(&DataStoreId::new("1"), Alias::new("root"))
                .await
        }
    });
    let submitted = drain_until_submitted(&runtime, 1).await;

    // The remote client's alias op was sequenced first.
    let remote: ContainerMessage = serde_json::from_value(json!({
        "type": "Alias",
        "contents": {"internalId": "2", "alias": "root"}
    }))
    .unwrap();
    collection.process(&remote, false, None, None).await.unwrap();
    assert_eq!(
        collection.alias_target(&Alias::new("root")),
        Some(DataStoreId::new("2"))
    );

    // Now the local op arrives: the name is taken.
    collection.process(&submitted[0], true, None, None).await.unwrap();
    let result = pending.await.unwrap().unwrap();
    assert_eq!(result, AliasResult::Conflict);
    assert_eq!(
        collection.alias_target(&Alias::new("root")),
        Some(DataStoreId::new("2"))
    );
}

#[tokio::test]
async fn concurrent_reservations_resolve_exactly_one_success() {
    let (runtime, collection) = attached_collection();
    remote_attach(&collection, "1").await;
    remote_attach(&collection, "2").await;

    let first = tokio::spawn({
        let collection = collection.clone();
        async move {
            collection
                .alias(&DataStoreId::new("1"), Alias::new("shared"))
                .await
        }
    });
    let submitted = drain_until_submitted(&runtime, 1).await;
    collection.process(&submitted[0], true, None, None).await.unwrap();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first, AliasResult::Success);

    // A later reservation of the same name for another store conflicts
    // immediately.
    let second = collection
        .alias(&DataStoreId::new("2"), Alias::new("shared"))
        .await
        .unwrap();
    assert_eq!(second, AliasResult::Conflict);
}

#[tokio::test]
async fn concurrent_reservations_for_different_stores_are_arbitrated() {
    let (runtime, collection) = attached_collection();
    remote_attach(&collection, "1").await;
    remote_attach(&collection, "2").await;

    // Two in-flight local reservations of one name for different stores:
    // each submits its own op, and the commit order decides.
    let first = tokio::spawn({
        let collection = collection.clone();
        async move {
            collection
                .alias(&DataStoreId::new("1"), Alias::new("shared"))
                .await
        }
    });
    let second = tokio::spawn({
        let collection = collection.clone();
        async move {
            collection
                .alias(&DataStoreId::new("2"), Alias::new("shared"))
                .await
        }
    });
    let submitted = drain_until_submitted(&runtime, 2).await;

    collection.process(&submitted[0], true, None, None).await.unwrap();
    collection.process(&submitted[1], true, None, None).await.unwrap();

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first, AliasResult::Success);
    assert_eq!(second, AliasResult::Conflict);
    assert_eq!(
        collection.alias_target(&Alias::new("shared")),
        Some(DataStoreId::new("1"))
    );
}

#[tokio::test]
async fn same_target_reservation_joins_the_pending_op() {
    let (runtime, collection) = attached_collection();
    remote_attach(&collection, "1").await;

    let first = tokio::spawn({
        let collection = collection.clone();
        async move {
            collection
                .alias(&DataStoreId::new("1"), Alias::new("root"))
                .await
        }
    });
    drain_until_submitted(&runtime, 1).await;
    let second = tokio::spawn({
        let collection = collection.clone();
        async move {
            collection
                .alias(&DataStoreId::new("1"), Alias::new("root"))
                .await
        }
    });
    tokio::task::yield_now().await;

    // Still one op on the wire: the second reservation joined the first.
    let submitted = drain_until_submitted(&runtime, 1).await;
    assert_eq!(submitted.len(), 1);

    collection.process(&submitted[0], true, None, None).await.unwrap();
    assert_eq!(first.await.unwrap().unwrap(), AliasResult::Success);
    assert_eq!(second.await.unwrap().unwrap(), AliasResult::Success);
}

#[tokio::test]
async fn aliasing_an_aliased_store_reports_already_aliased() {
    let (runtime, collection) = attached_collection();
    remote_attach(&collection, "1").await;

    let pending = tokio::spawn({
        let collection = collection.clone();
        async move {
            collection
                .alias(&DataStoreId::new("1"), Alias::new("root"))
                .await
        }
    });
    let submitted = drain_until_submitted(&runtime, 1).await;
    collection.process(&submitted[0], true, None, None).await.unwrap();
    pending.await.unwrap().unwrap();

    let result = collection
        .alias(&DataStoreId::new("1"), Alias::new("other"))
        .await
        .unwrap();
    assert_eq!(result, AliasResult::AlreadyAliased);
}

#[tokio::test]
async fn alias_name_clashing_with_internal_id_conflicts() {
    let (_runtime, collection) = attached_collection();
    remote_attach(&collection, "1").await;
    remote_attach(&collection, "2").await;

    // "2" is already an internal id, so the commit is rejected.
    let remote: ContainerMessage = serde_json::from_value(json!({
        "type": "Alias",
        "contents": {"internalId": "1", "alias": "2"}
    }))
    .unwrap();
    collection.process(&remote, false, None, None).await.unwrap();
    assert_eq!(collection.alias_target(&Alias::new("2")), None);
}

#[tokio::test]
async fn alias_of_unbound_store_makes_it_visible_first() {
    let (runtime, collection) = attached_collection();
    let id = collection.create_data_store(counter_class()).unwrap();

    let pending = tokio::spawn({
        let collection = collection.clone();
        let id = id.clone();
        async move { collection.alias(&id, Alias::new("root")).await }
    });
    // Two submissions: the attach op, then the alias op.
    let submitted = drain_until_submitted(&runtime, 2).await;
    assert!(matches!(submitted[0], ContainerMessage::Attach(_)));
    assert!(matches!(submitted[1], ContainerMessage::Alias(_)));

    collection.process(&submitted[0], true, None, None).await.unwrap();
    collection.process(&submitted[1], true, None, None).await.unwrap();
    assert_eq!(pending.await.unwrap().unwrap(), AliasResult::Success);
}

#[tokio::test]
async fn wait_if_pending_alias_keeps_legacy_contract() {
    let (runtime, collection) = attached_collection();
    remote_attach(&collection, "1").await;

    // Nothing in flight: the legacy contract reports success.
    assert_eq!(
        collection.wait_if_pending_alias(&Alias::new("ghost")).await,
        AliasResult::Success
    );
    // The strict probe distinguishes that case.
    assert_eq!(
        collection.pending_alias_status(&Alias::new("ghost")).await,
        None
    );

    let reservation = tokio::spawn({
        let collection = collection.clone();
        async move {
            collection
                .alias(&DataStoreId::new("1"), Alias::new("root"))
                .await
        }
    });
    let submitted = drain_until_submitted(&runtime, 1).await;

    let waiter = tokio::spawn({
        let collection = collection.clone();
        async move { collection.pending_alias_status(&Alias::new("root")).await }
    });
    tokio::task::yield_now().await;

    collection.process(&submitted[0], true, None, None).await.unwrap();
    assert_eq!(reservation.await.unwrap().unwrap(), AliasResult::Success);
    assert_eq!(waiter.await.unwrap(), Some(AliasResult::Success));
}

#[tokio::test]
async fn dispose_fails_pending_reservations() {
    let (runtime, collection) = attached_collection();
    remote_attach(&collection, "1").await;

    let pending = tokio::spawn({
        let collection = collection.clone();
        async move {
            collection
                .alias(&DataStoreId::new("1"), Alias::new("root"))
                .await
        }
    });
    drain_until_submitted(&runtime, 1).await;

    collection.dispose();
    let result = pending.await.unwrap();
    assert!(result.is_err());
    assert!(collection.is_disposed());
    // Dispose is idempotent.
    collection.dispose();
}
