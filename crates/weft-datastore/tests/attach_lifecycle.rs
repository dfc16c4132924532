//! Attach lifecycle: make-visible, pending-attach bookkeeping, acks,
//! rollback and resubmission.

use std::sync::Arc;

use weft_core::messages::ContainerMessage;
use weft_core::{AttachState, BindState, CollectionConfig};
use weft_datastore::{ChannelCollection, ObjectClass};
use weft_testkit::{MockRegistry, MockRuntime};

fn counter_class() -> ObjectClass {
    ObjectClass::DataObject {
        package_path: vec!["app".to_string(), "counter".to_string()],
    }
}

fn attached_collection() -> (Arc<MockRuntime>, Arc<MockRegistry>, ChannelCollection) {
    let runtime = MockRuntime::attached();
    let registry = MockRegistry::new();
    let collection = ChannelCollection::new(
        runtime.clone(),
        registry.clone(),
        CollectionConfig::default(),
    );
    (runtime, registry, collection)
}

#[tokio::test]
async fn visible_store_round_trips_attach() {
    let (runtime, _registry, collection) = attached_collection();

    // First numeric runtime id is 0, so the store id is 2*0+1 = "1".
    let id = collection.create_data_store(counter_class()).unwrap();
    assert_eq!(id.as_str(), "1");

    collection.make_visible(&id).await.unwrap();

    let submitted = runtime.take_submitted();
    assert_eq!(submitted.len(), 1);
    let ContainerMessage::Attach(attach) = &submitted[0].0 else {
        panic!("expected attach message, got {:?}", submitted[0].0);
    };
    assert_eq!(attach.id, id);
    assert_eq!(attach.package_type, "counter");
    let snapshot = attach.snapshot.as_ref().expect("attach carries a snapshot");
    assert!(snapshot.get_blob(".attributes").is_some());

    assert_eq!(collection.pending_attach_ids(), vec![id.clone()]);
    let context = collection.get_context(&id).unwrap();
    assert_eq!(context.attach_state(), AttachState::Attaching);

    // Deliver the ack.
    collection
        .process(&submitted[0].0, true, None, Some(17))
        .await
        .unwrap();
    assert!(collection.pending_attach_ids().is_empty());
    assert_eq!(context.attach_state(), AttachState::Attached);
}

#[tokio::test]
async fn make_visible_is_idempotent() {
    let (runtime, _registry, collection) = attached_collection();
    let id = collection.create_data_store(counter_class()).unwrap();
    collection.make_visible(&id).await.unwrap();
    collection.make_visible(&id).await.unwrap();
    assert_eq!(runtime.take_submitted().len(), 1);
}

#[tokio::test]
async fn detached_container_binds_without_attach_op() {
    let runtime = MockRuntime::detached();
    let registry = MockRegistry::new();
    let collection = ChannelCollection::new(
        runtime.clone(),
        registry,
        CollectionConfig::default(),
    );

    let id = collection.create_data_store(counter_class()).unwrap();
    assert_eq!(id.as_str(), "0");
    collection.make_visible(&id).await.unwrap();

    assert!(runtime.take_submitted().is_empty());
    assert!(collection.pending_attach_ids().is_empty());
    let context = collection.get_context(&id).unwrap();
    assert_eq!(context.attach_state(), AttachState::Detached);
    assert_eq!(context.bind_state(), BindState::Bound);
}

#[tokio::test]
async fn local_ack_without_pending_entry_is_internal_error() {
    let (_runtime, _registry, collection) = attached_collection();
    let message: ContainerMessage = serde_json::from_value(serde_json::json!({
        "type": "Attach",
        "contents": {"id": "1", "type": "counter"}
    }))
    .unwrap();
    let err = collection.process(&message, true, None, None).await.unwrap_err();
    assert_eq!(err.category(), "internalConsistency");
}

#[tokio::test]
async fn remote_attach_creates_addressable_store() {
    let (runtime, registry, collection) = attached_collection();
    let message: ContainerMessage = serde_json::from_value(serde_json::json!({
        "type": "Attach",
        "contents": {"id": "7", "type": "counter"}
    }))
    .unwrap();
    collection.process(&message, false, None, None).await.unwrap();

    let id = weft_core::DataStoreId::new("7");
    let context = collection.get_context(&id).unwrap();
    assert_eq!(context.attach_state(), AttachState::Attached);
    assert_eq!(runtime.created_summarizer_nodes(), vec![id.clone()]);

    // The store is reachable for ops immediately.
    let op: ContainerMessage = serde_json::from_value(serde_json::json!({
        "type": "DataStoreOp",
        "contents": {"address": "7", "contents": {"type": "op", "content": {}}}
    }))
    .unwrap();
    collection.process(&op, false, None, None).await.unwrap();
    let channel = registry.channel(&id).unwrap();
    assert_eq!(channel.processed_ops().len(), 1);
}

#[tokio::test]
async fn duplicate_remote_attach_is_corruption() {
    let (_runtime, _registry, collection) = attached_collection();
    let message: ContainerMessage = serde_json::from_value(serde_json::json!({
        "type": "Attach",
        "contents": {"id": "7", "type": "counter"}
    }))
    .unwrap();
    collection.process(&message, false, None, None).await.unwrap();
    let err = collection.process(&message, false, None, None).await.unwrap_err();
    assert_eq!(err.category(), "dataCorruption");
}

#[tokio::test]
async fn attach_rollback_reverts_to_unbound() {
    let (runtime, _registry, collection) = attached_collection();
    let id = collection.create_data_store(counter_class()).unwrap();
    collection.make_visible(&id).await.unwrap();
    let submitted = runtime.take_submitted();

    collection.rollback(&submitted[0].0, None).unwrap();
    assert!(collection.pending_attach_ids().is_empty());
    let context = collection.get_context(&id).unwrap();
    assert_eq!(context.bind_state(), BindState::Unbound);
    assert_eq!(context.attach_state(), AttachState::Detached);

    // The store can be made visible again afterwards.
    collection.make_visible(&id).await.unwrap();
    assert_eq!(collection.pending_attach_ids(), vec![id]);
}

#[tokio::test]
async fn attach_resubmit_reuses_contents() {
    let (runtime, _registry, collection) = attached_collection();
    let id = collection.create_data_store(counter_class()).unwrap();
    collection.make_visible(&id).await.unwrap();
    let submitted = runtime.take_submitted();

    collection.resubmit(&submitted[0].0, None).unwrap();
    let resubmitted = runtime.take_submitted();
    assert_eq!(resubmitted[0].0, submitted[0].0);
}

#[tokio::test]
async fn stashed_attach_completes_on_replayed_ack() {
    let (_runtime, _registry, collection) = attached_collection();
    let message: ContainerMessage = serde_json::from_value(serde_json::json!({
        "type": "Attach",
        "contents": {"id": "9", "type": "counter"}
    }))
    .unwrap();
    collection.apply_stashed_op(&message).await.unwrap();

    let id = weft_core::DataStoreId::new("9");
    assert_eq!(collection.pending_attach_ids(), vec![id.clone()]);
    let context = collection.get_context(&id).unwrap();
    assert_eq!(context.attach_state(), AttachState::Attaching);

    collection.process(&message, true, None, None).await.unwrap();
    assert_eq!(context.attach_state(), AttachState::Attached);
    assert!(collection.pending_attach_ids().is_empty());
}

#[tokio::test]
async fn attach_gc_payload_reports_outbound_references() {
    let (runtime, _registry, collection) = attached_collection();
    let gc_blob = serde_json::json!({"nodes": {"/": ["/2/dds1"], "/dds0": ["/5"]}});
    let message: ContainerMessage = serde_json::from_value(serde_json::json!({
        "type": "Attach",
        "contents": {
            "id": "3",
            "type": "counter",
            "snapshot": {"entries": [
                {"type": "Blob", "path": ".gcdata", "contents": gc_blob.to_string()}
            ]}
        }
    }))
    .unwrap();
    collection.process(&message, false, None, None).await.unwrap();

    let edges = runtime.gc_edges();
    assert!(edges.contains(&("/3".to_string(), "/2/dds1".to_string())));
    assert!(edges.contains(&("/3/dds0".to_string(), "/5".to_string())));
}
