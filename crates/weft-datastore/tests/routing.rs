//! Op and signal routing: envelope dispatch, outbound-reference
//! detection, deleted and missing address handling.

use std::sync::Arc;

use serde_json::json;
use weft_core::gc::NodeUpdateKind;
use weft_core::identifiers::DataStoreId;
use weft_core::messages::{ContainerMessage, SignalEnvelope};
use weft_core::CollectionConfig;
use weft_datastore::{parse_container_message, ChannelCollection};
use weft_testkit::{MockRegistry, MockRuntime};

fn attached_collection(
    config: CollectionConfig,
) -> (Arc<MockRuntime>, Arc<MockRegistry>, ChannelCollection) {
    let runtime = MockRuntime::attached();
    let registry = MockRegistry::new();
    let collection = ChannelCollection::new(runtime.clone(), registry.clone(), config);
    (runtime, registry, collection)
}

async fn remote_attach(collection: &ChannelCollection, id: &str) {
    let message: ContainerMessage = serde_json::from_value(json!({
        "type": "Attach",
        "contents": {"id": id, "type": "counter"}
    }))
    .unwrap();
    collection.process(&message, false, None, None).await.unwrap();
}

#[tokio::test]
async fn channel_op_reports_handle_references() {
    let (runtime, registry, collection) = attached_collection(CollectionConfig::default());
    remote_attach(&collection, "1").await;

    let op: ContainerMessage = serde_json::from_value(json!({
        "type": "DataStoreOp",
        "contents": {
            "address": "1",
            "contents": {
                "type": "op",
                "content": {
                    "handle": {"type": "__fluid_handle__", "url": "/2/dds1"},
                    "address": "dds0"
                }
            }
        }
    }))
    .unwrap();
    collection.process(&op, false, None, Some(42)).await.unwrap();

    let channel = registry.channel(&DataStoreId::new("1")).unwrap();
    assert_eq!(channel.processed_ops().len(), 1);

    assert_eq!(
        runtime.gc_edges(),
        vec![("/1/dds0".to_string(), "/2/dds1".to_string())]
    );
    let updates = runtime.node_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].path, "/1");
    assert_eq!(updates[0].kind, NodeUpdateKind::Changed);
    assert_eq!(updates[0].timestamp_ms, Some(42));
}

#[tokio::test]
async fn detection_flag_delegates_to_store() {
    let config = CollectionConfig {
        detect_outbound_routes_via_dds: true,
        ..CollectionConfig::default()
    };
    let (runtime, _registry, collection) = attached_collection(config);
    remote_attach(&collection, "1").await;

    let op: ContainerMessage = serde_json::from_value(json!({
        "type": "DataStoreOp",
        "contents": {
            "address": "1",
            "contents": {
                "type": "op",
                "content": {"handle": {"type": "__fluid_handle__", "url": "/2"}}
            }
        }
    }))
    .unwrap();
    collection.process(&op, false, None, None).await.unwrap();

    // The mock store reports no routes of its own, so nothing is emitted.
    assert!(runtime.gc_edges().is_empty());
}

#[tokio::test]
async fn op_to_missing_context_is_processing_error() {
    let (_runtime, _registry, collection) = attached_collection(CollectionConfig::default());
    let op: ContainerMessage = serde_json::from_value(json!({
        "type": "DataStoreOp",
        "contents": {"address": "404", "contents": {"type": "op", "content": {}}}
    }))
    .unwrap();
    let err = collection.process(&op, false, None, None).await.unwrap_err();
    assert_eq!(err.category(), "dataProcessing");
    let message = err.to_string();
    assert!(message.contains("404"), "details missing from {message}");
}

#[tokio::test]
async fn op_to_deleted_context_is_dropped_by_default() {
    let (_runtime, _registry, collection) = attached_collection(CollectionConfig::default());
    remote_attach(&collection, "1").await;
    collection.delete_sweep_ready(&["/1".to_string()]);

    let op: ContainerMessage = serde_json::from_value(json!({
        "type": "DataStoreOp",
        "contents": {"address": "1", "contents": {"type": "op", "content": {}}}
    }))
    .unwrap();
    collection.process(&op, false, None, None).await.unwrap();
}

#[tokio::test]
async fn op_to_deleted_context_throws_when_configured() {
    let config = CollectionConfig {
        throw_on_deleted_op: true,
        ..CollectionConfig::default()
    };
    let (_runtime, _registry, collection) = attached_collection(config);
    remote_attach(&collection, "1").await;
    collection.delete_sweep_ready(&["/1".to_string()]);

    let op: ContainerMessage = serde_json::from_value(json!({
        "type": "DataStoreOp",
        "contents": {"address": "1", "contents": {"type": "op", "content": {}}}
    }))
    .unwrap();
    let err = collection.process(&op, false, None, None).await.unwrap_err();
    assert_eq!(err.category(), "dataCorruption");
}

#[tokio::test]
async fn signals_route_by_envelope_address() {
    let (_runtime, registry, collection) = attached_collection(CollectionConfig::default());
    remote_attach(&collection, "1").await;

    // Realize the channel so the signal has somewhere to land.
    let op: ContainerMessage = serde_json::from_value(json!({
        "type": "DataStoreOp",
        "contents": {"address": "1", "contents": {"type": "op", "content": {}}}
    }))
    .unwrap();
    collection.process(&op, false, None, None).await.unwrap();

    collection.process_signal(
        &SignalEnvelope {
            address: DataStoreId::new("1"),
            contents: json!({"ping": 1}),
        },
        false,
    );
    let channel = registry.channel(&DataStoreId::new("1")).unwrap();
    assert_eq!(channel.delivered_signals(), vec![json!({"ping": 1})]);

    // Unknown remote address: swallowed.
    collection.process_signal(
        &SignalEnvelope {
            address: DataStoreId::new("nope"),
            contents: json!({}),
        },
        false,
    );
}

#[tokio::test]
async fn resubmitted_channel_op_goes_back_out() {
    let (runtime, _registry, collection) = attached_collection(CollectionConfig::default());
    remote_attach(&collection, "1").await;

    let op: ContainerMessage = serde_json::from_value(json!({
        "type": "DataStoreOp",
        "contents": {"address": "1", "contents": {"type": "op", "content": {"k": "v"}}}
    }))
    .unwrap();
    // The channel must be realized before it can rewrite its ops.
    collection.process(&op, false, None, None).await.unwrap();

    collection.resubmit(&op, None).unwrap();
    assert_eq!(runtime.submitted_messages(), vec![op]);
}

#[test]
fn unknown_container_message_is_internal_error() {
    let err = parse_container_message(&json!({
        "type": "Mystery",
        "contents": {}
    }))
    .unwrap_err();
    assert_eq!(err.category(), "internalConsistency");
}
