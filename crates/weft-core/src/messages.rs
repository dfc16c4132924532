//! Container-level wire messages
//!
//! The outer runtime hands the channel collection exactly three kinds of
//! sequenced messages: `Attach`, `Alias`, and `DataStoreOp`. All shapes are
//! JSON on the wire; field names follow the persisted camelCase convention.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::{Alias, DataStoreId};
use crate::snapshot::SnapshotTree;

/// Marker `type` value of a serialized handle inside an op payload.
///
/// Any JSON object of the shape `{"type": "__fluid_handle__", "url": <string>}`
/// anywhere in a payload is an outbound reference to `url`.
pub const SERIALIZED_HANDLE_TYPE: &str = "__fluid_handle__";

/// A container-level message addressed to the channel collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "contents")]
pub enum ContainerMessage {
    /// A store becoming globally visible.
    Attach(AttachMessage),
    /// An alias reservation for an existing store.
    Alias(AliasMessage),
    /// A channel op addressed to one store.
    DataStoreOp(Envelope),
}

impl ContainerMessage {
    /// Message kind as a wire-stable string, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ContainerMessage::Attach(_) => "Attach",
            ContainerMessage::Alias(_) => "Alias",
            ContainerMessage::DataStoreOp(_) => "DataStoreOp",
        }
    }
}

/// Attach message: `{id, type, snapshot?}`.
///
/// `snapshot` carries the store's initial tree in flattened entry-list form
/// with inline blobs; it is absent when the store has no initial state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachMessage {
    /// Internal id of the attaching store.
    pub id: DataStoreId,
    /// Package type: the last element of the store's package path.
    #[serde(rename = "type")]
    pub package_type: String,
    /// Initial snapshot, flattened, with inline blobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotTree>,
}

/// Alias message: `{internalId, alias}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasMessage {
    /// Target store of the alias.
    pub internal_id: DataStoreId,
    /// The requested name.
    pub alias: Alias,
}

/// Envelope routing a channel op to one store: `{address, contents}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Internal id of the addressed store.
    pub address: DataStoreId,
    /// The op itself, opaque to the collection.
    pub contents: InnerOp,
}

/// The inner op carried by an [`Envelope`]: `{type, content}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InnerOp {
    /// Op type, interpreted by the addressed channel.
    #[serde(rename = "type")]
    pub op_type: String,
    /// Op payload, interpreted by the addressed channel.
    pub content: Value,
}

/// Envelope routing a signal to one store.
///
/// Signals are transient: an unknown remote address is dropped with
/// telemetry, never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    /// Internal id of the addressed store.
    pub address: DataStoreId,
    /// Signal payload.
    pub contents: Value,
}

/// If `value` is a serialized handle, return its target url.
pub fn as_serialized_handle(value: &Value) -> Option<&str> {
    let obj = value.as_object()?;
    if obj.get("type").and_then(Value::as_str) == Some(SERIALIZED_HANDLE_TYPE) {
        obj.get("url").and_then(Value::as_str)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attach_message_wire_shape() {
        let msg = ContainerMessage::Attach(AttachMessage {
            id: DataStoreId::new("1"),
            package_type: "counter".to_string(),
            snapshot: None,
        });
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            wire,
            json!({"type": "Attach", "contents": {"id": "1", "type": "counter"}})
        );
    }

    #[test]
    fn alias_message_wire_shape() {
        let msg = ContainerMessage::Alias(AliasMessage {
            internal_id: DataStoreId::new("1"),
            alias: Alias::new("root"),
        });
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            wire,
            json!({"type": "Alias", "contents": {"internalId": "1", "alias": "root"}})
        );
    }

    #[test]
    fn envelope_round_trips() {
        let wire = json!({
            "type": "DataStoreOp",
            "contents": {
                "address": "1",
                "contents": {"type": "op", "content": {"key": "v"}}
            }
        });
        let msg: ContainerMessage = serde_json::from_value(wire.clone()).unwrap();
        match &msg {
            ContainerMessage::DataStoreOp(envelope) => {
                assert_eq!(envelope.address.as_str(), "1");
                assert_eq!(envelope.contents.op_type, "op");
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert_eq!(serde_json::to_value(&msg).unwrap(), wire);
    }

    #[test]
    fn serialized_handle_detection() {
        let handle = json!({"type": "__fluid_handle__", "url": "/2/dds1"});
        assert_eq!(as_serialized_handle(&handle), Some("/2/dds1"));
        assert_eq!(as_serialized_handle(&json!({"type": "other"})), None);
        assert_eq!(as_serialized_handle(&json!("plain")), None);
    }
}
