//! Channel-op pipeline
//!
//! Unwraps the envelope, routes to the addressed context, then reports GC
//! consequences: outbound handle references discovered in the payload and
//! a node-changed update. Reference detection is a pure function of the
//! op contents; the serialized-handle shape is
//! `{"type": "__fluid_handle__", "url": <string>}`.

use serde_json::Value;
use tracing::error;

use weft_core::gc::NodeUpdateKind;
use weft_core::messages::{as_serialized_handle, Envelope};
use weft_core::{WeftError, WeftResult};

use crate::collection::ChannelCollection;
use crate::context::Lookup;

/// Outbound references discovered in one op payload.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DetectedRoutes {
    /// Target urls of every serialized handle, in traversal order.
    pub targets: Vec<String>,
    /// First `address` property encountered: the DDS sub-path the op
    /// originated from.
    pub dds_address: Option<String>,
}

/// Walk op contents recursively, collecting serialized-handle targets and
/// the first `address` property.
///
/// Object fields are visited in document order (serde_json's
/// `preserve_order`), so "first" means first in the payload as written,
/// not alphabetically first.
pub fn detect_outbound_routes(content: &Value) -> DetectedRoutes {
    let mut detected = DetectedRoutes::default();
    walk(content, &mut detected);
    detected
}

fn walk(value: &Value, detected: &mut DetectedRoutes) {
    if let Some(url) = as_serialized_handle(value) {
        detected.targets.push(url.to_string());
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key == "address" && detected.dds_address.is_none() {
                    if let Some(address) = child.as_str() {
                        detected.dds_address = Some(address.to_string());
                    }
                }
                walk(child, detected);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, detected);
            }
        }
        _ => {}
    }
}

impl ChannelCollection {
    /// Process a sequenced channel op.
    pub(crate) async fn process_channel_op(
        &self,
        envelope: &Envelope,
        local: bool,
        local_metadata: Option<&Value>,
        timestamp_ms: Option<u64>,
    ) -> WeftResult<()> {
        let address = &envelope.address;
        let context = match self.contexts.lookup_addressable(address) {
            Lookup::Found(context) => context,
            Lookup::Deleted => {
                if self.config.throw_on_deleted_op {
                    return Err(WeftError::data_corruption(format!(
                        "op addressed to deleted store {address}"
                    )));
                }
                error!(
                    store_id = %address,
                    op_type = %envelope.contents.op_type,
                    "op addressed to deleted store dropped"
                );
                return Ok(());
            }
            Lookup::Missing => {
                return Err(WeftError::data_processing(format!(
                    "no context for op addressed to {address} (type {})",
                    envelope.contents.op_type
                )));
            }
        };

        context
            .process(&envelope.contents, local, local_metadata)
            .await?;

        let (targets, dds_address) = if self.config.detect_outbound_routes_via_dds {
            (context.outbound_routes_of_last_op(), None)
        } else {
            let detected = detect_outbound_routes(&envelope.contents.content);
            (detected.targets, detected.dds_address)
        };
        let from = match &dds_address {
            Some(dds) => format!("/{address}/{dds}"),
            None => format!("/{address}"),
        };
        for target in &targets {
            self.runtime.added_outbound_reference(&from, target);
        }

        self.runtime.gc_node_updated(
            &format!("/{address}"),
            NodeUpdateKind::Changed,
            timestamp_ms,
        )
    }
}
