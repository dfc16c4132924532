//! Runtime configuration flags
//!
//! Flags arrive from the host's configuration provider; absent values keep
//! the defaults below.

use serde::{Deserialize, Serialize};

/// Configuration of the channel collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectionConfig {
    /// When true, outbound-handle detection in op payloads is delegated to
    /// the addressed store; false (the default) keeps detection in the
    /// collection's op pipeline.
    #[serde(rename = "detectOutboundRoutesViaDDS")]
    pub detect_outbound_routes_via_dds: bool,

    /// When true, an op addressed to a deleted store is a data corruption
    /// error; false (the default) drops the op with error telemetry.
    pub throw_on_deleted_op: bool,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            detect_outbound_routes_via_dds: false,
            throw_on_deleted_op: false,
        }
    }
}
