//! External interface traits
//!
//! The collection talks upward to the container runtime (op submission,
//! storage, id generation, the GC sink, summarizer-node bookkeeping) and
//! downward to the per-store channels. Both directions are trait objects;
//! the collection never constructs either side itself.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use weft_core::gc::{GarbageCollectionData, NodeUpdateKind};
use weft_core::identifiers::{ClientId, DataStoreId};
use weft_core::messages::{ContainerMessage, InnerOp, SignalEnvelope};
use weft_core::snapshot::SnapshotTree;
use weft_core::summary::SummarizeResult;
use weft_core::{AttachState, WeftResult};

use crate::request::{ChannelRequest, ChannelResponse};

// =============================================================================
// Upstream: the container runtime
// =============================================================================

/// An id handed out by the container's id compressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentUniqueId {
    /// A compact numeric id.
    Number(u64),
    /// A full uuid, used verbatim.
    Uuid(uuid::Uuid),
}

/// The outer container runtime, as seen by the channel collection.
pub trait ContainerRuntime: Send + Sync {
    /// Current attach state of the container itself.
    fn attach_state(&self) -> AttachState;

    /// Submit a container-level message to the ordering service.
    ///
    /// `local_metadata` round-trips back through [`resubmit`] and
    /// [`rollback`] paths but never reaches the wire.
    ///
    /// [`resubmit`]: crate::ChannelCollection::resubmit
    /// [`rollback`]: crate::ChannelCollection::rollback
    fn submit_message(&self, message: ContainerMessage, local_metadata: Option<Value>);

    /// Submit a signal, optionally targeted at one client.
    fn submit_signal(&self, envelope: SignalEnvelope, target_client: Option<ClientId>);

    /// Container storage for blob reads.
    fn storage(&self) -> Arc<dyn StorageReader>;

    /// Generate a document-unique id for a new store.
    fn generate_document_unique_id(&self) -> DocumentUniqueId;

    /// GC sink: a new outbound reference was discovered.
    fn added_outbound_reference(&self, from_path: &str, to_path: &str);

    /// GC sink: a node was loaded or changed.
    ///
    /// May fail when the node is tombstoned and policy forbids its use.
    fn gc_node_updated(
        &self,
        path: &str,
        kind: NodeUpdateKind,
        timestamp_ms: Option<u64>,
    ) -> WeftResult<()>;

    /// Create the summarizer-node child for a new store.
    fn create_child_summarizer_node(&self, id: &DataStoreId);

    /// Delete the summarizer-node child of a deleted store.
    fn delete_child_summarizer_node(&self, id: &DataStoreId);
}

/// Blob reads against container storage.
#[async_trait]
pub trait StorageReader: Send + Sync {
    /// Read a blob by `/`-joined path.
    async fn read_blob(&self, path: &str) -> WeftResult<String>;
}

// =============================================================================
// Downstream: data-store channels
// =============================================================================

/// A loaded data-store channel: the per-store implementation the
/// collection routes into.
#[async_trait]
pub trait DataStoreChannel: Send + Sync {
    /// Apply a sequenced op.
    async fn process(
        &self,
        op: &InnerOp,
        local: bool,
        local_metadata: Option<&Value>,
    ) -> WeftResult<()>;

    /// Deliver a signal.
    fn process_signal(&self, content: &Value, local: bool);

    /// Apply a stashed op recorded by a previous session.
    async fn apply_stashed_op(&self, content: &Value) -> WeftResult<()>;

    /// Rewrite an unacked op for resubmission after reconnect.
    fn resubmit(&self, op: &InnerOp, local_metadata: Option<&Value>) -> WeftResult<InnerOp>;

    /// Undo the local effects of an unacked op.
    fn rollback(&self, op: &InnerOp, local_metadata: Option<&Value>) -> WeftResult<()>;

    /// Summarize current state.
    async fn summarize(&self, full_tree: bool, track_state: bool) -> WeftResult<SummarizeResult>;

    /// Initial state for the attach message of a new local store.
    fn attach_summary(&self) -> SummarizeResult;

    /// GC nodes and outbound routes, ids relative to this store.
    async fn get_gc_data(&self, full_gc: bool) -> WeftResult<GarbageCollectionData>;

    /// Used-route update from the latest GC run (empty when unused).
    async fn update_used_routes(&self, routes: &[String]);

    /// Serve a sub-request below this store.
    async fn request(&self, request: &ChannelRequest) -> WeftResult<ChannelResponse>;

    /// Connection state change fan-in.
    fn set_connection_state(&self, connected: bool, client_id: Option<&ClientId>);

    /// Routes this channel discovered in an op it just processed.
    ///
    /// Only consulted when detection is delegated to the store by
    /// configuration; the default pipeline detection ignores it.
    fn outbound_routes_of_last_op(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Resolves package paths to channel instances.
#[async_trait]
pub trait ChannelRegistry: Send + Sync {
    /// Instantiate a brand new channel for a locally created store.
    async fn create_channel(
        &self,
        package_path: &[String],
        id: &DataStoreId,
    ) -> WeftResult<Arc<dyn DataStoreChannel>>;

    /// Load a channel from an existing snapshot.
    async fn load_channel(
        &self,
        package_path: &[String],
        id: &DataStoreId,
        snapshot: Option<SnapshotTree>,
        storage: Arc<dyn StorageReader>,
    ) -> WeftResult<Arc<dyn DataStoreChannel>>;
}

/// What user code hands to `create_data_store`: either a raw shared-object
/// kind or a composed data object with a full factory path.
///
/// A closed sum, so resolution is a match, not a duck-type probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectClass {
    /// A single shared-object kind registered under one type string.
    SharedObject {
        /// Registered factory type.
        factory_type: String,
    },
    /// A composed data object addressed by its full factory path.
    DataObject {
        /// Factory path from the registry root.
        package_path: Vec<String>,
    },
}

impl ObjectClass {
    /// Factory path from the registry root.
    pub fn package_path(&self) -> Vec<String> {
        match self {
            ObjectClass::SharedObject { factory_type } => vec![factory_type.clone()],
            ObjectClass::DataObject { package_path } => package_path.clone(),
        }
    }
}
