//! Test doubles for the weft channel collection.
//!
//! [`MockRuntime`] records everything the collection submits upward and
//! plays the container runtime's roles (attach state, id generation, the
//! GC sink). [`MockRegistry`] hands out [`MockChannel`]s, which record
//! everything routed into them and serve configurable state. Snapshot
//! fixtures build the persisted store layout.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use weft_core::gc::{GarbageCollectionData, NodeUpdateKind};
use weft_core::identifiers::{ClientId, DataStoreId};
use weft_core::messages::{ContainerMessage, InnerOp, SignalEnvelope};
use weft_core::snapshot::{
    DataStoreAttributes, SnapshotEntry, SnapshotTree, ATTRIBUTES_BLOB,
};
use weft_core::summary::{SummarizeResult, SummaryTree};
use weft_core::{AttachState, WeftError, WeftResult};

use weft_datastore::interfaces::{
    ChannelRegistry, ContainerRuntime, DataStoreChannel, DocumentUniqueId, StorageReader,
};
use weft_datastore::request::{ChannelRequest, ChannelResponse};

// =============================================================================
// Storage
// =============================================================================

/// In-memory blob storage.
#[derive(Default)]
pub struct MemoryStorage {
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a blob.
    pub fn put_blob(&self, path: impl Into<String>, contents: impl Into<String>) {
        self.blobs
            .lock()
            .unwrap()
            .insert(path.into(), contents.into());
    }
}

#[async_trait]
impl StorageReader for MemoryStorage {
    async fn read_blob(&self, path: &str) -> WeftResult<String> {
        self.blobs
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| WeftError::not_found(path.to_string()))
    }
}

/// A recorded GC node update.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpdate {
    pub path: String,
    pub kind: NodeUpdateKind,
    pub timestamp_ms: Option<u64>,
}

// =============================================================================
// Container runtime
// =============================================================================

/// Container runtime double: records submissions, plays attach state and
/// id generation.
pub struct MockRuntime {
    attach_state: Mutex<AttachState>,
    storage: Arc<MemoryStorage>,
    next_numeric_id: AtomicU64,
    uuid_ids: Mutex<Vec<uuid::Uuid>>,
    submitted: Mutex<Vec<(ContainerMessage, Option<Value>)>>,
    signals: Mutex<Vec<(SignalEnvelope, Option<ClientId>)>>,
    gc_edges: Mutex<Vec<(String, String)>>,
    node_updates: Mutex<Vec<NodeUpdate>>,
    created_summarizer_nodes: Mutex<Vec<DataStoreId>>,
    deleted_summarizer_nodes: Mutex<Vec<DataStoreId>>,
}

impl MockRuntime {
    /// A runtime in the given attach state.
    pub fn new(attach_state: AttachState) -> Self {
        Self {
            attach_state: Mutex::new(attach_state),
            storage: Arc::new(MemoryStorage::new()),
            next_numeric_id: AtomicU64::new(0),
            uuid_ids: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            signals: Mutex::new(Vec::new()),
            gc_edges: Mutex::new(Vec::new()),
            node_updates: Mutex::new(Vec::new()),
            created_summarizer_nodes: Mutex::new(Vec::new()),
            deleted_summarizer_nodes: Mutex::new(Vec::new()),
        }
    }

    /// An attached runtime.
    pub fn attached() -> Arc<Self> {
        Arc::new(Self::new(AttachState::Attached))
    }

    /// A detached runtime.
    pub fn detached() -> Arc<Self> {
        Arc::new(Self::new(AttachState::Detached))
    }

    /// Flip the attach state.
    pub fn set_attach_state(&self, state: AttachState) {
        *self.attach_state.lock().unwrap() = state;
    }

    /// The in-memory storage behind [`ContainerRuntime::storage`].
    pub fn memory_storage(&self) -> Arc<MemoryStorage> {
        self.storage.clone()
    }

    /// Queue a uuid to be returned by the next unique-id generation.
    pub fn queue_uuid(&self, uuid: uuid::Uuid) {
        self.uuid_ids.lock().unwrap().push(uuid);
    }

    /// Drain everything submitted so far.
    pub fn take_submitted(&self) -> Vec<(ContainerMessage, Option<Value>)> {
        std::mem::take(&mut self.submitted.lock().unwrap())
    }

    /// Submitted messages without draining.
    pub fn submitted_messages(&self) -> Vec<ContainerMessage> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .map(|(message, _)| message.clone())
            .collect()
    }

    /// Submitted signals.
    pub fn submitted_signals(&self) -> Vec<(SignalEnvelope, Option<ClientId>)> {
        self.signals.lock().unwrap().clone()
    }

    /// All outbound references reported so far.
    pub fn gc_edges(&self) -> Vec<(String, String)> {
        self.gc_edges.lock().unwrap().clone()
    }

    /// All node updates reported so far.
    pub fn node_updates(&self) -> Vec<NodeUpdate> {
        self.node_updates.lock().unwrap().clone()
    }

    /// Summarizer-node children created so far.
    pub fn created_summarizer_nodes(&self) -> Vec<DataStoreId> {
        self.created_summarizer_nodes.lock().unwrap().clone()
    }

    /// Summarizer-node children deleted so far.
    pub fn deleted_summarizer_nodes(&self) -> Vec<DataStoreId> {
        self.deleted_summarizer_nodes.lock().unwrap().clone()
    }
}

impl ContainerRuntime for MockRuntime {
    fn attach_state(&self) -> AttachState {
        *self.attach_state.lock().unwrap()
    }

    fn submit_message(&self, message: ContainerMessage, local_metadata: Option<Value>) {
        self.submitted
            .lock()
            .unwrap()
            .push((message, local_metadata));
    }

    fn submit_signal(&self, envelope: SignalEnvelope, target_client: Option<ClientId>) {
        self.signals.lock().unwrap().push((envelope, target_client));
    }

    fn storage(&self) -> Arc<dyn StorageReader> {
        self.storage.clone()
    }

    fn generate_document_unique_id(&self) -> DocumentUniqueId {
        if let Some(uuid) = self.uuid_ids.lock().unwrap().pop() {
            return DocumentUniqueId::Uuid(uuid);
        }
        DocumentUniqueId::Number(self.next_numeric_id.fetch_add(1, Ordering::SeqCst))
    }

    fn added_outbound_reference(&self, from_path: &str, to_path: &str) {
        self.gc_edges
            .lock()
            .unwrap()
            .push((from_path.to_string(), to_path.to_string()));
    }

    fn gc_node_updated(
        &self,
        path: &str,
        kind: NodeUpdateKind,
        timestamp_ms: Option<u64>,
    ) -> WeftResult<()> {
        self.node_updates.lock().unwrap().push(NodeUpdate {
            path: path.to_string(),
            kind,
            timestamp_ms,
        });
        Ok(())
    }

    fn create_child_summarizer_node(&self, id: &DataStoreId) {
        self.created_summarizer_nodes.lock().unwrap().push(id.clone());
    }

    fn delete_child_summarizer_node(&self, id: &DataStoreId) {
        self.deleted_summarizer_nodes.lock().unwrap().push(id.clone());
    }
}

// =============================================================================
// Channels and registry
// =============================================================================

/// Channel double: records everything routed in, serves configured state.
pub struct MockChannel {
    id: DataStoreId,
    state_blobs: Mutex<BTreeMap<String, String>>,
    gc_data: Mutex<GarbageCollectionData>,
    processed: Mutex<Vec<(InnerOp, bool)>>,
    signals: Mutex<Vec<Value>>,
    stashed: Mutex<Vec<Value>>,
    used_routes: Mutex<Vec<Vec<String>>>,
    connection_events: Mutex<Vec<(bool, Option<ClientId>)>>,
    requests: Mutex<Vec<ChannelRequest>>,
}

impl MockChannel {
    /// A channel with no state.
    pub fn new(id: DataStoreId) -> Arc<Self> {
        Arc::new(Self {
            id,
            state_blobs: Mutex::new(BTreeMap::new()),
            gc_data: Mutex::new(GarbageCollectionData::new()),
            processed: Mutex::new(Vec::new()),
            signals: Mutex::new(Vec::new()),
            stashed: Mutex::new(Vec::new()),
            used_routes: Mutex::new(Vec::new()),
            connection_events: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Add a state blob served by summaries and attach data.
    pub fn put_blob(&self, name: impl Into<String>, contents: impl Into<String>) {
        self.state_blobs
            .lock()
            .unwrap()
            .insert(name.into(), contents.into());
    }

    /// Set the GC nodes reported by this channel (store-relative ids).
    pub fn set_gc_node(&self, path: impl Into<String>, routes: Vec<String>) {
        self.gc_data.lock().unwrap().add_node(path, routes);
    }

    /// Ops processed so far.
    pub fn processed_ops(&self) -> Vec<(InnerOp, bool)> {
        self.processed.lock().unwrap().clone()
    }

    /// Signals delivered so far.
    pub fn delivered_signals(&self) -> Vec<Value> {
        self.signals.lock().unwrap().clone()
    }

    /// Used-route updates received so far.
    pub fn used_route_updates(&self) -> Vec<Vec<String>> {
        self.used_routes.lock().unwrap().clone()
    }

    /// Connection state changes received so far.
    pub fn connection_events(&self) -> Vec<(bool, Option<ClientId>)> {
        self.connection_events.lock().unwrap().clone()
    }

    /// Requests forwarded to this channel so far.
    pub fn received_requests(&self) -> Vec<ChannelRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn state_summary(&self) -> SummarizeResult {
        let mut tree = SummaryTree::new();
        for (name, contents) in self.state_blobs.lock().unwrap().iter() {
            tree.add_blob(name.clone(), contents.clone());
        }
        SummarizeResult::from_tree(tree)
    }
}

#[async_trait]
impl DataStoreChannel for MockChannel {
    async fn process(
        &self,
        op: &InnerOp,
        local: bool,
        _local_metadata: Option<&Value>,
    ) -> WeftResult<()> {
        self.processed.lock().unwrap().push((op.clone(), local));
        Ok(())
    }

    fn process_signal(&self, content: &Value, _local: bool) {
        self.signals.lock().unwrap().push(content.clone());
    }

    async fn apply_stashed_op(&self, content: &Value) -> WeftResult<()> {
        self.stashed.lock().unwrap().push(content.clone());
        Ok(())
    }

    fn resubmit(&self, op: &InnerOp, _local_metadata: Option<&Value>) -> WeftResult<InnerOp> {
        Ok(op.clone())
    }

    fn rollback(&self, _op: &InnerOp, _local_metadata: Option<&Value>) -> WeftResult<()> {
        Ok(())
    }

    async fn summarize(&self, _full_tree: bool, _track_state: bool) -> WeftResult<SummarizeResult> {
        Ok(self.state_summary())
    }

    fn attach_summary(&self) -> SummarizeResult {
        self.state_summary()
    }

    async fn get_gc_data(&self, _full_gc: bool) -> WeftResult<GarbageCollectionData> {
        Ok(self.gc_data.lock().unwrap().clone())
    }

    async fn update_used_routes(&self, routes: &[String]) {
        self.used_routes.lock().unwrap().push(routes.to_vec());
    }

    async fn request(&self, request: &ChannelRequest) -> WeftResult<ChannelResponse> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(ChannelResponse::ok(json!({
            "id": self.id.as_str(),
            "url": request.url,
        })))
    }

    fn set_connection_state(&self, connected: bool, client_id: Option<&ClientId>) {
        self.connection_events
            .lock()
            .unwrap()
            .push((connected, client_id.cloned()));
    }
}

/// Registry double handing out [`MockChannel`]s.
///
/// Channels can be prepared ahead of realization to preconfigure their
/// state; every channel ever handed out stays reachable by id.
#[derive(Default)]
pub struct MockRegistry {
    prepared: Mutex<HashMap<String, Arc<MockChannel>>>,
    realized: Mutex<HashMap<String, Arc<MockChannel>>>,
    loads: Mutex<Vec<(DataStoreId, Vec<String>, bool)>>,
}

impl MockRegistry {
    /// An empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Preconfigure the channel a store will realize into.
    pub fn prepare(&self, channel: Arc<MockChannel>) {
        self.prepared
            .lock()
            .unwrap()
            .insert(channel.id.as_str().to_string(), channel);
    }

    /// The channel a store realized into, if it has.
    pub fn channel(&self, id: &DataStoreId) -> Option<Arc<MockChannel>> {
        self.realized.lock().unwrap().get(id.as_str()).cloned()
    }

    /// `(id, package_path, had_snapshot)` of every realization so far.
    pub fn realizations(&self) -> Vec<(DataStoreId, Vec<String>, bool)> {
        self.loads.lock().unwrap().clone()
    }

    fn hand_out(
        &self,
        id: &DataStoreId,
        package_path: &[String],
        had_snapshot: bool,
    ) -> Arc<MockChannel> {
        let channel = self
            .prepared
            .lock()
            .unwrap()
            .remove(id.as_str())
            .unwrap_or_else(|| MockChannel::new(id.clone()));
        self.realized
            .lock()
            .unwrap()
            .insert(id.as_str().to_string(), channel.clone());
        self.loads
            .lock()
            .unwrap()
            .push((id.clone(), package_path.to_vec(), had_snapshot));
        channel
    }
}

#[async_trait]
impl ChannelRegistry for MockRegistry {
    async fn create_channel(
        &self,
        package_path: &[String],
        id: &DataStoreId,
    ) -> WeftResult<Arc<dyn DataStoreChannel>> {
        Ok(self.hand_out(id, package_path, false))
    }

    async fn load_channel(
        &self,
        package_path: &[String],
        id: &DataStoreId,
        snapshot: Option<SnapshotTree>,
        _storage: Arc<dyn StorageReader>,
    ) -> WeftResult<Arc<dyn DataStoreChannel>> {
        Ok(self.hand_out(id, package_path, snapshot.is_some()))
    }
}

/// Build a persisted store sub-tree: an `.attributes` blob plus channel
/// blobs.
pub fn store_snapshot(pkg: &[&str], is_root: bool, blobs: &[(&str, &str)]) -> SnapshotTree {
    let attributes = DataStoreAttributes {
        pkg: pkg.iter().map(|part| part.to_string()).collect(),
        is_root_data_store: is_root,
    };
    let mut entries = vec![SnapshotEntry::Blob {
        path: ATTRIBUTES_BLOB.to_string(),
        contents: attributes.to_blob(),
    }];
    for (name, contents) in blobs {
        entries.push(SnapshotEntry::Blob {
            path: name.to_string(),
            contents: contents.to_string(),
        });
    }
    SnapshotTree::new(entries)
}
