//! Per-store context: attach lifecycle, lazy realization, GC flags
//!
//! A context owns everything the collection knows about one store. The
//! channel behind it is materialized lazily and at most once; operations
//! that need the channel realize it first (a suspension point). All other
//! state transitions are synchronous.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use weft_core::gc::GarbageCollectionData;
use weft_core::identifiers::{ClientId, DataStoreId};
use weft_core::messages::InnerOp;
use weft_core::snapshot::{DataStoreAttributes, SnapshotTree, ATTRIBUTES_BLOB, GC_DATA_BLOB};
use weft_core::summary::{SummarizeResult, SummaryTree};
use weft_core::{AttachState, BindState, WeftError, WeftResult};

use crate::interfaces::{ChannelRegistry, DataStoreChannel, StorageReader};
use crate::request::{ChannelRequest, ChannelResponse};

/// Where the channel comes from when realized.
#[derive(Clone)]
enum ChannelSource {
    /// A brand new local store; the registry creates a fresh channel.
    New,
    /// Loaded from a snapshot (container load or remote attach).
    Snapshot {
        snapshot: Option<SnapshotTree>,
        storage: Arc<dyn StorageReader>,
    },
}

/// Details of the snapshot a context was constructed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDetails {
    /// Factory path from the registry root.
    pub package_path: Vec<String>,
    /// Whether the snapshot marked the store root.
    pub is_root: bool,
    /// Delivery-group tag, if any.
    pub group_id: Option<String>,
}

struct ContextState {
    package_path: Vec<String>,
    attach_state: AttachState,
    bind_state: BindState,
    /// Root per the snapshot attributes.
    snapshot_root: bool,
    /// Root because an alias committed this session.
    in_memory_root: bool,
    tombstoned: bool,
    deleted: bool,
    loaded: bool,
    /// The local attach op for this store has been submitted.
    attach_op_fired: bool,
    group_id: Option<String>,
    /// Used-routes delivered before realization, applied on realize.
    pending_used_routes: Option<Vec<String>>,
    source: ChannelSource,
}

/// One data store's context.
pub struct DataStoreContext {
    id: DataStoreId,
    registry: Arc<dyn ChannelRegistry>,
    channel: OnceCell<Arc<dyn DataStoreChannel>>,
    state: Mutex<ContextState>,
}

impl std::fmt::Debug for DataStoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStoreContext")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl DataStoreContext {
    /// A locally created store: detached, unbound, no channel yet.
    pub fn new_local(
        id: DataStoreId,
        package_path: Vec<String>,
        registry: Arc<dyn ChannelRegistry>,
    ) -> Self {
        Self {
            id,
            registry,
            channel: OnceCell::new(),
            state: Mutex::new(ContextState {
                package_path,
                attach_state: AttachState::Detached,
                bind_state: BindState::Unbound,
                snapshot_root: false,
                in_memory_root: false,
                tombstoned: false,
                deleted: false,
                loaded: false,
                attach_op_fired: false,
                group_id: None,
                pending_used_routes: None,
                source: ChannelSource::New,
            }),
        }
    }

    /// A store arriving through a remote attach op: attached immediately.
    pub fn new_remote(
        id: DataStoreId,
        package_path: Vec<String>,
        is_root: bool,
        snapshot: Option<SnapshotTree>,
        storage: Arc<dyn StorageReader>,
        registry: Arc<dyn ChannelRegistry>,
    ) -> Self {
        let group_id = snapshot.as_ref().and_then(|tree| tree.group_id.clone());
        Self {
            id,
            registry,
            channel: OnceCell::new(),
            state: Mutex::new(ContextState {
                package_path,
                attach_state: AttachState::Attached,
                bind_state: BindState::Bound,
                snapshot_root: is_root,
                in_memory_root: false,
                tombstoned: false,
                deleted: false,
                loaded: false,
                attach_op_fired: false,
                group_id,
                pending_used_routes: None,
                source: ChannelSource::Snapshot { snapshot, storage },
            }),
        }
    }

    /// A store recreated from a stashed attach op: bound, attach in
    /// flight again, awaiting the replayed op's ack.
    pub fn new_stashed(
        id: DataStoreId,
        package_path: Vec<String>,
        snapshot: Option<SnapshotTree>,
        storage: Arc<dyn StorageReader>,
        registry: Arc<dyn ChannelRegistry>,
    ) -> Self {
        let group_id = snapshot.as_ref().and_then(|tree| tree.group_id.clone());
        Self {
            id,
            registry,
            channel: OnceCell::new(),
            state: Mutex::new(ContextState {
                package_path,
                attach_state: AttachState::Attaching,
                bind_state: BindState::Bound,
                snapshot_root: false,
                in_memory_root: false,
                tombstoned: false,
                deleted: false,
                loaded: false,
                attach_op_fired: true,
                group_id,
                pending_used_routes: None,
                source: ChannelSource::Snapshot { snapshot, storage },
            }),
        }
    }

    /// A store loaded from the container's base snapshot.
    pub fn from_snapshot(
        id: DataStoreId,
        subtree: SnapshotTree,
        storage: Arc<dyn StorageReader>,
        registry: Arc<dyn ChannelRegistry>,
    ) -> WeftResult<Self> {
        let attributes = match subtree.get_blob(ATTRIBUTES_BLOB) {
            Some(blob) => DataStoreAttributes::from_blob(blob)?,
            None => {
                return Err(WeftError::data_corruption(format!(
                    "store {id} snapshot has no {ATTRIBUTES_BLOB} blob"
                )))
            }
        };
        let group_id = subtree.group_id.clone();
        Ok(Self {
            id,
            registry,
            channel: OnceCell::new(),
            state: Mutex::new(ContextState {
                package_path: attributes.pkg,
                attach_state: AttachState::Attached,
                bind_state: BindState::Bound,
                snapshot_root: attributes.is_root_data_store,
                in_memory_root: false,
                tombstoned: false,
                deleted: false,
                loaded: false,
                attach_op_fired: false,
                group_id,
                pending_used_routes: None,
                source: ChannelSource::Snapshot {
                    snapshot: Some(subtree),
                    storage,
                },
            }),
        })
    }

    /// Internal id.
    pub fn id(&self) -> &DataStoreId {
        &self.id
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, ContextState> {
        self.state.lock().expect("context state poisoned")
    }

    fn ensure_live(&self) -> WeftResult<()> {
        if self.locked().deleted {
            Err(WeftError::data_processing(format!(
                "operation on deleted store {}",
                self.id
            )))
        } else {
            Ok(())
        }
    }

    /// Current attach state.
    pub fn attach_state(&self) -> AttachState {
        self.locked().attach_state
    }

    /// Current binding.
    pub fn bind_state(&self) -> BindState {
        self.locked().bind_state
    }

    /// Whether the store is root: aliased this session or marked root in
    /// its snapshot.
    pub fn is_root(&self) -> bool {
        let state = self.locked();
        state.in_memory_root || state.snapshot_root
    }

    /// Whether the channel has been realized.
    pub fn is_loaded(&self) -> bool {
        self.locked().loaded
    }

    /// GC tombstone flag.
    pub fn is_tombstoned(&self) -> bool {
        self.locked().tombstoned
    }

    /// Whether the context was deleted by sweep.
    pub fn is_deleted(&self) -> bool {
        self.locked().deleted
    }

    /// Whether the local attach op has been submitted.
    pub fn attach_op_fired(&self) -> bool {
        self.locked().attach_op_fired
    }

    /// Details recorded from the construction snapshot.
    pub fn initial_snapshot_details(&self) -> SnapshotDetails {
        let state = self.locked();
        SnapshotDetails {
            package_path: state.package_path.clone(),
            is_root: state.snapshot_root,
            group_id: state.group_id.clone(),
        }
    }

    /// Last element of the package path: the attach message type.
    pub fn package_type(&self) -> String {
        self.locked()
            .package_path
            .last()
            .cloned()
            .unwrap_or_default()
    }

    /// Mark the store root in memory (alias commit).
    pub fn set_in_memory_root(&self) {
        self.locked().in_memory_root = true;
    }

    /// Monotone attach-state transition. Reverse moves are internal errors.
    pub fn set_attach_state(&self, next: AttachState) -> WeftResult<()> {
        let mut state = self.locked();
        if !state.attach_state.can_transition_to(next) {
            return Err(WeftError::internal(format!(
                "store {}: illegal attach transition {:?} -> {next:?}",
                self.id, state.attach_state
            )));
        }
        state.attach_state = next;
        Ok(())
    }

    /// Mark the graph bound. The table move is the caller's job.
    pub fn set_bound(&self) {
        self.locked().bind_state = BindState::Bound;
    }

    /// Record that the local attach op went out.
    pub fn set_attach_op_fired(&self) {
        self.locked().attach_op_fired = true;
    }

    /// Roll back a not-yet-sequenced local attach: the store reverts to
    /// unbound and detached. The one exception to attach monotonicity.
    pub fn rollback_attach(&self) {
        let mut state = self.locked();
        state.attach_state = AttachState::Detached;
        state.bind_state = BindState::Unbound;
        state.attach_op_fired = false;
    }

    /// GC tombstone flag write-through.
    pub fn set_tombstone(&self, tombstoned: bool) {
        self.locked().tombstoned = tombstoned;
    }

    /// Mark deleted. The table removal is the caller's job.
    pub fn delete(&self) {
        self.locked().deleted = true;
    }

    /// Materialize the channel. Idempotent; concurrent callers share one
    /// realization.
    pub async fn realize(&self) -> WeftResult<Arc<dyn DataStoreChannel>> {
        self.ensure_live()?;
        let channel = self
            .channel
            .get_or_try_init(|| async {
                let (package_path, source) = {
                    let state = self.locked();
                    (state.package_path.clone(), state.source.clone())
                };
                debug!(store_id = %self.id, "realizing channel");
                match source {
                    ChannelSource::New => {
                        self.registry.create_channel(&package_path, &self.id).await
                    }
                    ChannelSource::Snapshot { snapshot, storage } => {
                        self.registry
                            .load_channel(&package_path, &self.id, snapshot, storage)
                            .await
                    }
                }
            })
            .await?
            .clone();
        let deferred = {
            let mut state = self.locked();
            state.loaded = true;
            state.pending_used_routes.take()
        };
        if let Some(routes) = deferred {
            channel.update_used_routes(&routes).await;
        }
        Ok(channel)
    }

    /// Apply a sequenced op, realizing the channel first if needed.
    pub async fn process(
        &self,
        op: &InnerOp,
        local: bool,
        local_metadata: Option<&Value>,
    ) -> WeftResult<()> {
        self.ensure_live()?;
        let channel = self.realize().await?;
        channel.process(op, local, local_metadata).await
    }

    /// Deliver a signal. Signals to unrealized channels are dropped.
    pub fn process_signal(&self, content: &Value, local: bool) {
        match self.channel.get() {
            Some(channel) => channel.process_signal(content, local),
            None => debug!(store_id = %self.id, "signal dropped, channel not realized"),
        }
    }

    /// Apply a stashed op from a previous session.
    pub async fn apply_stashed_op(&self, content: &Value) -> WeftResult<()> {
        self.ensure_live()?;
        let channel = self.realize().await?;
        channel.apply_stashed_op(content).await
    }

    /// Rewrite an unacked op for resubmission.
    pub fn resubmit(&self, op: &InnerOp, local_metadata: Option<&Value>) -> WeftResult<InnerOp> {
        self.ensure_live()?;
        let channel = self.channel.get().ok_or_else(|| {
            WeftError::internal(format!("store {}: resubmit before realization", self.id))
        })?;
        channel.resubmit(op, local_metadata)
    }

    /// Undo the local effects of an unacked op.
    pub fn rollback(&self, op: &InnerOp, local_metadata: Option<&Value>) -> WeftResult<()> {
        self.ensure_live()?;
        let channel = self.channel.get().ok_or_else(|| {
            WeftError::internal(format!("store {}: rollback before realization", self.id))
        })?;
        channel.rollback(op, local_metadata)
    }

    /// Connection state fan-in. Unrealized channels have nothing to tell.
    pub fn set_connection_state(&self, connected: bool, client_id: Option<&ClientId>) {
        if let Some(channel) = self.channel.get() {
            channel.set_connection_state(connected, client_id);
        }
    }

    /// Summarize this store.
    ///
    /// An unrealized snapshot-loaded store's portion of the base snapshot
    /// is reused verbatim; otherwise the channel summarizes itself
    /// (realizing first if needed) and the context adds the
    /// `.attributes` blob.
    pub async fn summarize(
        &self,
        full_tree: bool,
        track_state: bool,
    ) -> WeftResult<SummarizeResult> {
        self.ensure_live()?;
        if self.channel.get().is_none() {
            if let Some(subtree) = self.base_snapshot() {
                return Ok(SummarizeResult::from_tree(SummaryTree::from(&subtree)));
            }
        }
        let channel = self.realize().await?;
        let mut result = channel.summarize(full_tree, track_state).await?;
        result
            .summary
            .add_blob(ATTRIBUTES_BLOB, self.attributes().to_blob());
        Ok(SummarizeResult::from_tree(result.summary))
    }

    /// Initial state for this store's attach message.
    pub async fn attach_data(&self, include_gc_data: bool) -> WeftResult<SnapshotTree> {
        self.ensure_live()?;
        let channel = self.realize().await?;
        let mut summary = channel.attach_summary().summary;
        summary.add_blob(ATTRIBUTES_BLOB, self.attributes().to_blob());
        if include_gc_data {
            let gc_data = channel.get_gc_data(false).await?;
            let blob = serde_json::to_string(&gc_data).map_err(|err| {
                WeftError::internal(format!("gc data serialization failed: {err}"))
            })?;
            summary.add_blob(GC_DATA_BLOB, blob);
        }
        Ok(summary.to_snapshot())
    }

    /// GC nodes and routes of this store, ids still store-relative.
    pub async fn get_gc_data(&self, full_gc: bool) -> WeftResult<GarbageCollectionData> {
        self.ensure_live()?;
        let channel = self.realize().await?;
        channel.get_gc_data(full_gc).await
    }

    /// Used-route write-through. Deferred until realization when the
    /// channel is not yet loaded.
    pub async fn update_used_routes(&self, routes: Vec<String>) {
        let channel = {
            match self.channel.get() {
                Some(channel) => channel.clone(),
                None => {
                    self.locked().pending_used_routes = Some(routes);
                    return;
                }
            }
        };
        channel.update_used_routes(&routes).await;
    }

    /// Serve a sub-request below this store.
    pub async fn request(&self, request: &ChannelRequest) -> WeftResult<ChannelResponse> {
        self.ensure_live()?;
        let channel = self.realize().await?;
        channel.request(request).await
    }

    /// Routes the channel discovered in the op it just processed. Only
    /// meaningful when detection is delegated to the store.
    pub fn outbound_routes_of_last_op(&self) -> Vec<String> {
        self.channel
            .get()
            .map(|channel| channel.outbound_routes_of_last_op())
            .unwrap_or_default()
    }

    fn attributes(&self) -> DataStoreAttributes {
        let state = self.locked();
        DataStoreAttributes {
            pkg: state.package_path.clone(),
            is_root_data_store: state.in_memory_root || state.snapshot_root,
        }
    }

    fn base_snapshot(&self) -> Option<SnapshotTree> {
        match &self.locked().source {
            ChannelSource::Snapshot { snapshot, .. } => snapshot.clone(),
            ChannelSource::New => None,
        }
    }
}
