//! Attach protocol
//!
//! Outbound: a local store becoming visible in a non-detached container
//! serializes its initial state into an attach message and enters the
//! pending-attach set until the op echoes back. Inbound: local acks
//! reconcile the pending set; remote attaches construct a new context
//! whose storage overlays the inline snapshot blobs over container
//! storage.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use weft_core::gc::GarbageCollectionData;
use weft_core::identifiers::DataStoreId;
use weft_core::messages::{AttachMessage, ContainerMessage};
use weft_core::snapshot::{DataStoreAttributes, SnapshotTree, ATTRIBUTES_BLOB, GC_DATA_BLOB};
use weft_core::{AttachState, BindState, WeftError, WeftResult};

use crate::collection::ChannelCollection;
use crate::context::DataStoreContext;
use crate::interfaces::StorageReader;

/// Storage view of a remote attach: blobs inlined in the attach snapshot
/// are served directly, everything else falls through to the container.
pub(crate) struct SnapshotOverlayStorage {
    inline: HashMap<String, String>,
    inner: Arc<dyn StorageReader>,
}

impl SnapshotOverlayStorage {
    pub(crate) fn new(snapshot: Option<&SnapshotTree>, inner: Arc<dyn StorageReader>) -> Self {
        let inline = snapshot
            .map(|tree| tree.flatten_blobs().into_iter().collect())
            .unwrap_or_default();
        Self { inline, inner }
    }
}

#[async_trait]
impl StorageReader for SnapshotOverlayStorage {
    async fn read_blob(&self, path: &str) -> WeftResult<String> {
        match self.inline.get(path) {
            Some(contents) => Ok(contents.clone()),
            None => self.inner.read_blob(path).await,
        }
    }
}

impl ChannelCollection {
    /// Make a local store visible.
    ///
    /// Binds the store; in a non-detached container this also fires the
    /// attach op. Idempotent for already-visible stores.
    pub async fn make_visible(&self, id: &DataStoreId) -> WeftResult<()> {
        self.ensure_not_disposed()?;
        let context = self
            .contexts
            .get(id)
            .ok_or_else(|| WeftError::usage(format!("unknown store {id}")))?;
        if context.bind_state() == BindState::Bound {
            return Ok(());
        }
        self.contexts.bind(id);
        context.set_bound();
        if self.runtime.attach_state() != AttachState::Detached {
            self.submit_attach_op(&context).await?;
        }
        Ok(())
    }

    async fn submit_attach_op(&self, context: &Arc<DataStoreContext>) -> WeftResult<()> {
        let id = context.id().clone();
        let snapshot = context.attach_data(true).await?;
        context.set_attach_state(AttachState::Attaching)?;
        context.set_attach_op_fired();
        self.locked_pending_attach().insert(id.clone());
        debug!(store_id = %id, "submitting attach op");
        self.runtime.submit_message(
            ContainerMessage::Attach(AttachMessage {
                id,
                package_type: context.package_type(),
                snapshot: Some(snapshot),
            }),
            None,
        );
        Ok(())
    }

    /// Roll back a not-yet-sequenced local attach op: the pending entry is
    /// cleared and the store reverts to unbound.
    pub(crate) fn rollback_attach_op(&self, id: &DataStoreId) -> WeftResult<()> {
        if !self.locked_pending_attach().remove(id) {
            return Err(WeftError::internal(format!(
                "attach rollback for {id} without pending entry"
            )));
        }
        let context = self
            .contexts
            .revert_to_unbound(id)
            .ok_or_else(|| WeftError::internal(format!("attach rollback for unbound {id}")))?;
        context.rollback_attach();
        Ok(())
    }

    /// Process an inbound attach op.
    pub(crate) async fn process_attach(&self, message: &AttachMessage, local: bool) -> WeftResult<()> {
        let id = message.id.clone();
        self.locked_new_since_last_gc().push(id.clone());
        self.emit_attach_gc_references(&id, message.snapshot.as_ref())?;

        if !self.attach_sample_fired.swap(true, Ordering::SeqCst) {
            info!(
                store_id = %id,
                package_type = %message.package_type,
                local,
                "first attach processed"
            );
        }

        if local {
            if !self.locked_pending_attach().remove(&id) {
                return Err(WeftError::internal(format!(
                    "local attach ack for {id} without pending entry"
                )));
            }
            let context = self.contexts.get(&id).ok_or_else(|| {
                WeftError::internal(format!("local attach ack for unknown store {id}"))
            })?;
            context.set_attach_state(AttachState::Attached)?;
            debug!(store_id = %id, "local attach acked");
            return Ok(());
        }

        if self.already_processed(id.as_str()) {
            return Err(WeftError::data_corruption(format!(
                "duplicate data store attach for {id}"
            )));
        }
        let context = self.remote_context_from_attach(&id, message)?;
        self.contexts.add_bound_or_remoted(Arc::new(context));
        self.runtime.create_child_summarizer_node(&id);
        debug!(store_id = %id, "remote store attached");
        Ok(())
    }

    /// Recreate a local pending store from a stashed attach op. The
    /// replayed op's ack completes the attach as usual.
    pub(crate) async fn apply_stashed_attach(&self, message: &AttachMessage) -> WeftResult<()> {
        let id = message.id.clone();
        if self.already_processed(id.as_str()) {
            return Err(WeftError::data_corruption(format!(
                "stashed attach for existing store {id}"
            )));
        }
        let (package_path, _) = attach_snapshot_details(message)?;
        let storage = Arc::new(SnapshotOverlayStorage::new(
            message.snapshot.as_ref(),
            self.runtime.storage(),
        ));
        let context = DataStoreContext::new_stashed(
            id.clone(),
            package_path,
            message.snapshot.clone(),
            storage,
            self.registry.clone(),
        );
        self.contexts.add_bound_or_remoted(Arc::new(context));
        self.runtime.create_child_summarizer_node(&id);
        self.locked_pending_attach().insert(id);
        Ok(())
    }

    fn remote_context_from_attach(
        &self,
        id: &DataStoreId,
        message: &AttachMessage,
    ) -> WeftResult<DataStoreContext> {
        let (package_path, is_root) = attach_snapshot_details(message)?;
        let storage = Arc::new(SnapshotOverlayStorage::new(
            message.snapshot.as_ref(),
            self.runtime.storage(),
        ));
        Ok(DataStoreContext::new_remote(
            id.clone(),
            package_path,
            is_root,
            message.snapshot.clone(),
            storage,
            self.registry.clone(),
        ))
    }

    /// Walk the attach snapshot's GC payload and report every outbound
    /// route, node ids re-rooted under the new store.
    fn emit_attach_gc_references(
        &self,
        id: &DataStoreId,
        snapshot: Option<&SnapshotTree>,
    ) -> WeftResult<()> {
        let Some(blob) = snapshot.and_then(|tree| tree.get_blob(GC_DATA_BLOB)) else {
            return Ok(());
        };
        let gc_data: GarbageCollectionData = serde_json::from_str(blob).map_err(|err| {
            WeftError::data_corruption(format!("malformed attach gc payload for {id}: {err}"))
        })?;
        for (node, routes) in gc_data.prefixed(id.as_str()).nodes {
            for route in routes {
                self.runtime.added_outbound_reference(&node, &route);
            }
        }
        Ok(())
    }
}

fn attach_snapshot_details(message: &AttachMessage) -> WeftResult<(Vec<String>, bool)> {
    if let Some(blob) = message
        .snapshot
        .as_ref()
        .and_then(|tree| tree.get_blob(ATTRIBUTES_BLOB))
    {
        let attributes = DataStoreAttributes::from_blob(blob)?;
        return Ok((attributes.pkg, attributes.is_root_data_store));
    }
    Ok((vec![message.package_type.clone()], false))
}
