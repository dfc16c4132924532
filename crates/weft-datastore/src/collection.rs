//! The channel collection facade
//!
//! Owns the context table, the alias namespace, and the pending-op
//! bookkeeping. Protocol handling is spread across the sibling modules
//! (`protocols`, `routing`, `gc`, `summary`, `request`); everything shares
//! the state defined here. One collection per container.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use weft_core::identifiers::{Alias, ClientId, DataStoreId};
use weft_core::messages::{ContainerMessage, SignalEnvelope};
use weft_core::snapshot::{SnapshotTree, CHANNELS_TREE, RESERVED_CONTAINER_PATHS};
use weft_core::{CollectionConfig, WeftError, WeftResult};

use crate::context::{ContextTable, DataStoreContext};
use crate::id_allocator;
use crate::interfaces::{ChannelRegistry, ContainerRuntime, ObjectClass};
use crate::protocols::alias::AliasResult;

/// One in-flight local alias op: the store it names and the callers
/// awaiting its outcome.
pub(crate) struct PendingAlias {
    pub target: DataStoreId,
    pub waiters: Vec<oneshot::Sender<AliasResult>>,
}

pub(crate) struct AliasState {
    /// Committed aliases. Injective; every value is a live context id.
    pub aliases: HashMap<Alias, DataStoreId>,
    /// Aliases submitted locally and not yet sequenced. Concurrent local
    /// reservations of one name for different stores each get their own
    /// entry; the sequenced commit arbitrates between them.
    pub pending: HashMap<Alias, Vec<PendingAlias>>,
}

/// The collection of data stores within one container.
pub struct ChannelCollection {
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    pub(crate) registry: Arc<dyn ChannelRegistry>,
    pub(crate) config: CollectionConfig,
    pub(crate) contexts: ContextTable,
    pub(crate) alias_state: Mutex<AliasState>,
    /// Ids whose local attach op is in flight.
    pub(crate) pending_attach: Mutex<HashSet<DataStoreId>>,
    /// Stores attached since the last GC state update.
    pub(crate) new_since_last_gc: Mutex<Vec<DataStoreId>>,
    pub(crate) attach_sample_fired: AtomicBool,
    pub(crate) disposed: AtomicBool,
}

impl std::fmt::Debug for ChannelCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelCollection").finish_non_exhaustive()
    }
}

impl ChannelCollection {
    /// An empty collection for a brand new container.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<dyn ChannelRegistry>,
        config: CollectionConfig,
    ) -> Self {
        Self {
            runtime,
            registry,
            config,
            contexts: ContextTable::new(),
            alias_state: Mutex::new(AliasState {
                aliases: HashMap::new(),
                pending: HashMap::new(),
            }),
            pending_attach: Mutex::new(HashSet::new()),
            new_since_last_gc: Mutex::new(Vec::new()),
            attach_sample_fired: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Load a collection from a container base snapshot.
    ///
    /// Accepts both layouts: the current form keeps stores under a
    /// `.channels` sub-tree; the legacy form keeps store trees directly at
    /// the root, next to the reserved non-store paths.
    pub fn load(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<dyn ChannelRegistry>,
        config: CollectionConfig,
        base_snapshot: Option<&SnapshotTree>,
    ) -> WeftResult<Self> {
        let collection = Self::new(runtime, registry, config);
        let Some(snapshot) = base_snapshot else {
            return Ok(collection);
        };

        let (store_root, legacy) = match snapshot.get_tree(CHANNELS_TREE) {
            Some(channels) => (channels, false),
            None => (snapshot.clone(), true),
        };
        for name in store_root.tree_names() {
            if legacy && RESERVED_CONTAINER_PATHS.contains(&name) {
                continue;
            }
            let subtree = store_root
                .get_tree(name)
                .ok_or_else(|| WeftError::internal(format!("store tree {name} vanished")))?;
            let id = DataStoreId::new(name);
            let context = DataStoreContext::from_snapshot(
                id.clone(),
                subtree,
                collection.runtime.storage(),
                collection.registry.clone(),
            )?;
            collection.contexts.add_bound_or_remoted(Arc::new(context));
            collection.runtime.create_child_summarizer_node(&id);
        }
        debug!(
            stores = collection.contexts.size(),
            legacy, "loaded channel collection from snapshot"
        );
        Ok(collection)
    }

    /// Create a new local data store. It starts unbound and invisible;
    /// call [`make_visible`] (or alias it) to publish it.
    ///
    /// [`make_visible`]: ChannelCollection::make_visible
    pub fn create_data_store(&self, object_class: ObjectClass) -> WeftResult<DataStoreId> {
        self.ensure_not_disposed()?;
        let id = id_allocator::allocate_id(
            self.runtime.attach_state(),
            || self.runtime.generate_document_unique_id(),
            self.contexts.size(),
        );
        let context = DataStoreContext::new_local(
            id.clone(),
            object_class.package_path(),
            self.registry.clone(),
        );
        self.contexts.add_unbound(Arc::new(context));
        self.runtime.create_child_summarizer_node(&id);
        debug!(store_id = %id, "created local data store");
        Ok(id)
    }

    /// Resolve an alias-or-id to an internal id: alias map first, the raw
    /// string second.
    pub fn resolve_internal_id(&self, id_or_alias: &str) -> DataStoreId {
        let state = self.locked_aliases();
        state
            .aliases
            .get(&Alias::new(id_or_alias))
            .cloned()
            .unwrap_or_else(|| DataStoreId::new(id_or_alias))
    }

    /// Committed alias targets, for introspection.
    pub fn alias_target(&self, alias: &Alias) -> Option<DataStoreId> {
        self.locked_aliases().aliases.get(alias).cloned()
    }

    /// Number of contexts, all partitions.
    pub fn size(&self) -> usize {
        self.contexts.size()
    }

    /// The context for an internal id, any partition.
    pub fn get_context(&self, id: &DataStoreId) -> Option<Arc<DataStoreContext>> {
        self.contexts.get(id)
    }

    /// Ids whose local attach op is in flight, sorted.
    pub fn pending_attach_ids(&self) -> Vec<DataStoreId> {
        let mut ids: Vec<_> = self.locked_pending_attach().iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of unbound contexts.
    pub fn not_bound_length(&self) -> usize {
        self.contexts.not_bound_length()
    }

    /// Submit a signal addressed to one store.
    pub fn submit_signal(
        &self,
        address: DataStoreId,
        content: Value,
        target_client: Option<ClientId>,
    ) {
        self.runtime.submit_signal(
            SignalEnvelope {
                address,
                contents: content,
            },
            target_client,
        );
    }

    /// Deliver a signal by envelope address.
    ///
    /// Signals are transient: an unknown or swept address is dropped with
    /// telemetry only.
    pub fn process_signal(&self, envelope: &SignalEnvelope, local: bool) {
        use crate::context::Lookup;
        match self.contexts.lookup_addressable(&envelope.address) {
            Lookup::Found(context) => context.process_signal(&envelope.contents, local),
            Lookup::Deleted => {
                debug!(store_id = %envelope.address, "signal to swept store dropped")
            }
            Lookup::Missing if local => {
                warn!(store_id = %envelope.address, "local signal to unknown store dropped")
            }
            Lookup::Missing => {
                debug!(store_id = %envelope.address, "signal to unknown remote store dropped")
            }
        }
    }

    /// Connection state fan-out to every realized context.
    pub fn set_connection_state(&self, connected: bool, client_id: Option<&ClientId>) {
        for context in self.contexts.contexts() {
            context.set_connection_state(connected, client_id);
        }
    }

    /// Resubmit an unacked message after reconnect.
    pub fn resubmit(
        &self,
        message: &ContainerMessage,
        local_metadata: Option<&Value>,
    ) -> WeftResult<()> {
        self.ensure_not_disposed()?;
        match message {
            ContainerMessage::Attach(_) | ContainerMessage::Alias(_) => {
                // Attach and alias contents are connection-independent.
                self.runtime
                    .submit_message(message.clone(), local_metadata.cloned());
                Ok(())
            }
            ContainerMessage::DataStoreOp(envelope) => {
                let context = self.contexts.get(&envelope.address).ok_or_else(|| {
                    WeftError::internal(format!(
                        "resubmit for unknown store {}",
                        envelope.address
                    ))
                })?;
                let rewritten = context.resubmit(&envelope.contents, local_metadata)?;
                self.runtime.submit_message(
                    ContainerMessage::DataStoreOp(weft_core::Envelope {
                        address: envelope.address.clone(),
                        contents: rewritten,
                    }),
                    local_metadata.cloned(),
                );
                Ok(())
            }
        }
    }

    /// Roll back an unacked local message.
    pub fn rollback(
        &self,
        message: &ContainerMessage,
        local_metadata: Option<&Value>,
    ) -> WeftResult<()> {
        match message {
            ContainerMessage::Attach(attach) => self.rollback_attach_op(&attach.id),
            ContainerMessage::Alias(_) => {
                Err(WeftError::usage("rollback is not supported for alias ops"))
            }
            ContainerMessage::DataStoreOp(envelope) => {
                let context = self.contexts.get(&envelope.address).ok_or_else(|| {
                    WeftError::internal(format!("rollback for unknown store {}", envelope.address))
                })?;
                context.rollback(&envelope.contents, local_metadata)
            }
        }
    }

    /// Apply a stashed message recorded by a previous session.
    pub async fn apply_stashed_op(&self, message: &ContainerMessage) -> WeftResult<()> {
        self.ensure_not_disposed()?;
        match message {
            ContainerMessage::Attach(attach) => self.apply_stashed_attach(attach).await,
            ContainerMessage::Alias(alias) => {
                // Re-mark the alias as in flight; the replayed op commits it.
                let mut state = self.locked_aliases();
                let entries = state.pending.entry(alias.alias.clone()).or_default();
                if !entries.iter().any(|entry| entry.target == alias.internal_id) {
                    entries.push(PendingAlias {
                        target: alias.internal_id.clone(),
                        waiters: Vec::new(),
                    });
                }
                Ok(())
            }
            ContainerMessage::DataStoreOp(envelope) => {
                let context = self.contexts.get(&envelope.address).ok_or_else(|| {
                    WeftError::data_processing(format!(
                        "stashed op for unknown store {}",
                        envelope.address
                    ))
                })?;
                context.apply_stashed_op(&envelope.contents.content).await
            }
        }
    }

    /// Dispose the collection. Idempotent.
    ///
    /// Waiters suspended on the table resolve empty; alias resolutions
    /// still pending fail with a dispose-induced error on the caller side.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.contexts.abort_waiters();
        let pending = {
            let mut state = self.locked_aliases();
            std::mem::take(&mut state.pending)
        };
        // Dropping the senders wakes every waiter with a closed channel.
        drop(pending);
        debug!("channel collection disposed");
    }

    /// Whether dispose has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_not_disposed(&self) -> WeftResult<()> {
        if self.is_disposed() {
            Err(WeftError::usage("channel collection is disposed"))
        } else {
            Ok(())
        }
    }

    pub(crate) fn locked_aliases(&self) -> std::sync::MutexGuard<'_, AliasState> {
        self.alias_state.lock().expect("alias state poisoned")
    }

    pub(crate) fn locked_pending_attach(
        &self,
    ) -> std::sync::MutexGuard<'_, HashSet<DataStoreId>> {
        self.pending_attach.lock().expect("pending attach poisoned")
    }

    pub(crate) fn locked_new_since_last_gc(
        &self,
    ) -> std::sync::MutexGuard<'_, Vec<DataStoreId>> {
        self.new_since_last_gc
            .lock()
            .expect("new-since-gc list poisoned")
    }

    /// The global uniqueness predicate for alias commits and remote
    /// attaches: the name is taken if it is a committed alias or an
    /// existing context id.
    pub(crate) fn already_processed(&self, name: &str) -> bool {
        self.locked_aliases().aliases.contains_key(&Alias::new(name))
            || self.contexts.contains(&DataStoreId::new(name))
    }
}
