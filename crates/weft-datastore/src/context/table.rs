//! Indexed collection of data-store contexts
//!
//! Contexts are partitioned into {unbound, bound, remoted}; bound and
//! remoted together form the addressable partition ops and requests can
//! reach. An id lives in at most one partition at a time. Deletion leaves
//! a marker so late lookups distinguish "never existed" from "swept".

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tokio::sync::oneshot;

use weft_core::identifiers::DataStoreId;

use super::data_store::DataStoreContext;
use std::sync::Arc;

/// Result of a synchronous addressable lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Present in the addressable partition.
    Found(Arc<DataStoreContext>),
    /// Was present once, swept since.
    Deleted,
    /// Never seen.
    Missing,
}

#[derive(Default)]
struct TableState {
    unbound: HashMap<DataStoreId, Arc<DataStoreContext>>,
    bound: HashMap<DataStoreId, Arc<DataStoreContext>>,
    remoted: HashMap<DataStoreId, Arc<DataStoreContext>>,
    deleted: HashSet<DataStoreId>,
    waiters: HashMap<DataStoreId, Vec<oneshot::Sender<Option<Arc<DataStoreContext>>>>>,
}

impl TableState {
    fn addressable(&self, id: &DataStoreId) -> Option<&Arc<DataStoreContext>> {
        self.bound.get(id).or_else(|| self.remoted.get(id))
    }

    fn drain_waiters(&mut self, id: &DataStoreId, outcome: Option<Arc<DataStoreContext>>) {
        if let Some(waiters) = self.waiters.remove(id) {
            for waiter in waiters {
                // A dropped receiver just means the caller gave up waiting.
                let _ = waiter.send(outcome.clone());
            }
        }
    }
}

/// The context table.
#[derive(Default)]
pub struct ContextTable {
    state: Mutex<TableState>,
}

impl ContextTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, TableState> {
        // Lock poisoning implies a panic while mutating the table; the
        // container is torn down in that case, so propagate.
        self.state.lock().expect("context table poisoned")
    }

    /// Add a locally created, not yet visible context.
    pub fn add_unbound(&self, context: Arc<DataStoreContext>) {
        let mut state = self.locked();
        let id = context.id().clone();
        debug_assert!(
            state.addressable(&id).is_none() && !state.unbound.contains_key(&id),
            "context {id} already present"
        );
        state.unbound.insert(id, context);
    }

    /// Add a remote or snapshot-loaded context, immediately addressable.
    pub fn add_bound_or_remoted(&self, context: Arc<DataStoreContext>) {
        let mut state = self.locked();
        let id = context.id().clone();
        debug_assert!(
            state.addressable(&id).is_none() && !state.unbound.contains_key(&id),
            "context {id} already present"
        );
        state.remoted.insert(id.clone(), context.clone());
        state.drain_waiters(&id, Some(context));
    }

    /// Move a local context from unbound to bound.
    ///
    /// Returns the context, or `None` if the id is not unbound.
    pub fn bind(&self, id: &DataStoreId) -> Option<Arc<DataStoreContext>> {
        let mut state = self.locked();
        let context = state.unbound.remove(id)?;
        state.bound.insert(id.clone(), context.clone());
        state.drain_waiters(id, Some(context.clone()));
        Some(context)
    }

    /// Get a context from any partition.
    pub fn get(&self, id: &DataStoreId) -> Option<Arc<DataStoreContext>> {
        let state = self.locked();
        state
            .addressable(id)
            .or_else(|| state.unbound.get(id))
            .cloned()
    }

    /// Get an unbound context.
    pub fn get_unbound(&self, id: &DataStoreId) -> Option<Arc<DataStoreContext>> {
        self.locked().unbound.get(id).cloned()
    }

    /// Synchronous addressable lookup, distinguishing swept ids.
    pub fn lookup_addressable(&self, id: &DataStoreId) -> Lookup {
        let state = self.locked();
        if let Some(context) = state.addressable(id) {
            Lookup::Found(context.clone())
        } else if state.deleted.contains(id) {
            Lookup::Deleted
        } else {
            Lookup::Missing
        }
    }

    /// Get an addressable context, optionally suspending until the id
    /// becomes addressable or is swept.
    ///
    /// Returns `None` when the id is absent and `wait` is false, when it
    /// was swept, or when the table is disposed while waiting.
    pub async fn get_bound_or_remoted(
        &self,
        id: &DataStoreId,
        wait: bool,
    ) -> Option<Arc<DataStoreContext>> {
        let receiver = {
            let mut state = self.locked();
            if let Some(context) = state.addressable(id) {
                return Some(context.clone());
            }
            if state.deleted.contains(id) || !wait {
                return None;
            }
            let (sender, receiver) = oneshot::channel();
            state.waiters.entry(id.clone()).or_default().push(sender);
            receiver
        };
        receiver.await.ok().flatten()
    }

    /// Whether the id is known in any partition.
    pub fn contains(&self, id: &DataStoreId) -> bool {
        let state = self.locked();
        state.addressable(id).is_some() || state.unbound.contains_key(id)
    }

    /// Move a bound context back to unbound (attach rollback).
    ///
    /// Returns the context, or `None` if the id is not bound.
    pub fn revert_to_unbound(&self, id: &DataStoreId) -> Option<Arc<DataStoreContext>> {
        let mut state = self.locked();
        let context = state.bound.remove(id)?;
        state.unbound.insert(id.clone(), context.clone());
        Some(context)
    }

    /// Remove a context, installing a deletion marker and waking waiters.
    ///
    /// Returns the removed context, if any.
    pub fn delete(&self, id: &DataStoreId) -> Option<Arc<DataStoreContext>> {
        let mut state = self.locked();
        let removed = state
            .unbound
            .remove(id)
            .or_else(|| state.bound.remove(id))
            .or_else(|| state.remoted.remove(id));
        state.deleted.insert(id.clone());
        state.drain_waiters(id, None);
        removed
    }

    /// Whether a deletion marker exists for the id.
    pub fn is_deleted(&self, id: &DataStoreId) -> bool {
        self.locked().deleted.contains(id)
    }

    /// All contexts, every partition.
    pub fn contexts(&self) -> Vec<Arc<DataStoreContext>> {
        let state = self.locked();
        state
            .unbound
            .values()
            .chain(state.bound.values())
            .chain(state.remoted.values())
            .cloned()
            .collect()
    }

    /// All addressable contexts.
    pub fn bound_or_remoted_contexts(&self) -> Vec<Arc<DataStoreContext>> {
        let state = self.locked();
        state
            .bound
            .values()
            .chain(state.remoted.values())
            .cloned()
            .collect()
    }

    /// All unbound contexts.
    pub fn unbound_contexts(&self) -> Vec<Arc<DataStoreContext>> {
        self.locked().unbound.values().cloned().collect()
    }

    /// Total number of contexts across all partitions.
    pub fn size(&self) -> usize {
        let state = self.locked();
        state.unbound.len() + state.bound.len() + state.remoted.len()
    }

    /// Number of unbound contexts.
    pub fn not_bound_length(&self) -> usize {
        self.locked().unbound.len()
    }

    /// Drop all waiters. Used by dispose; pending waits resolve `None`.
    pub fn abort_waiters(&self) {
        let mut state = self.locked();
        for (_, waiters) in state.waiters.drain() {
            for waiter in waiters {
                let _ = waiter.send(None);
            }
        }
    }
}
