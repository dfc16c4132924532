//! Garbage collection interface
//!
//! Produces the container's outbound-route graph and consumes the route
//! sets GC hands back: used routes, tombstoned routes, sweep-ready
//! routes. Deletion is the only path that removes a context; every other
//! consumer must never act on a deleted node.

use tracing::{debug, error};

use weft_core::gc::{first_segment, is_store_route, GarbageCollectionData};
use weft_core::identifiers::DataStoreId;
use weft_core::{AttachState, WeftError, WeftResult};

use crate::collection::ChannelCollection;

impl ChannelCollection {
    /// Collect the outbound-route graph of every attached store, node ids
    /// re-rooted as absolute container paths, plus a synthetic container
    /// node whose routes are the root stores.
    ///
    /// A store still in `Attaching` means the summarizer is running with
    /// local uncommitted state; that is a processing error, never skipped.
    pub async fn get_gc_data(&self, full_gc: bool) -> WeftResult<GarbageCollectionData> {
        let mut data = GarbageCollectionData::new();
        let mut root_routes = Vec::new();
        for context in self.contexts.bound_or_remoted_contexts() {
            match context.attach_state() {
                AttachState::Attaching => {
                    return Err(WeftError::data_processing(format!(
                        "gc data requested while store {} is attaching",
                        context.id()
                    )));
                }
                AttachState::Attached => {
                    let store_data = context.get_gc_data(full_gc).await?;
                    data.extend(store_data.prefixed(context.id().as_str()));
                    if context.is_root() {
                        root_routes.push(format!("/{}", context.id()));
                    }
                }
                AttachState::Detached => {}
            }
        }
        root_routes.sort();
        data.add_node("/", root_routes);
        Ok(data)
    }

    /// Re-establish container edges for stores attached since the last GC
    /// run, then clear the list.
    pub fn update_state_before_gc(&self) {
        let new_ids: Vec<DataStoreId> = self.locked_new_since_last_gc().drain(..).collect();
        for id in new_ids {
            let Some(context) = self.contexts.get(&id) else {
                continue;
            };
            if context.is_root() {
                self.runtime
                    .added_outbound_reference("/", &format!("/{id}"));
            }
        }
    }

    /// Distribute the used-route set: each context receives its sub-routes
    /// (empty when unused).
    pub async fn update_used_routes(&self, routes: &[String]) -> WeftResult<()> {
        let mut by_store: std::collections::HashMap<DataStoreId, Vec<String>> =
            std::collections::HashMap::new();
        for route in routes {
            let Some(segment) = first_segment(route) else {
                continue;
            };
            let id = DataStoreId::new(segment);
            if !self.contexts.contains(&id) {
                return Err(WeftError::internal(format!(
                    "used route {route} names unknown store {id}"
                )));
            }
            let sub_route = route[1 + segment.len()..].to_string();
            let sub_route = if sub_route.is_empty() {
                "/".to_string()
            } else {
                sub_route
            };
            by_store.entry(id).or_default().push(sub_route);
        }
        for context in self.contexts.contexts() {
            let sub_routes = by_store.remove(context.id()).unwrap_or_default();
            context.update_used_routes(sub_routes).await;
        }
        Ok(())
    }

    /// Apply the tombstone set. A store is tombstoned iff the exact route
    /// `/id` appears; sub-routes never tombstone the parent.
    pub fn update_tombstoned_routes(&self, routes: &[String]) {
        let tombstoned: std::collections::HashSet<&str> = routes
            .iter()
            .filter(|route| is_store_route(route))
            .filter_map(|route| first_segment(route))
            .collect();
        for context in self.contexts.contexts() {
            context.set_tombstone(tombstoned.contains(context.id().as_str()));
        }
    }

    /// Delete every sweep-ready store. Sub-paths are the store's own
    /// business and are ignored here. Never throws: a missing store is
    /// telemetry, not an error. Returns all input routes as deleted.
    pub fn delete_sweep_ready(&self, routes: &[String]) -> Vec<String> {
        for route in routes {
            if !is_store_route(route) {
                continue;
            }
            let Some(segment) = first_segment(route) else {
                continue;
            };
            let id = DataStoreId::new(segment);
            match self.contexts.delete(&id) {
                Some(context) => {
                    context.delete();
                    self.runtime.delete_child_summarizer_node(&id);
                    self.drop_aliases_of(&id);
                    debug!(store_id = %id, "store swept");
                }
                None => {
                    if self.contexts.is_deleted(&id) {
                        debug!(store_id = %id, "sweep of already-deleted store");
                    } else {
                        error!(store_id = %id, "sweep of unknown store");
                    }
                }
            }
        }
        routes.to_vec()
    }

    /// Drop alias entries pointing at a swept store, keeping the alias map
    /// consistent with the table.
    fn drop_aliases_of(&self, id: &DataStoreId) {
        let mut state = self.locked_aliases();
        state.aliases.retain(|_, target| target != id);
    }
}
