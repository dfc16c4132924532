//! Garbage collection data model and route path helpers
//!
//! The GC graph is a map from absolute node paths to their outbound routes.
//! Node paths are `/`-separated, rooted at the container: `/` is the
//! container itself, `/3` is store `3`, `/3/dds1` is a channel within it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outbound-route graph of one node tree, keyed by absolute node path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GarbageCollectionData {
    /// node path → outbound routes.
    pub nodes: BTreeMap<String, Vec<String>>,
}

impl GarbageCollectionData {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node with its outbound routes.
    pub fn add_node(&mut self, path: impl Into<String>, routes: Vec<String>) {
        self.nodes.insert(path.into(), routes);
    }

    /// Re-root every node id under `/{prefix}` so identifiers become
    /// absolute paths from the container root.
    ///
    /// A store-local root node `/` becomes `/{prefix}`; `/dds1` becomes
    /// `/{prefix}/dds1`.
    pub fn prefixed(&self, prefix: &str) -> Self {
        let nodes = self
            .nodes
            .iter()
            .map(|(path, routes)| {
                let rerooted = if path == "/" {
                    format!("/{prefix}")
                } else {
                    format!("/{prefix}{path}")
                };
                (rerooted, routes.clone())
            })
            .collect();
        Self { nodes }
    }

    /// Merge another graph into this one. Duplicate paths are replaced.
    pub fn extend(&mut self, other: GarbageCollectionData) {
        self.nodes.extend(other.nodes);
    }
}

/// What happened to a GC node, reported to the GC sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeUpdateKind {
    /// The node was loaded (read through a request or handle).
    Loaded,
    /// The node's state changed (an op was applied).
    Changed,
}

/// Split a route into its `/`-separated parts, including the leading empty
/// part for absolute routes: `"/3/dds"` → `["", "3", "dds"]`.
pub fn route_parts(route: &str) -> Vec<&str> {
    route.split('/').collect()
}

/// Whether a route addresses a store itself, not a sub-path within one.
///
/// Exactly the absolute routes with two parts after split: `"/3"` is a
/// store route, `"/3/dds/x"` is not.
pub fn is_store_route(route: &str) -> bool {
    route_parts(route).len() == 2
}

/// First path segment of an absolute route: `"/3/dds"` → `"3"`.
pub fn first_segment(route: &str) -> Option<&str> {
    let parts = route_parts(route);
    match parts.as_slice() {
        ["", first, ..] if !first.is_empty() => Some(first),
        _ => None,
    }
}
