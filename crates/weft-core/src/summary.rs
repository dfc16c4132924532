//! Summary tree composition types
//!
//! A summary is a tree of named blobs, sub-trees, and handles (pointers
//! into the previous summary for unchanged sub-trees). The collection
//! composes per-store summaries into one tree keyed by internal id.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::snapshot::{SnapshotEntry, SnapshotTree};

/// One node of a summary tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SummaryObject {
    /// An inline blob.
    Blob {
        /// Blob payload, utf-8.
        content: String,
    },
    /// A nested tree.
    Tree(SummaryTree),
    /// A pointer to the same sub-tree in the previous summary.
    Handle {
        /// Absolute path of the referenced sub-tree.
        handle: String,
    },
}

/// A summary tree: named children plus an optional delivery-group tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryTree {
    /// Child nodes by name.
    pub children: BTreeMap<String, SummaryObject>,
    /// Optional delivery-group tag.
    #[serde(rename = "groupId", default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl SummaryTree {
    /// An empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an inline blob child.
    pub fn add_blob(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.children.insert(
            name.into(),
            SummaryObject::Blob {
                content: content.into(),
            },
        );
    }

    /// Add a sub-tree child.
    pub fn add_tree(&mut self, name: impl Into<String>, tree: SummaryTree) {
        self.children.insert(name.into(), SummaryObject::Tree(tree));
    }

    /// Convert to the flattened snapshot form used by attach messages.
    ///
    /// Handles cannot appear in an attach snapshot: a store being attached
    /// has no previous summary to point into, so they are skipped.
    pub fn to_snapshot(&self) -> SnapshotTree {
        let entries = self
            .children
            .iter()
            .filter_map(|(name, child)| match child {
                SummaryObject::Blob { content } => Some(SnapshotEntry::Blob {
                    path: name.clone(),
                    contents: content.clone(),
                }),
                SummaryObject::Tree(tree) => {
                    let nested = tree.to_snapshot();
                    Some(SnapshotEntry::Tree {
                        path: name.clone(),
                        entries: nested.entries,
                        group_id: nested.group_id,
                    })
                }
                SummaryObject::Handle { .. } => None,
            })
            .collect();
        SnapshotTree {
            entries,
            group_id: self.group_id.clone(),
        }
    }
}

impl From<&SnapshotTree> for SummaryTree {
    /// Reuse a base-snapshot portion verbatim as a summary tree.
    fn from(snapshot: &SnapshotTree) -> Self {
        let children = snapshot
            .entries
            .iter()
            .map(|entry| match entry {
                SnapshotEntry::Blob { path, contents } => (
                    path.clone(),
                    SummaryObject::Blob {
                        content: contents.clone(),
                    },
                ),
                SnapshotEntry::Tree {
                    path,
                    entries,
                    group_id,
                } => {
                    let nested = SnapshotTree {
                        entries: entries.clone(),
                        group_id: group_id.clone(),
                    };
                    (path.clone(), SummaryObject::Tree(SummaryTree::from(&nested)))
                }
            })
            .collect();
        SummaryTree {
            children,
            group_id: snapshot.group_id.clone(),
        }
    }
}

/// Node and size counts of one summarize pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryStats {
    /// Number of tree nodes.
    pub tree_node_count: u64,
    /// Number of blob nodes.
    pub blob_node_count: u64,
    /// Number of handle nodes.
    pub handle_node_count: u64,
    /// Total inline blob payload size in bytes.
    pub total_blob_size: u64,
}

impl SummaryStats {
    /// Merge another pass's stats into this one.
    pub fn merge(&mut self, other: SummaryStats) {
        self.tree_node_count += other.tree_node_count;
        self.blob_node_count += other.blob_node_count;
        self.handle_node_count += other.handle_node_count;
        self.total_blob_size += other.total_blob_size;
    }

    /// Count the nodes of a tree, including the tree itself.
    pub fn of_tree(tree: &SummaryTree) -> Self {
        let mut stats = SummaryStats {
            tree_node_count: 1,
            ..Default::default()
        };
        for child in tree.children.values() {
            match child {
                SummaryObject::Blob { content } => {
                    stats.blob_node_count += 1;
                    stats.total_blob_size += content.len() as u64;
                }
                SummaryObject::Tree(nested) => stats.merge(Self::of_tree(nested)),
                SummaryObject::Handle { .. } => stats.handle_node_count += 1,
            }
        }
        stats
    }
}

/// A summary tree together with its stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizeResult {
    /// The produced tree.
    pub summary: SummaryTree,
    /// Node and size counts.
    pub stats: SummaryStats,
}

impl SummarizeResult {
    /// Wrap a tree, computing its stats.
    pub fn from_tree(summary: SummaryTree) -> Self {
        let stats = SummaryStats::of_tree(&summary);
        Self { summary, stats }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_count_nested_nodes() {
        let mut inner = SummaryTree::new();
        inner.add_blob("header", "0123456789");
        let mut outer = SummaryTree::new();
        outer.add_tree("dds0", inner);
        outer.add_blob(".attributes", "{}");

        let stats = SummaryStats::of_tree(&outer);
        assert_eq!(stats.tree_node_count, 2);
        assert_eq!(stats.blob_node_count, 2);
        assert_eq!(stats.total_blob_size, 12);
    }

    #[test]
    fn snapshot_round_trip_preserves_shape() {
        let mut tree = SummaryTree::new();
        tree.add_blob("b", "x");
        let mut outer = SummaryTree::new();
        outer.add_tree("t", tree);

        let snapshot = outer.to_snapshot();
        let back = SummaryTree::from(&snapshot);
        assert_eq!(back, outer);
    }

    #[test]
    fn handles_are_dropped_from_attach_snapshots() {
        let mut tree = SummaryTree::new();
        tree.children.insert(
            "unchanged".to_string(),
            SummaryObject::Handle {
                handle: "/1/unchanged".to_string(),
            },
        );
        tree.add_blob("b", "x");
        assert_eq!(tree.to_snapshot().entries.len(), 1);
    }
}
