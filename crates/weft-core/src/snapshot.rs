//! Flattened snapshot tree model and persisted-layout constants
//!
//! Container snapshots persist each data store as a sub-tree holding its
//! channel trees, an `.attributes` blob with `{pkg, isRootDataStore}`, and
//! an optional group-id tag. Attach messages carry the same shape inline.
//!
//! Two container layouts are accepted on load: the current form keeps all
//! stores under a `.channels` sub-tree; the legacy form keeps the store
//! trees directly at the container root, next to a reserved set of
//! non-store paths.

use serde::{Deserialize, Serialize};

use crate::errors::{WeftError, WeftResult};

/// Blob name of the per-store attributes record.
pub const ATTRIBUTES_BLOB: &str = ".attributes";

/// Sub-tree under which stores live in the current container layout.
pub const CHANNELS_TREE: &str = ".channels";

/// Blob name of the garbage-collection payload inside an attach snapshot.
pub const GC_DATA_BLOB: &str = ".gcdata";

/// Container-root paths that are never data stores in the legacy layout.
pub const RESERVED_CONTAINER_PATHS: &[&str] =
    &[".protocol", ".logTail", ".serviceProtocol", ".blobs"];

/// One entry of a flattened snapshot tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SnapshotEntry {
    /// An inline blob.
    Blob {
        /// Name within the parent tree.
        path: String,
        /// Blob payload, utf-8.
        contents: String,
    },
    /// A nested tree.
    Tree {
        /// Name within the parent tree.
        path: String,
        /// Child entries.
        entries: Vec<SnapshotEntry>,
        /// Optional delivery-group tag.
        #[serde(rename = "groupId", default, skip_serializing_if = "Option::is_none")]
        group_id: Option<String>,
    },
}

impl SnapshotEntry {
    /// Name of this entry within its parent tree.
    pub fn path(&self) -> &str {
        match self {
            SnapshotEntry::Blob { path, .. } => path,
            SnapshotEntry::Tree { path, .. } => path,
        }
    }
}

/// A snapshot tree in flattened entry-list form: `{entries, groupId?}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotTree {
    /// Direct children.
    pub entries: Vec<SnapshotEntry>,
    /// Optional delivery-group tag.
    #[serde(rename = "groupId", default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl SnapshotTree {
    /// A tree with the given entries and no group tag.
    pub fn new(entries: Vec<SnapshotEntry>) -> Self {
        Self {
            entries,
            group_id: None,
        }
    }

    /// Direct child blob by name.
    pub fn get_blob(&self, name: &str) -> Option<&str> {
        self.entries.iter().find_map(|entry| match entry {
            SnapshotEntry::Blob { path, contents } if path == name => Some(contents.as_str()),
            _ => None,
        })
    }

    /// Direct child tree by name.
    pub fn get_tree(&self, name: &str) -> Option<SnapshotTree> {
        self.entries.iter().find_map(|entry| match entry {
            SnapshotEntry::Tree {
                path,
                entries,
                group_id,
            } if path == name => Some(SnapshotTree {
                entries: entries.clone(),
                group_id: group_id.clone(),
            }),
            _ => None,
        })
    }

    /// Names of all direct child trees.
    pub fn tree_names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                SnapshotEntry::Tree { path, .. } => Some(path.as_str()),
                _ => None,
            })
            .collect()
    }

    /// All inline blobs, keyed by `/`-joined path from this tree's root.
    pub fn flatten_blobs(&self) -> Vec<(String, String)> {
        fn walk(entries: &[SnapshotEntry], prefix: &str, out: &mut Vec<(String, String)>) {
            for entry in entries {
                let full = if prefix.is_empty() {
                    entry.path().to_string()
                } else {
                    format!("{prefix}/{}", entry.path())
                };
                match entry {
                    SnapshotEntry::Blob { contents, .. } => out.push((full, contents.clone())),
                    SnapshotEntry::Tree { entries, .. } => walk(entries, &full, out),
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.entries, "", &mut out);
        out
    }
}

fn default_true() -> bool {
    true
}

/// Per-store attributes blob: `{pkg, isRootDataStore}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStoreAttributes {
    /// Factory path from the registry root.
    pub pkg: Vec<String>,
    /// Whether the store is a root store. Absent means root, which is what
    /// snapshots written before the flag existed imply.
    #[serde(default = "default_true")]
    pub is_root_data_store: bool,
}

impl DataStoreAttributes {
    /// Parse an `.attributes` blob.
    pub fn from_blob(contents: &str) -> WeftResult<Self> {
        serde_json::from_str(contents).map_err(|err| {
            WeftError::data_corruption(format!("malformed .attributes blob: {err}"))
        })
    }

    /// Serialize to the `.attributes` blob payload.
    pub fn to_blob(&self) -> String {
        // Serialization of a plain struct cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
