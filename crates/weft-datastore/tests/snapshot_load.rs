//! Loading a collection from a container base snapshot, both layouts.

use std::sync::Arc;

use weft_core::identifiers::DataStoreId;
use weft_core::snapshot::{SnapshotEntry, SnapshotTree};
use weft_core::summary::SummaryObject;
use weft_core::{AttachState, CollectionConfig};
use weft_datastore::ChannelCollection;
use weft_testkit::{store_snapshot, MockRegistry, MockRuntime};

fn nested(path: &str, tree: SnapshotTree) -> SnapshotEntry {
    SnapshotEntry::Tree {
        path: path.to_string(),
        entries: tree.entries,
        group_id: tree.group_id,
    }
}

fn load(snapshot: &SnapshotTree) -> (Arc<MockRuntime>, ChannelCollection) {
    let runtime = MockRuntime::attached();
    let collection = ChannelCollection::load(
        runtime.clone(),
        MockRegistry::new(),
        CollectionConfig::default(),
        Some(snapshot),
    )
    .unwrap();
    (runtime, collection)
}

#[tokio::test]
async fn channels_layout_loads_stores() {
    let snapshot = SnapshotTree::new(vec![nested(
        ".channels",
        SnapshotTree::new(vec![
            nested(
                "s1",
                store_snapshot(&["app", "counter"], true, &[("header", "{}")]),
            ),
            nested("s2", store_snapshot(&["map"], false, &[])),
        ]),
    )]);
    let (runtime, collection) = load(&snapshot);

    assert_eq!(collection.size(), 2);
    assert_eq!(runtime.created_summarizer_nodes().len(), 2);

    let s1 = collection.get_context(&DataStoreId::new("s1")).unwrap();
    assert_eq!(s1.attach_state(), AttachState::Attached);
    assert!(s1.is_root());
    let details = s1.initial_snapshot_details();
    assert_eq!(details.package_path, vec!["app", "counter"]);

    let s2 = collection.get_context(&DataStoreId::new("s2")).unwrap();
    assert!(!s2.is_root());
}

#[tokio::test]
async fn legacy_layout_skips_reserved_paths() {
    let snapshot = SnapshotTree::new(vec![
        nested(".protocol", SnapshotTree::new(vec![])),
        nested(".logTail", SnapshotTree::new(vec![])),
        nested("s1", store_snapshot(&["counter"], false, &[])),
    ]);
    let (_runtime, collection) = load(&snapshot);

    assert_eq!(collection.size(), 1);
    assert!(collection.get_context(&DataStoreId::new("s1")).is_some());
    assert!(collection.get_context(&DataStoreId::new(".protocol")).is_none());
}

#[tokio::test]
async fn empty_base_snapshot_loads_empty_collection() {
    let runtime = MockRuntime::attached();
    let collection = ChannelCollection::load(
        runtime,
        MockRegistry::new(),
        CollectionConfig::default(),
        None,
    )
    .unwrap();
    assert_eq!(collection.size(), 0);
}

#[tokio::test]
async fn store_without_attributes_is_corruption() {
    let snapshot = SnapshotTree::new(vec![nested(
        ".channels",
        SnapshotTree::new(vec![nested("s1", SnapshotTree::new(vec![]))]),
    )]);
    let err = ChannelCollection::load(
        MockRuntime::attached(),
        MockRegistry::new(),
        CollectionConfig::default(),
        Some(&snapshot),
    )
    .unwrap_err();
    assert_eq!(err.category(), "dataCorruption");
}

#[tokio::test]
async fn unrealized_store_summary_reuses_base_snapshot() {
    let snapshot = SnapshotTree::new(vec![nested(
        ".channels",
        SnapshotTree::new(vec![nested(
            "s1",
            store_snapshot(&["counter"], false, &[("header", "{\"count\":3}")]),
        )]),
    )]);
    let (_runtime, collection) = load(&snapshot);

    let result = collection.summarize(true, false).await.unwrap();
    let SummaryObject::Tree(store_tree) = &result.summary.children["s1"] else {
        panic!("store summary is not a tree");
    };
    let SummaryObject::Blob { content } = &store_tree.children["header"] else {
        panic!("header blob missing");
    };
    assert_eq!(content, "{\"count\":3}");
    // The store was never realized: the snapshot was reused verbatim.
    let context = collection.get_context(&DataStoreId::new("s1")).unwrap();
    assert!(!context.is_loaded());
}
