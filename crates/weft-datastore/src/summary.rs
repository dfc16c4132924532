//! Summarization
//!
//! Attached containers summarize every attached store in parallel into a
//! tree keyed by internal id. Detached containers build the attach
//! summary by fixed-point iteration: summarizing a store can bind stores
//! it references through serialized handles, so passes repeat until no
//! unsummarized addressable store remains.

use std::collections::{BTreeMap, HashSet};

use futures::future::join_all;
use serde_json::Value;
use tracing::debug;

use weft_core::gc::first_segment;
use weft_core::identifiers::DataStoreId;
use weft_core::summary::{SummarizeResult, SummaryObject, SummaryTree};
use weft_core::{AttachState, WeftError, WeftResult};

use crate::collection::ChannelCollection;
use crate::routing::channel_ops::detect_outbound_routes;

impl ChannelCollection {
    /// Summarize the collection of an attached container.
    ///
    /// In-flight locally created stores are invisible (unbound) and thus
    /// ignored; a store still `Attaching` aborts the summary.
    pub async fn summarize(
        &self,
        full_tree: bool,
        track_state: bool,
    ) -> WeftResult<SummarizeResult> {
        let mut jobs = Vec::new();
        for context in self.contexts.bound_or_remoted_contexts() {
            match context.attach_state() {
                AttachState::Attaching => {
                    return Err(WeftError::data_processing(format!(
                        "summarize while store {} is attaching",
                        context.id()
                    )));
                }
                AttachState::Attached => {
                    jobs.push(async move {
                        let result = context.summarize(full_tree, track_state).await;
                        (context.id().clone(), result)
                    });
                }
                AttachState::Detached => {}
            }
        }

        let mut root = SummaryTree::new();
        for (id, result) in join_all(jobs).await {
            root.add_tree(id.into_string(), result?.summary);
        }
        Ok(SummarizeResult::from_tree(root))
    }

    /// Build the attach summary of a detached container.
    ///
    /// Each pass covers every addressable store this invocation has not
    /// yet summarized and without an attach op in flight. Serialized
    /// handles found in a pass's output bind their targets, so iteration
    /// continues until a pass finds nothing left.
    pub async fn get_attach_summary(&self) -> WeftResult<SummarizeResult> {
        let mut summarized: HashSet<DataStoreId> = HashSet::new();
        let mut summaries: BTreeMap<String, SummaryTree> = BTreeMap::new();
        loop {
            let pending: Vec<_> = self
                .contexts
                .bound_or_remoted_contexts()
                .into_iter()
                .filter(|context| {
                    !summarized.contains(context.id()) && !context.attach_op_fired()
                })
                .collect();
            if pending.is_empty() {
                break;
            }
            for context in pending {
                let result = context.summarize(true, false).await?;
                self.bind_handle_targets(&result.summary);
                summarized.insert(context.id().clone());
                summaries.insert(context.id().clone().into_string(), result.summary);
            }
        }
        debug!(
            stores = summaries.len(),
            not_bound = self.contexts.not_bound_length(),
            "attach summary complete"
        );

        let mut root = SummaryTree::new();
        for (id, summary) in summaries {
            root.add_tree(id, summary);
        }
        Ok(SummarizeResult::from_tree(root))
    }

    /// Bind every unbound store referenced by a serialized handle in the
    /// summary's blobs. Non-JSON blobs carry no handles.
    fn bind_handle_targets(&self, summary: &SummaryTree) {
        for child in summary.children.values() {
            match child {
                SummaryObject::Blob { content } => {
                    let Ok(value) = serde_json::from_str::<Value>(content) else {
                        continue;
                    };
                    for target in detect_outbound_routes(&value).targets {
                        let Some(segment) = first_segment(&target) else {
                            continue;
                        };
                        let id = DataStoreId::new(segment);
                        if let Some(context) = self.contexts.get_unbound(&id) {
                            self.contexts.bind(&id);
                            context.set_bound();
                            debug!(store_id = %id, "store bound transitively by attach summary");
                        }
                    }
                }
                SummaryObject::Tree(nested) => self.bind_handle_targets(nested),
                SummaryObject::Handle { .. } => {}
            }
        }
    }
}
