//! Internal id allocation
//!
//! Three disjoint namespaces: detached containers use `2·count` (even),
//! attached containers with a numeric runtime id use `2·n + 1` (odd),
//! both compact-encoded; a uuid from the runtime is used verbatim.

use weft_core::identifiers::{encode_compact_id, DataStoreId};
use weft_core::AttachState;

use crate::interfaces::DocumentUniqueId;

/// Allocate an internal id for a new store.
pub fn allocate_id(
    container_state: AttachState,
    unique: impl FnOnce() -> DocumentUniqueId,
    context_count: usize,
) -> DataStoreId {
    if container_state == AttachState::Detached {
        return DataStoreId::new(encode_compact_id(2 * context_count as u64));
    }
    match unique() {
        DocumentUniqueId::Number(n) => DataStoreId::new(encode_compact_id(2 * n + 1)),
        DocumentUniqueId::Uuid(uuid) => DataStoreId::new(uuid.to_string()),
    }
}
