//! Weft Core Domain Layer
//!
//! Pure domain types for the weft container runtime: identifiers, attach
//! lifecycle states, wire messages, snapshot and summary trees, the garbage
//! collection data model, and the unified error type.
//!
//! ## What's NOT in this crate
//!
//! - The channel collection runtime itself (lives in `weft-datastore`)
//! - Effect handlers or any async execution (pure synchronous domain logic)
//! - Storage or transport integration

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Identifier types and compact id encoding
pub mod identifiers;

/// Attach and binding state machines
pub mod attach;

/// Container-level wire messages
pub mod messages;

/// Flattened snapshot tree model and persisted-layout constants
pub mod snapshot;

/// Summary tree composition types
pub mod summary;

/// Garbage collection data model and route path helpers
pub mod gc;

/// Unified error type
pub mod errors;

/// Runtime configuration flags
pub mod config;

pub use attach::{AttachState, BindState};
pub use config::CollectionConfig;
pub use errors::{WeftError, WeftResult};
pub use gc::{GarbageCollectionData, NodeUpdateKind};
pub use identifiers::{encode_compact_id, Alias, ClientId, DataStoreId};
pub use messages::{AliasMessage, AttachMessage, ContainerMessage, Envelope, InnerOp};
pub use snapshot::{DataStoreAttributes, SnapshotEntry, SnapshotTree};
pub use summary::{SummaryObject, SummaryStats, SummaryTree, SummarizeResult};
