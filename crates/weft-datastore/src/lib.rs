//! Weft Channel Collection
//!
//! The collection of data stores within one container: lifecycle
//! (create → attach → process → summarize → garbage-collect → delete),
//! routing of the container's inbound op stream to the correct store, and
//! the alias namespace user code uses to discover root objects.
//!
//! The whole subsystem runs on one logical task. Concurrency is
//! cooperative: operations interleave only at the enumerated suspension
//! points (channel realization, addressable waits, pending-alias waits,
//! storage reads, summary and GC fan-out); every other state transition
//! is synchronous and atomic.
//!
//! The outer container runtime and the per-store channels are consumed
//! through the traits in [`interfaces`]; this crate owns nothing beyond
//! the collection state itself.

#![forbid(unsafe_code)]

pub mod collection;
pub mod context;
pub mod gc;
pub mod id_allocator;
pub mod interfaces;
pub mod protocols;
pub mod request;
pub mod routing;
pub mod summary;

pub use collection::ChannelCollection;
pub use context::{ContextTable, DataStoreContext, Lookup, SnapshotDetails};
pub use interfaces::{
    ChannelRegistry, ContainerRuntime, DataStoreChannel, DocumentUniqueId, ObjectClass,
    StorageReader,
};
pub use protocols::AliasResult;
pub use request::{ChannelRequest, ChannelResponse, RequestHeaders};
pub use routing::parse_container_message;
