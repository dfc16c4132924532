//! Data-store contexts and the partitioned context table.

pub mod data_store;
pub mod table;

pub use data_store::{DataStoreContext, SnapshotDetails};
pub use table::{ContextTable, Lookup};
