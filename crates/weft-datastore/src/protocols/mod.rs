//! Attach and alias protocols.

pub mod alias;
pub mod attach;

pub use alias::AliasResult;
