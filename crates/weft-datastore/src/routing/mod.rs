//! Container-message routing
//!
//! One sequenced message at a time: attach and alias ops go to their
//! protocols, channel ops through the op pipeline. Signals route by
//! envelope address in [`ChannelCollection::process_signal`].

pub mod channel_ops;

use serde_json::Value;

use weft_core::messages::ContainerMessage;
use weft_core::{WeftError, WeftResult};

use crate::collection::ChannelCollection;

/// Parse a raw container message.
///
/// An unknown message type is a programmer error on the submitting side,
/// not corrupt user data.
pub fn parse_container_message(value: &Value) -> WeftResult<ContainerMessage> {
    serde_json::from_value(value.clone())
        .map_err(|err| WeftError::internal(format!("unknown container message: {err}")))
}

impl ChannelCollection {
    /// Process one sequenced container message to completion.
    ///
    /// `timestamp_ms` is the sequencer's timestamp, forwarded to GC node
    /// updates.
    pub async fn process(
        &self,
        message: &ContainerMessage,
        local: bool,
        local_metadata: Option<&Value>,
        timestamp_ms: Option<u64>,
    ) -> WeftResult<()> {
        match message {
            ContainerMessage::Attach(attach) => self.process_attach(attach, local).await,
            ContainerMessage::Alias(alias) => self.process_alias(alias, local),
            ContainerMessage::DataStoreOp(envelope) => {
                self.process_channel_op(envelope, local, local_metadata, timestamp_ms)
                    .await
            }
        }
    }
}
