//! Alias protocol
//!
//! An alias reservation is authoritative only once the local alias op is
//! sequenced back. Until then the outcome lives in a pending resolver;
//! commits arbitrate global uniqueness against both committed aliases and
//! existing internal ids, first sequenced writer wins.

use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, error};

use weft_core::identifiers::{Alias, DataStoreId};
use weft_core::messages::{AliasMessage, ContainerMessage};
use weft_core::{BindState, WeftError, WeftResult};

use crate::collection::{ChannelCollection, PendingAlias};

/// Outcome of an alias reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasResult {
    /// The alias was committed to the requested store.
    Success,
    /// Another assignment won the name.
    Conflict,
    /// The target store already carries an alias.
    AlreadyAliased,
}

impl ChannelCollection {
    /// Reserve `alias` for the store `internal_id`.
    ///
    /// Resolves once the local alias op round-trips. An unbound store is
    /// made visible first. A repeated reservation of a name already in
    /// flight for the same store joins that pending resolution; a
    /// reservation of the name for a different store submits its own op,
    /// so the sequenced commit arbitrates between the two.
    pub async fn alias(&self, internal_id: &DataStoreId, alias: Alias) -> WeftResult<AliasResult> {
        self.ensure_not_disposed()?;
        let context = self
            .contexts
            .get(internal_id)
            .ok_or_else(|| WeftError::usage(format!("unknown store {internal_id}")))?;
        if context.is_root() {
            return Ok(AliasResult::AlreadyAliased);
        }

        let join = {
            let mut state = self.locked_aliases();
            if let Some(target) = state.aliases.get(&alias) {
                return Ok(if target == internal_id {
                    AliasResult::Success
                } else {
                    AliasResult::Conflict
                });
            }
            state
                .pending
                .get_mut(&alias)
                .and_then(|entries| {
                    entries
                        .iter_mut()
                        .find(|entry| entry.target == *internal_id)
                })
                .map(|entry| {
                    let (sender, receiver) = oneshot::channel();
                    entry.waiters.push(sender);
                    receiver
                })
        };
        if let Some(receiver) = join {
            return receiver
                .await
                .map_err(|_| WeftError::usage("channel collection disposed during alias"));
        }

        if context.bind_state() == BindState::Unbound {
            self.make_visible(internal_id).await?;
        }

        let receiver = {
            let mut state = self.locked_aliases();
            let (sender, receiver) = oneshot::channel();
            state
                .pending
                .entry(alias.clone())
                .or_default()
                .push(PendingAlias {
                    target: internal_id.clone(),
                    waiters: vec![sender],
                });
            receiver
        };
        debug!(store_id = %internal_id, alias = %alias, "submitting alias op");
        self.runtime.submit_message(
            ContainerMessage::Alias(AliasMessage {
                internal_id: internal_id.clone(),
                alias: alias.clone(),
            }),
            Some(json!({ "alias": alias.as_str() })),
        );
        receiver
            .await
            .map_err(|_| WeftError::usage("channel collection disposed during alias"))
    }

    /// Process an inbound alias op. First sequenced writer wins.
    pub(crate) fn process_alias(&self, message: &AliasMessage, local: bool) -> WeftResult<()> {
        let result = self.commit_alias(message);
        if local {
            // Resolve only the reservation this op belongs to; other
            // in-flight reservations of the same name await their own ops.
            let entry = {
                let mut state = self.locked_aliases();
                let entry = state.pending.get_mut(&message.alias).and_then(|entries| {
                    entries
                        .iter()
                        .position(|entry| entry.target == message.internal_id)
                        .map(|index| entries.remove(index))
                });
                if state
                    .pending
                    .get(&message.alias)
                    .is_some_and(|entries| entries.is_empty())
                {
                    state.pending.remove(&message.alias);
                }
                entry
            };
            for waiter in entry.into_iter().flat_map(|entry| entry.waiters) {
                // A dropped receiver means the caller stopped waiting.
                let _ = waiter.send(result);
            }
        }
        Ok(())
    }

    fn commit_alias(&self, message: &AliasMessage) -> AliasResult {
        if self.already_processed(message.alias.as_str()) {
            debug!(
                alias = %message.alias,
                store_id = %message.internal_id,
                "alias rejected, name already taken"
            );
            return AliasResult::Conflict;
        }
        let Some(context) = self.contexts.get(&message.internal_id) else {
            error!(
                alias = %message.alias,
                store_id = %message.internal_id,
                "alias for unknown store rejected"
            );
            return AliasResult::Conflict;
        };
        self.locked_aliases()
            .aliases
            .insert(message.alias.clone(), message.internal_id.clone());
        context.set_in_memory_root();
        self.runtime
            .added_outbound_reference("/", &format!("/{}", message.internal_id));
        debug!(alias = %message.alias, store_id = %message.internal_id, "alias committed");
        AliasResult::Success
    }

    /// Await a pending alias resolution.
    ///
    /// Historical contract: resolves `Success` when nothing is in flight
    /// for the name, conflating "no such alias in flight" with "alias
    /// succeeded". New code should prefer [`pending_alias_status`].
    ///
    /// [`pending_alias_status`]: ChannelCollection::pending_alias_status
    pub async fn wait_if_pending_alias(&self, alias: &Alias) -> AliasResult {
        match self.pending_alias_status(alias).await {
            Some(result) => result,
            None => AliasResult::Success,
        }
    }

    /// Strict variant of [`wait_if_pending_alias`]: `None` when nothing is
    /// in flight for the name, the real outcome otherwise.
    ///
    /// With several reservations of one name in flight, this reports the
    /// earliest-submitted one; later reservations lose arbitration anyway.
    ///
    /// [`wait_if_pending_alias`]: ChannelCollection::wait_if_pending_alias
    pub async fn pending_alias_status(&self, alias: &Alias) -> Option<AliasResult> {
        let receiver = {
            let mut state = self.locked_aliases();
            let entry = state.pending.get_mut(alias)?.first_mut()?;
            let (sender, receiver) = oneshot::channel();
            entry.waiters.push(sender);
            receiver
        };
        // A closed channel means dispose ran; report the conflict side.
        Some(receiver.await.unwrap_or(AliasResult::Conflict))
    }
}
