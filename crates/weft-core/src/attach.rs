//! Attach and binding lifecycle states
//!
//! A data store moves through a monotone attach lifecycle: `Detached` while
//! purely local, `Attaching` once its attach op is in flight, `Attached`
//! once the op has round-tripped (or immediately, for remote stores).
//! Binding is orthogonal for a local store before its graph is made
//! visible: an `Unbound` store is invisible to summaries and to the
//! addressable partition of the context table.

use serde::{Deserialize, Serialize};

/// Attach lifecycle of a data store or of the whole container.
///
/// Transitions are monotone: `Detached → Attaching → Attached`, never
/// backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttachState {
    /// Purely local; not visible beyond this client.
    Detached,
    /// Attach op submitted, awaiting the sequenced echo.
    Attaching,
    /// Globally visible.
    Attached,
}

impl AttachState {
    /// Whether moving from `self` to `next` is a legal (forward) transition.
    ///
    /// Re-asserting the current state is allowed; any reverse move is not.
    pub fn can_transition_to(self, next: AttachState) -> bool {
        next >= self
    }
}

/// Binding of a local store's graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindState {
    /// Created locally, graph not yet made visible.
    Unbound,
    /// Graph made visible; the store is addressable.
    Bound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_state_is_monotone() {
        use AttachState::*;
        assert!(Detached.can_transition_to(Attaching));
        assert!(Detached.can_transition_to(Attached));
        assert!(Attaching.can_transition_to(Attached));
        assert!(Attached.can_transition_to(Attached));
        assert!(!Attached.can_transition_to(Attaching));
        assert!(!Attaching.can_transition_to(Detached));
        assert!(!Attached.can_transition_to(Detached));
    }
}
