//! Core identifier types for the weft container runtime
//!
//! Data stores are identified by an internal id and optionally by a
//! user-chosen alias. Internal ids come from three disjoint namespaces
//! (see [`encode_compact_id`]); aliases are arbitrary user strings.
//!
//! # Identifier Patterns
//!
//! String-backed identifiers are generated with the `string_id!` macro to
//! keep the trait surface uniform across the workspace.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Generate a string-backed identifier type with standard traits.
///
/// # Generated Methods
/// - `new(id: impl Into<String>)`: Create from string
/// - `as_str()`: Get inner string reference
/// - `into_string()`: Unwrap into the inner string
///
/// # Generated Traits
/// - Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize
/// - Display, From<String>, From<&str>
macro_rules! string_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new identifier
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the inner string
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Unwrap into the inner string
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Internal identifier of a data store within one container.
    ///
    /// Allocated by the id allocator (compact-encoded counter or a uuid,
    /// see [`encode_compact_id`]) or carried verbatim on remote attach.
    DataStoreId
);

string_id!(
    /// Human-chosen stable name mapped to an internal id.
    ///
    /// Aliased stores are considered root: reachable from the container
    /// in the garbage collection graph.
    Alias
);

string_id!(
    /// Identifier of a connected client, assigned by the ordering service.
    ClientId
);

/// Encode a counter value as a short identifier string.
///
/// Lowercase base-36: identity for single decimal digits, and still short
/// for large counters. Detached stores use `2·count` (even), attached
/// stores with a runtime-assigned number use `2·n + 1` (odd), so the two
/// counter namespaces never collide; uuid-based ids bypass this encoding
/// entirely. Collision with user-chosen aliases remains possible and is
/// arbitrated at lookup time, alias map first.
pub fn encode_compact_id(value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    let mut rest = value;
    while rest > 0 {
        buf.push(DIGITS[(rest % 36) as usize]);
        rest /= 36;
    }
    buf.reverse();
    // Digits are ASCII by construction.
    String::from_utf8(buf).unwrap_or_default()
}
