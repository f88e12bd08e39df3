//! Typed identifiers for board items, groups, users, and events.
//!
//! `ItemId` and `GroupId` wrap UUIDv7 (time-ordered, globally unique). They
//! are opaque on the wire and display as standard UUID text for logging. The
//! `short()` form (first 8 hex chars) is for human-facing UI — never used as
//! a lookup key.
//!
//! `UserId` is the server-assigned numeric identity of a participant, and
//! `EventId` is the `"<author>:<counter>"` pair every replica stamps on the
//! events it produces. Event ids stay stable across merges and transforms,
//! which is what makes at-least-once delivery idempotent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A board item identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(uuid::Uuid);

/// A group identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(uuid::Uuid);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_typed_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Create a new time-ordered ID (UUIDv7).
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// First 8 hex characters — for human display only, not lookup.
            pub fn short(&self) -> String {
                self.0.as_simple().to_string()[..8].to_string()
            }

            /// The raw 16 bytes.
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            /// Reconstruct from 16 bytes.
            pub fn from_bytes(b: [u8; 16]) -> Self {
                Self(uuid::Uuid::from_bytes(b))
            }

            /// Parse from a hex string (32 chars, no hyphens) or standard UUID format.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                uuid::Uuid::parse_str(s).map(Self)
            }

            /// A nil / zero ID — for sentinel values only.
            pub fn nil() -> Self {
                Self(uuid::Uuid::nil())
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<uuid::Uuid> for $T {
            fn from(u: uuid::Uuid) -> Self {
                Self(u)
            }
        }

        impl From<$T> for uuid::Uuid {
            fn from(id: $T) -> uuid::Uuid {
                id.0
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Full UUID with hyphens for log readability
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.short())
            }
        }
    };
}

impl_typed_id!(ItemId, "ItemId");
impl_typed_id!(GroupId, "GroupId");

/// A participant identity, assigned by the server at connect time.
#[derive(
    Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl From<u64> for UserId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// A globally unique event identifier: author id plus the author's local
/// event counter. Serialized on the wire as `"<author>:<counter>"`.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct EventId {
    pub author: UserId,
    pub counter: u64,
}

impl EventId {
    pub fn new(author: UserId, counter: u64) -> Self {
        Self { author, counter }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.author, self.counter)
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({}:{})", self.author, self.counter)
    }
}

/// Error parsing an [`EventId`] from its wire form.
#[derive(Debug, thiserror::Error)]
#[error("malformed event id {0:?}: expected \"<author>:<counter>\"")]
pub struct EventIdParseError(pub String);

impl FromStr for EventId {
    type Err = EventIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (author, counter) = s.split_once(':').ok_or_else(|| EventIdParseError(s.into()))?;
        let author = author.parse::<u64>().map_err(|_| EventIdParseError(s.into()))?;
        let counter = counter.parse::<u64>().map_err(|_| EventIdParseError(s.into()))?;
        Ok(Self { author: UserId(author), counter })
    }
}

impl Serialize for EventId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_ids_are_unique() {
        let a = ItemId::new();
        let b = ItemId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_event_id_roundtrips_through_wire_form() {
        let id = EventId::new(UserId(42), 7);
        let wire = id.to_string();
        assert_eq!(wire, "42:7");
        assert_eq!(wire.parse::<EventId>().unwrap(), id);
    }

    #[test]
    fn test_event_id_rejects_malformed_input() {
        assert!("42".parse::<EventId>().is_err());
        assert!("a:b".parse::<EventId>().is_err());
        assert!("42:".parse::<EventId>().is_err());
    }

    #[test]
    fn test_event_id_serde_is_a_string() {
        let id = EventId::new(UserId(3), 12);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"3:12\"");
        let back: EventId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
