//! Wire shapes for the sync protocol.
//!
//! An `Event` is one operation stamped with its author and the server order
//! (`0` until confirmed). An `EventPack` batches several operations under a
//! shared header; `SyncEventPack` adds the causal watermark
//! (`lastKnownOrder`) the receiver uses for gap detection, plus the sending
//! connection's transient user id.
//!
//! Field casing on the wire is camelCase; message envelopes are tagged by
//! `kind`.

use serde::{Deserialize, Serialize};

use crate::{EventId, Operation, UserId};

/// Header fields shared by every event an author produces.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBody {
    pub event_id: EventId,
    pub user_id: UserId,
    pub document_id: String,
    pub operation: Operation,
}

/// One operation plus its server-assigned global order (`0` = unconfirmed).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub order: u64,
    pub body: EventBody,
}

/// One operation inside a pack. `actual_id` overrides the pack's event id
/// when this operation originated as a distinct event before batching.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackedOperation {
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_id: Option<EventId>,
}

/// Batched event body: shared header, several operations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackBody {
    pub event_id: EventId,
    pub user_id: UserId,
    pub document_id: String,
    pub operations: Vec<PackedOperation>,
}

/// A batch of operations sharing one order slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPack {
    pub order: u64,
    pub body: PackBody,
}

/// A single event as exchanged between replicas: the event plus the highest
/// server order its author had observed when issuing it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub event: Event,
    pub last_known_order: u64,
    /// Transient id of the sending connection.
    pub user_id: UserId,
}

/// An event pack plus the sender's causal watermark.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEventPack {
    pub order: u64,
    pub body: PackBody,
    pub last_known_order: u64,
    /// Transient id of the sending connection.
    pub user_id: UserId,
}

impl SyncEventPack {
    /// Expand the pack into individual events, one operation each.
    ///
    /// Every expanded event keeps the pack's order; an operation's
    /// `actual_id` override becomes that event's id, the pack id otherwise.
    pub fn expand(&self) -> Vec<SyncEvent> {
        self.body
            .operations
            .iter()
            .map(|packed| SyncEvent {
                event: Event {
                    order: self.order,
                    body: EventBody {
                        event_id: packed.actual_id.unwrap_or(self.body.event_id),
                        user_id: self.body.user_id,
                        document_id: self.body.document_id.clone(),
                        operation: packed.operation.clone(),
                    },
                },
                last_known_order: self.last_known_order,
                user_id: self.user_id,
            })
            .collect()
    }
}

/// Client → server messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientMessage {
    BoardEvent {
        document_id: String,
        event: SyncEventPack,
        sequence_number: u64,
        user_id: UserId,
    },
}

/// Server → client messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Acknowledges the pack sent under `sequence_number`, assigning it a
    /// final global order.
    Confirmation {
        document_id: String,
        sequence_number: u64,
        order: u64,
    },
    /// Events issued by other replicas, possibly batched, possibly with
    /// gaps in the global order.
    BoardEvents {
        document_id: String,
        events: Vec<SyncEventPack>,
    },
}

/// Reconnect / catch-up snapshot.
///
/// `events` rebuilds the confirmed log; `items` is the opaque serialized
/// board; `last_index` is the highest confirmed order at snapshot time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub events: Vec<Event>,
    pub items: Vec<u8>,
    pub last_index: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ItemId, StructureOp};

    fn remove_op(id: ItemId) -> Operation {
        Operation::Structure(StructureOp::Remove { ids: vec![id] })
    }

    #[test]
    fn test_pack_expansion_preserves_order_and_overrides() {
        let author = UserId(7);
        let pack_id = EventId::new(author, 1);
        let second_id = EventId::new(author, 2);

        let pack = SyncEventPack {
            order: 41,
            body: PackBody {
                event_id: pack_id,
                user_id: author,
                document_id: "doc-1".into(),
                operations: vec![
                    PackedOperation { operation: remove_op(ItemId::new()), actual_id: None },
                    PackedOperation {
                        operation: remove_op(ItemId::new()),
                        actual_id: Some(second_id),
                    },
                ],
            },
            last_known_order: 40,
            user_id: author,
        };

        let events = pack.expand();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.order, 41);
        assert_eq!(events[1].event.order, 41);
        assert_eq!(events[0].event.body.event_id, pack_id);
        assert_eq!(events[1].event.body.event_id, second_id);
        assert_eq!(events[0].last_known_order, 40);
    }

    #[test]
    fn test_client_message_kind_tag() {
        let author = UserId(3);
        let msg = ClientMessage::BoardEvent {
            document_id: "doc-1".into(),
            event: SyncEventPack {
                order: 0,
                body: PackBody {
                    event_id: EventId::new(author, 1),
                    user_id: author,
                    document_id: "doc-1".into(),
                    operations: vec![],
                },
                last_known_order: 0,
                user_id: author,
            },
            sequence_number: 5,
            user_id: author,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "BoardEvent");
        assert_eq!(json["sequenceNumber"], 5);
        assert_eq!(json["event"]["lastKnownOrder"], 0);
    }

    #[test]
    fn test_confirmation_roundtrip() {
        let msg = ServerMessage::Confirmation {
            document_id: "doc-1".into(),
            sequence_number: 2,
            order: 17,
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
