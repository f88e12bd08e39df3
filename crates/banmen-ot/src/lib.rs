//! Operation history, coalescing, and transform engine for Banmen.
//!
//! This crate is the synchronization core of a collaborative board editor:
//! every mutation is a serializable operation, applied optimistically on the
//! local replica and reconciled with concurrent operations from other
//! replicas so that all replicas converge without a central lock.
//!
//! # Architecture
//!
//! - [`Board`] — the live item store operations apply to.
//! - [`Command`] — an operation bound to its eagerly computed inverse.
//! - [`merge`] — pure coalescing of adjacent compatible operations.
//! - [`transform`] — pure conflict resolution for concurrent operations.
//! - [`EventQueue`] — the confirmed / pending-send / fresh history.
//! - [`EventLog`] — the facade: commits, undo/redo, packs, snapshots, and
//!   the remote-ingestion pipeline.
//!
//! # Concurrency model
//!
//! Single-threaded and cooperative: every queue algorithm runs to
//! completion synchronously. The only asynchrony lives at the transport
//! boundary (see the client crate), which serializes timers and inbound
//! messages through one task before touching the log.

mod board;
mod command;
mod error;
mod ingest;
mod log;
pub mod merge;
mod queue;
mod text;
pub mod transform;

pub use board::{Board, Item};
pub use command::Command;
pub use error::{OtError, Result};
pub use ingest::IngestOutcome;
pub use log::EventLog;
pub use queue::{
    default_revert_filter, EventQueue, HistoryRecord, PendingKind, RecordFilter, SyncLog,
    SyncLogEntry, SyncLogKind,
};

#[cfg(test)]
mod tests {
    use super::*;
    use banmen_types::{
        EventId, GeometryChange, GeometryOp, ItemId, ItemState, Operation, PackBody,
        PackedOperation, StructureOp, SyncEventPack, TextEdit, TextOp, UserId, Vec2,
    };
    use std::collections::BTreeMap;

    /// A replica plus the server-side order counter, driven by the tests.
    struct Replica {
        log: EventLog,
        board: Board,
    }

    impl Replica {
        fn new(user: u64) -> Self {
            Self { log: EventLog::new("doc-1", UserId(user)), board: Board::new() }
        }

        fn commit(&mut self, op: Operation) {
            self.log.commit(op, &mut self.board).unwrap();
        }

        /// Send the unsent pack and have the "server" confirm it at
        /// `order`. Returns the pack as other replicas would receive it.
        fn publish(&mut self, order: u64) -> SyncEventPack {
            let mut pack = self.log.make_pack().expect("nothing to publish");
            assert!(self.log.confirm(order, pack.body.operations.len()));
            pack.order = order;
            pack
        }

        fn receive(&mut self, pack: &SyncEventPack) {
            self.log.ingest(&mut self.board, std::slice::from_ref(pack)).unwrap();
        }
    }

    fn add_note() -> (Operation, ItemId) {
        let item = ItemState::note(ItemId::new(), 0);
        let id = item.id;
        (Operation::Structure(StructureOp::Add { items: vec![item], created_at: None }), id)
    }

    fn translate(id: ItemId, x: f64, y: f64) -> Operation {
        Operation::Geometry(GeometryOp::Update {
            changes: BTreeMap::from([(id, GeometryChange::TranslateBy { delta: Vec2::new(x, y) })]),
        })
    }

    #[test]
    fn test_two_replicas_converge_on_concurrent_edits() {
        let mut alice = Replica::new(1);
        let mut bob = Replica::new(2);

        // Alice creates an item; both replicas confirm it.
        let (add, id) = add_note();
        alice.commit(add);
        let pack = alice.publish(1);
        bob.receive(&pack);

        // Concurrent edits: Alice moves, Bob types.
        alice.commit(translate(id, 10.0, 0.0));
        bob.commit(Operation::Text(TextOp {
            id,
            edits: vec![TextEdit::Insert { path: vec![0], offset: 0, text: "hi".into() }],
        }));

        // Server orders Alice first.
        let alice_pack = alice.publish(2);
        bob.receive(&alice_pack);
        let bob_pack = bob.publish(3);
        alice.receive(&bob_pack);

        assert_eq!(alice.board, bob.board);
        assert_eq!(alice.board.item_transform(id).unwrap().translate, Vec2::new(10.0, 0.0));
        assert_eq!(alice.board.note_text(id).unwrap().plain_text(), "hi");
    }

    #[test]
    fn test_concurrent_removals_converge_with_first_remover_winning() {
        let mut alice = Replica::new(1);
        let mut bob = Replica::new(2);

        let x = ItemState::note(ItemId::new(), 0);
        let y = ItemState::note(ItemId::new(), 1);
        let (x_id, y_id) = (x.id, y.id);
        alice.commit(Operation::Structure(StructureOp::Add {
            items: vec![x, y],
            created_at: None,
        }));
        let pack = alice.publish(1);
        bob.receive(&pack);

        // Alice removes X; Bob concurrently removes X and Y.
        alice.commit(Operation::Structure(StructureOp::Remove { ids: vec![x_id] }));
        bob.commit(Operation::Structure(StructureOp::Remove { ids: vec![x_id, y_id] }));

        let alice_pack = alice.publish(2);
        bob.receive(&alice_pack);
        let bob_pack = bob.publish(3);
        alice.receive(&bob_pack);

        assert_eq!(alice.board, bob.board);
        assert!(alice.board.is_empty());
    }

    #[test]
    fn test_replay_from_pack_wire_roundtrip() {
        // Packs survive the JSON wire unchanged.
        let mut alice = Replica::new(1);
        let (add, id) = add_note();
        alice.commit(add);
        alice.commit(translate(id, 3.0, 4.0));
        let pack = alice.publish(1);

        let wire = serde_json::to_string(&pack).unwrap();
        let decoded: SyncEventPack = serde_json::from_str(&wire).unwrap();
        assert_eq!(decoded, pack);

        let mut bob = Replica::new(2);
        bob.receive(&decoded);
        assert_eq!(bob.board, alice.board);
    }

    #[test]
    fn test_event_ids_remain_stable_across_coalescing() {
        let mut alice = Replica::new(1);
        let (add, id) = add_note();
        alice.commit(add);
        alice.commit(translate(id, 1.0, 0.0));
        alice.commit(translate(id, 1.0, 0.0));

        // The two moves coalesced; the surviving record keeps the earlier id.
        let pack = alice.log.make_pack().unwrap();
        assert_eq!(pack.body.operations.len(), 2);
        assert_eq!(
            pack.body.operations[1].actual_id,
            Some(EventId::new(UserId(1), 2))
        );
        assert_eq!(
            pack.body.operations[1].operation,
            translate(id, 2.0, 0.0)
        );

        let ops: Vec<&PackedOperation> = pack.body.operations.iter().collect();
        assert_eq!(pack.body.event_id, EventId::new(UserId(1), 1));
        assert!(ops[0].actual_id.is_none());
    }

    #[test]
    fn test_pack_header_shape() {
        let mut alice = Replica::new(7);
        let (add, _) = add_note();
        alice.commit(add);
        let pack = alice.log.make_pack().unwrap();
        assert_eq!(pack.body.document_id, "doc-1");
        assert_eq!(pack.user_id, UserId(7));
        assert_eq!(pack.last_known_order, 0);
        assert_eq!(pack.order, 0);

        let PackBody { operations, .. } = pack.body;
        assert_eq!(operations.len(), 1);
    }
}
