//! The event log facade.
//!
//! Composes the three-queue history with local commit, per-user undo/redo,
//! outbound pack assembly, confirmation handling, and snapshotting. This is
//! the integration point the rest of the application calls; the board stays
//! caller-owned and is passed into every mutating entry point.

use banmen_types::{
    Event, EventBody, EventId, HistoryOp, Operation, PackBody, PackedOperation, Snapshot,
    SyncEventPack, UserId,
};
use tracing::{debug, warn};

use crate::{Board, Command, EventQueue, HistoryRecord, OtError, Result};

/// Per-document event log: one instance owns one document's queues.
#[derive(Debug)]
pub struct EventLog {
    document_id: String,
    user_id: UserId,
    queue: EventQueue,
    /// Local event counter; stamps `EventId { user_id, counter }`.
    next_counter: u64,
    /// Highest confirmed server order observed so far.
    last_known_order: u64,
}

impl EventLog {
    pub fn new(document_id: impl Into<String>, user_id: UserId) -> Self {
        Self {
            document_id: document_id.into(),
            user_id,
            queue: EventQueue::new(),
            next_counter: 0,
            last_known_order: 0,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn last_known_order(&self) -> u64 {
        self.last_known_order
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub(crate) fn queue_mut(&mut self) -> &mut EventQueue {
        &mut self.queue
    }

    pub(crate) fn observe_order(&mut self, order: u64) {
        self.last_known_order = self.last_known_order.max(order);
    }

    // =========================================================================
    // Local commits
    // =========================================================================

    /// Apply a local operation optimistically and record it in the fresh
    /// queue (coalescing with the queue tail where possible).
    pub fn commit(&mut self, op: Operation, board: &mut Board) -> Result<EventId> {
        let command = if op.is_history() {
            self.bind_history(op)?
        } else {
            Command::derive(op, board)?
        };
        command.apply(board)?;

        self.next_counter += 1;
        let event_id = EventId::new(self.user_id, self.next_counter);
        let event = Event {
            order: 0,
            body: EventBody {
                event_id,
                user_id: self.user_id,
                document_id: self.document_id.clone(),
                operation: command.op().clone(),
            },
        };
        self.queue.add_new(HistoryRecord { event, command: Some(command) });
        Ok(event_id)
    }

    /// Resolve a history marker against the record it references.
    fn bind_history(&self, op: Operation) -> Result<Command> {
        let target_id = match &op {
            Operation::History(HistoryOp::Undo { event_id })
            | Operation::History(HistoryOp::Redo { event_id }) => *event_id,
            _ => return Err(OtError::UnboundHistory),
        };
        let record = self.queue.find_record(target_id).ok_or(OtError::RecordNotFound(target_id))?;
        let target = record.command.clone().ok_or(OtError::MissingCommand(target_id))?;
        Ok(Command::history(op, target))
    }

    // =========================================================================
    // Undo / redo
    // =========================================================================

    /// Undo the requesting user's most recent not-yet-undone operation.
    ///
    /// Only permitted while nothing is in flight: undoing into an
    /// unconfirmed edit would rewind state the server may still reorder.
    pub fn undo(&mut self, board: &mut Board) -> Result<Option<EventId>> {
        let Some(target) = self.undo_target() else {
            return Ok(None);
        };
        let id = self.commit(Operation::History(HistoryOp::Undo { event_id: target }), board)?;
        Ok(Some(id))
    }

    /// Redo the requesting user's most recent undo.
    pub fn redo(&mut self, board: &mut Board) -> Result<Option<EventId>> {
        let Some(target) = self.redo_target() else {
            return Ok(None);
        };
        let id = self.commit(Operation::History(HistoryOp::Redo { event_id: target }), board)?;
        Ok(Some(id))
    }

    /// Walk the confirmed log backward for the record the next undo should
    /// revert, skipping other authors and non-undoable kinds. The counter
    /// skips over already-undone stretches: an undo marker raises it, a
    /// redo lowers it, and a plain operation either closes a marker or is
    /// the answer.
    fn undo_target(&self) -> Option<EventId> {
        if !self.queue.unconfirmed_is_empty() {
            return None;
        }
        let mut counter: i64 = 0;
        for record in self.queue.confirmed().iter().rev() {
            if record.event.body.user_id != self.user_id {
                continue;
            }
            let op = &record.event.body.operation;
            if !op.is_undoable() {
                continue;
            }
            match op {
                Operation::History(HistoryOp::Undo { .. }) => counter += 1,
                Operation::History(HistoryOp::Redo { .. }) => counter -= 1,
                _ => {
                    if counter == 0 {
                        if record.command.is_none() {
                            // Restored without replay; nothing to revert with.
                            continue;
                        }
                        return Some(record.event.body.event_id);
                    }
                    counter -= 1;
                }
            }
        }
        None
    }

    /// Walk all records backward for the operation the next redo should
    /// re-apply. Any plain operation — by any user — breaks the contiguous
    /// undo/redo chain and aborts the walk.
    fn redo_target(&self) -> Option<EventId> {
        let mut counter: i64 = 0;
        for record in self.queue.iter_all().collect::<Vec<_>>().into_iter().rev() {
            let mine = record.event.body.user_id == self.user_id;
            match &record.event.body.operation {
                Operation::History(HistoryOp::Redo { .. }) => {
                    if mine {
                        counter += 1;
                    }
                }
                Operation::History(HistoryOp::Undo { event_id }) => {
                    if mine {
                        if counter == 0 {
                            return Some(*event_id);
                        }
                        counter -= 1;
                    }
                }
                _ => return None,
            }
        }
        None
    }

    // =========================================================================
    // Outbound packs and confirmations
    // =========================================================================

    /// Batch unsent records into an outbound pack, promoting the fresh
    /// queue when nothing else is in flight.
    pub fn make_pack(&mut self) -> Option<SyncEventPack> {
        let last_known_order = self.last_known_order;
        let user_id = self.user_id;
        let document_id = self.document_id.clone();

        let records = self.queue.promote_fresh()?;
        let pack_id = records[0].event.body.event_id;
        let operations = records
            .iter()
            .map(|record| {
                let id = record.event.body.event_id;
                PackedOperation {
                    operation: record.event.body.operation.clone(),
                    actual_id: (id != pack_id).then_some(id),
                }
            })
            .collect();

        Some(SyncEventPack {
            order: 0,
            body: PackBody { event_id: pack_id, user_id, document_id, operations },
            last_known_order,
            user_id,
        })
    }

    /// Apply a server confirmation for the in-flight pack.
    ///
    /// `expected_operations` is the operation count of the pack being
    /// confirmed; a mismatch against the pending queue aborts (the pack
    /// stays pending for the next resend cycle).
    pub fn confirm(&mut self, order: u64, expected_operations: usize) -> bool {
        let pending = self.queue.pending_send().len();
        if pending != expected_operations {
            warn!(
                pending,
                expected_operations, "confirmation record count mismatch, keeping pack pending"
            );
            return false;
        }
        if pending == 0 {
            debug!("confirmation with nothing pending, ignoring");
            return false;
        }
        self.queue.confirm(order);
        self.observe_order(order);
        true
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Capture the confirmed history plus the opaque board serialization.
    pub fn snapshot(&self, board: &Board) -> Result<Snapshot> {
        Ok(Snapshot {
            events: self.queue.confirmed().iter().map(|r| r.event.clone()).collect(),
            items: board.to_bytes()?,
            last_index: self.last_known_order,
        })
    }

    /// Rebuild log and board from a snapshot without replaying through live
    /// targets. Restored records carry no commands: they ground gap
    /// detection and transforms but are skipped by the undo walk.
    pub fn restore_from_snapshot(
        document_id: impl Into<String>,
        user_id: UserId,
        snapshot: &Snapshot,
    ) -> Result<(Self, Board)> {
        let board = Board::from_bytes(&snapshot.items)?;
        let mut log = Self::new(document_id, user_id);
        for event in &snapshot.events {
            log.resume_counter(event);
            log.queue.push_confirmed(HistoryRecord { event: event.clone(), command: None });
        }
        log.last_known_order = snapshot.last_index;
        Ok((log, board))
    }

    /// Rebuild log and board by replaying confirmed events from an empty
    /// board (initial document load). Commands are re-derived at each step,
    /// so the full history stays undoable.
    pub fn restore_with_replay(
        document_id: impl Into<String>,
        user_id: UserId,
        events: Vec<Event>,
    ) -> Result<(Self, Board)> {
        let mut board = Board::new();
        let mut log = Self::new(document_id, user_id);
        for event in events {
            log.resume_counter(&event);
            let op = &event.body.operation;
            let command = if op.is_history() {
                log.bind_history(op.clone())?
            } else {
                Command::derive(op.clone(), &board)?
            };
            command.apply(&mut board)?;
            log.observe_order(event.order);
            log.queue.push_confirmed(HistoryRecord { event, command: Some(command) });
        }
        Ok((log, board))
    }

    /// Keep the local counter ahead of any own event id seen in restored
    /// history, so new commits never reuse an id.
    fn resume_counter(&mut self, event: &Event) {
        let id = event.body.event_id;
        if id.author == self.user_id {
            self.next_counter = self.next_counter.max(id.counter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use banmen_types::{GeometryChange, GeometryOp, ItemId, ItemState, StructureOp, Vec2};
    use std::collections::BTreeMap;

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

    /// Commit and immediately confirm, so undo is permitted.
    fn commit_confirmed(log: &mut EventLog, board: &mut Board, op: Operation, order: u64) {
        log.commit(op, board).unwrap();
        let pack = log.make_pack().unwrap();
        assert!(log.confirm(order, pack.body.operations.len()));
    }

    #[test]
    fn test_undo_blocked_while_in_flight() {
        let mut board = Board::new();
        let mut log = EventLog::new("doc-1", UserId(1));
        let (add, _) = add_note();
        log.commit(add, &mut board).unwrap();

        assert!(log.undo(&mut board).unwrap().is_none());
    }

    #[test]
    fn test_undo_redo_symmetry() {
        // op1, op2, op3, undo, undo, redo ends at the state after op1, op2.
        let mut board = Board::new();
        let mut log = EventLog::new("doc-1", UserId(1));
        let (add, id) = add_note();
        commit_confirmed(&mut log, &mut board, add, 1);
        commit_confirmed(&mut log, &mut board, translate(id, 2.0, 0.0), 2);
        let after_two = board.clone();
        commit_confirmed(&mut log, &mut board, translate(id, 0.0, 5.0), 3);

        assert!(log.undo(&mut board).unwrap().is_some());
        let pack = log.make_pack().unwrap();
        assert!(log.confirm(4, pack.body.operations.len()));
        assert!(log.undo(&mut board).unwrap().is_some());
        let pack = log.make_pack().unwrap();
        assert!(log.confirm(5, pack.body.operations.len()));
        assert!(log.redo(&mut board).unwrap().is_some());

        assert_eq!(board, after_two);
    }

    #[test]
    fn test_undo_skips_other_users_records() {
        let mut board = Board::new();
        let mut log = EventLog::new("doc-1", UserId(1));
        let (add, id) = add_note();
        commit_confirmed(&mut log, &mut board, add, 1);
        commit_confirmed(&mut log, &mut board, translate(id, 3.0, 0.0), 2);

        // A remote user's confirmed record lands on top.
        let remote_op = translate(id, 0.0, 7.0);
        let remote_command = Command::derive(remote_op.clone(), &board).unwrap();
        remote_command.apply(&mut board).unwrap();
        log.queue_mut().push_confirmed(HistoryRecord {
            event: Event {
                order: 3,
                body: EventBody {
                    event_id: EventId::new(UserId(2), 1),
                    user_id: UserId(2),
                    document_id: "doc-1".into(),
                    operation: remote_op,
                },
            },
            command: Some(remote_command),
        });
        log.observe_order(3);

        // Undo reverts this user's translation, not the remote one.
        assert!(log.undo(&mut board).unwrap().is_some());
        let transform = board.item_transform(id).unwrap();
        assert_eq!(transform.translate, Vec2::new(0.0, 7.0));
    }

    #[test]
    fn test_redo_aborts_on_any_users_interleaved_edit() {
        let mut board = Board::new();
        let mut log = EventLog::new("doc-1", UserId(1));
        let (add, id) = add_note();
        commit_confirmed(&mut log, &mut board, add, 1);
        commit_confirmed(&mut log, &mut board, translate(id, 1.0, 0.0), 2);
        assert!(log.undo(&mut board).unwrap().is_some());
        let pack = log.make_pack().unwrap();
        assert!(log.confirm(3, pack.body.operations.len()));

        // Another user's plain edit breaks the undo/redo chain.
        let remote_op = translate(id, 0.0, 1.0);
        let remote_command = Command::derive(remote_op.clone(), &board).unwrap();
        remote_command.apply(&mut board).unwrap();
        log.queue_mut().push_confirmed(HistoryRecord {
            event: Event {
                order: 4,
                body: EventBody {
                    event_id: EventId::new(UserId(2), 1),
                    user_id: UserId(2),
                    document_id: "doc-1".into(),
                    operation: remote_op,
                },
            },
            command: Some(remote_command),
        });

        assert!(log.redo(&mut board).unwrap().is_none());
    }

    #[test]
    fn test_confirmation_count_mismatch_keeps_pack_pending() {
        let mut board = Board::new();
        let mut log = EventLog::new("doc-1", UserId(1));
        let (add, _) = add_note();
        log.commit(add, &mut board).unwrap();
        let pack = log.make_pack().unwrap();

        assert!(!log.confirm(1, pack.body.operations.len() + 1));
        assert_eq!(log.queue().pending_send().len(), 1);
        assert_eq!(log.last_known_order(), 0);

        assert!(log.confirm(1, pack.body.operations.len()));
        assert_eq!(log.last_known_order(), 1);
    }

    #[test]
    fn test_pack_carries_actual_id_overrides() {
        let mut board = Board::new();
        let mut log = EventLog::new("doc-1", UserId(1));
        let (add_a, _) = add_note();
        let (add_b, _) = add_note();
        log.commit(add_a, &mut board).unwrap();
        log.commit(add_b, &mut board).unwrap();

        let pack = log.make_pack().unwrap();
        assert_eq!(pack.body.operations.len(), 2);
        assert_eq!(pack.body.operations[0].actual_id, None);
        assert_eq!(
            pack.body.operations[1].actual_id,
            Some(EventId::new(UserId(1), 2))
        );
    }

    #[test]
    fn test_snapshot_roundtrip_without_replay() {
        let mut board = Board::new();
        let mut log = EventLog::new("doc-1", UserId(1));
        let (add, id) = add_note();
        commit_confirmed(&mut log, &mut board, add, 1);
        commit_confirmed(&mut log, &mut board, translate(id, 4.0, 4.0), 2);

        let snapshot = log.snapshot(&board).unwrap();
        let (restored_log, restored_board) =
            EventLog::restore_from_snapshot("doc-1", UserId(1), &snapshot).unwrap();

        assert_eq!(restored_board, board);
        assert_eq!(restored_log.last_known_order(), 2);
        assert_eq!(restored_log.queue().confirmed().len(), log.queue().confirmed().len());
        // Restored records are not undoable.
        let mut replayed = restored_board;
        let mut restored_log = restored_log;
        assert!(restored_log.undo(&mut replayed).unwrap().is_none());
    }

    #[test]
    fn test_restore_with_replay_rebuilds_board_and_commands() {
        let mut board = Board::new();
        let mut log = EventLog::new("doc-1", UserId(1));
        let (add, id) = add_note();
        commit_confirmed(&mut log, &mut board, add, 1);
        commit_confirmed(&mut log, &mut board, translate(id, 4.0, 0.0), 2);

        let snapshot = log.snapshot(&board).unwrap();
        let (mut restored_log, mut restored_board) =
            EventLog::restore_with_replay("doc-1", UserId(1), snapshot.events).unwrap();

        assert_eq!(restored_board, board);
        // Replayed history stays undoable.
        assert!(restored_log.undo(&mut restored_board).unwrap().is_some());
        assert_eq!(restored_board.item_transform(id).unwrap().translate, Vec2::ZERO);
    }
}
