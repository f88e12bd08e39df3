//! The three-queue event history.
//!
//! Every operation that produced the current local board state sits in
//! exactly one of three ordered lists:
//!
//! ```text
//! confirmed    server-acknowledged, order final and increasing
//! pending_send applied locally, included in the in-flight pack
//! fresh        applied locally, not yet batched
//! ```
//!
//! Their concatenation, replayed in order from an empty board, always
//! reproduces the local state. `fresh` only migrates into `pending_send`
//! when the latter is empty — one pack in flight at a time.
//!
//! The side `SyncLog` records queue transitions for observability and
//! tests; it is never consulted for correctness.

use std::collections::HashMap;

use banmen_types::{Event, EventId, Operation, StructureOp, UserId};
use strum::AsRefStr;
use tracing::warn;

use crate::{transform, Board, Command, Result};

/// One history entry: the wire event plus its bound command.
///
/// `command` is `None` only for records rebuilt by a replay-free snapshot
/// restore; such records still participate in gap detection and transforms
/// but cannot be undone or reverted.
#[derive(Clone, Debug)]
pub struct HistoryRecord {
    pub event: Event,
    pub command: Option<Command>,
}

/// Queue-transition kinds recorded in the sync log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "camelCase")]
pub enum SyncLogKind {
    AddedNew,
    ToSend,
    Confirmed,
    RevertUnconfirmed,
    ApplyUnconfirmed,
}

/// One sync-log entry: a transition kind and the records it touched.
#[derive(Clone, Debug)]
pub struct SyncLogEntry {
    pub kind: SyncLogKind,
    pub events: Vec<EventId>,
}

/// Append-only transition log; consecutive entries of the same kind
/// coalesce.
#[derive(Debug, Default)]
pub struct SyncLog {
    entries: Vec<SyncLogEntry>,
}

impl SyncLog {
    pub fn record(&mut self, kind: SyncLogKind, events: Vec<EventId>) {
        if events.is_empty() {
            return;
        }
        match self.entries.last_mut() {
            Some(last) if last.kind == kind => last.events.extend(events),
            _ => self.entries.push(SyncLogEntry { kind, events }),
        }
    }

    pub fn entries(&self) -> &[SyncLogEntry] {
        &self.entries
    }
}

/// Which unconfirmed queue a record sits in, for revert/replay filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingKind {
    PendingSend,
    Fresh,
}

/// Decides whether an in-flight record participates in the revert/replay
/// pair around remote ingestion. Excluded records stay applied throughout.
pub type RecordFilter<'a> = &'a dyn Fn(PendingKind, &HistoryRecord) -> bool;

/// Default ingestion filter: keep not-yet-sent creations applied, so a
/// half-created item is not flashed away under the user's cursor.
pub fn default_revert_filter(kind: PendingKind, record: &HistoryRecord) -> bool {
    !(kind == PendingKind::Fresh
        && matches!(
            record.event.body.operation,
            Operation::Structure(StructureOp::Add { .. })
        ))
}

/// The three-queue history for one document.
#[derive(Debug, Default)]
pub struct EventQueue {
    confirmed: Vec<HistoryRecord>,
    pending_send: Vec<HistoryRecord>,
    fresh: Vec<HistoryRecord>,
    /// Event id -> index into `confirmed`. Ids merged away by coalescing
    /// keep an entry pointing at the surviving record.
    confirmed_index: HashMap<EventId, usize>,
    log: SyncLog,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn confirmed(&self) -> &[HistoryRecord] {
        &self.confirmed
    }

    pub fn pending_send(&self) -> &[HistoryRecord] {
        &self.pending_send
    }

    pub fn fresh(&self) -> &[HistoryRecord] {
        &self.fresh
    }

    pub fn log(&self) -> &SyncLog {
        &self.log
    }

    /// True when nothing is awaiting confirmation or batching.
    pub fn unconfirmed_is_empty(&self) -> bool {
        self.pending_send.is_empty() && self.fresh.is_empty()
    }

    /// O(1) confirmed lookup by event id.
    pub fn find_confirmed(&self, id: EventId) -> Option<&HistoryRecord> {
        self.confirmed_index.get(&id).map(|&idx| &self.confirmed[idx])
    }

    /// Whether an event id is already part of the confirmed log (idempotent
    /// replay check for at-least-once delivery).
    pub fn knows_confirmed(&self, id: EventId) -> bool {
        self.confirmed_index.contains_key(&id)
    }

    /// Lookup across all three queues, newest first.
    pub fn find_record(&self, id: EventId) -> Option<&HistoryRecord> {
        self.fresh
            .iter()
            .chain(self.pending_send.iter())
            .find(|r| r.event.body.event_id == id)
            .or_else(|| self.find_confirmed(id))
    }

    /// All records in application order.
    pub fn iter_all(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.confirmed.iter().chain(self.pending_send.iter()).chain(self.fresh.iter())
    }

    /// Confirmed events with order in `(after, up_to]` that `author` had
    /// not seen: the author's own events are excluded, since a sender has
    /// always observed its own history regardless of its watermark.
    pub fn confirmed_in_range(
        &self,
        after: u64,
        up_to: u64,
        author: UserId,
    ) -> Vec<&Event> {
        self.confirmed
            .iter()
            .map(|r| &r.event)
            .filter(|e| e.order > after && e.order <= up_to && e.body.user_id != author)
            .collect()
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Append a freshly applied local record, coalescing with the fresh
    /// tail when the merge engine allows it.
    pub fn add_new(&mut self, record: HistoryRecord) {
        let id = record.event.body.event_id;
        if let Some(tail) = self.fresh.last_mut() {
            if tail.event.body.user_id == record.event.body.user_id {
                if let (Some(tail_command), Some(command)) = (&mut tail.command, &record.command) {
                    if tail_command.merge(command) {
                        tail.event.body.operation = tail_command.op().clone();
                        self.log.record(SyncLogKind::AddedNew, vec![id]);
                        return;
                    }
                }
            }
        }
        self.fresh.push(record);
        self.log.record(SyncLogKind::AddedNew, vec![id]);
    }

    /// Promote `fresh` into `pending_send`, but only when nothing else is
    /// in flight. Returns the records now awaiting send.
    pub fn promote_fresh(&mut self) -> Option<&[HistoryRecord]> {
        if !self.pending_send.is_empty() || self.fresh.is_empty() {
            return None;
        }
        self.pending_send = std::mem::take(&mut self.fresh);
        let ids = self.pending_send.iter().map(|r| r.event.body.event_id).collect();
        self.log.record(SyncLogKind::ToSend, ids);
        Some(&self.pending_send)
    }

    /// Apply a server confirmation: stamp the final order on every pending
    /// record and move them onto the confirmed tail.
    pub fn confirm(&mut self, order: u64) -> Vec<EventId> {
        let records = std::mem::take(&mut self.pending_send);
        let ids: Vec<_> = records.iter().map(|r| r.event.body.event_id).collect();
        for mut record in records {
            record.event.order = order;
            self.push_confirmed(record);
        }
        self.log.record(SyncLogKind::Confirmed, ids.clone());
        ids
    }

    /// Append one confirmed record, coalescing with the confirmed tail so
    /// the log stays compact over long sessions. A merged-away id keeps an
    /// index entry pointing at the surviving record.
    pub fn push_confirmed(&mut self, record: HistoryRecord) {
        let id = record.event.body.event_id;
        if let Some(tail) = self.confirmed.last_mut() {
            if tail.event.body.user_id == record.event.body.user_id {
                if let (Some(tail_command), Some(command)) = (&mut tail.command, &record.command) {
                    if tail_command.merge(command) {
                        tail.event.body.operation = tail_command.op().clone();
                        // The merged event keeps the earlier record's
                        // position and order.
                        let tail_idx = self.confirmed.len() - 1;
                        self.confirmed_index.insert(id, tail_idx);
                        return;
                    }
                }
            }
        }
        self.confirmed_index.insert(id, self.confirmed.len());
        self.confirmed.push(record);
    }

    /// Revert every participating in-flight record, newest first, restoring
    /// the board to the last-confirmed state.
    pub fn revert_unconfirmed(&mut self, board: &mut Board, filter: RecordFilter) -> Result<()> {
        let mut reverted = Vec::new();
        for (kind, record) in self
            .fresh
            .iter()
            .rev()
            .map(|r| (PendingKind::Fresh, r))
            .chain(self.pending_send.iter().rev().map(|r| (PendingKind::PendingSend, r)))
        {
            if !filter(kind, record) {
                continue;
            }
            match &record.command {
                Some(command) => {
                    command.revert(board)?;
                    reverted.push(record.event.body.event_id);
                }
                None => warn!(
                    event = %record.event.body.event_id,
                    "in-flight record without command, cannot revert"
                ),
            }
        }
        self.log.record(SyncLogKind::RevertUnconfirmed, reverted);
        Ok(())
    }

    /// Re-apply in-flight records on top of newly ingested remote state.
    ///
    /// Participating records are first transformed against the events just
    /// confirmed in this pass, then re-derived against the now-current
    /// board. A record whose operation is suppressed by the transform, or
    /// that can no longer bind, is dropped.
    pub fn apply_unconfirmed(
        &mut self,
        board: &mut Board,
        just_confirmed: &[Event],
        filter: RecordFilter,
    ) -> Result<()> {
        let mut applied = Vec::new();

        let pending = std::mem::take(&mut self.pending_send);
        self.pending_send =
            replay_records(pending, PendingKind::PendingSend, board, just_confirmed, filter, &mut applied)?;
        let fresh = std::mem::take(&mut self.fresh);
        self.fresh =
            replay_records(fresh, PendingKind::Fresh, board, just_confirmed, filter, &mut applied)?;

        self.log.record(SyncLogKind::ApplyUnconfirmed, applied);
        Ok(())
    }
}

fn replay_records(
    records: Vec<HistoryRecord>,
    kind: PendingKind,
    board: &mut Board,
    just_confirmed: &[Event],
    filter: RecordFilter,
    applied: &mut Vec<EventId>,
) -> Result<Vec<HistoryRecord>> {
    let mut kept = Vec::with_capacity(records.len());
    for mut record in records {
        let id = record.event.body.event_id;
        if !filter(kind, &record) {
            // Excluded from the revert/replay pair: still applied, keep.
            kept.push(record);
            continue;
        }
        if record.event.body.operation.is_history() {
            // History markers replay their bound command as-is.
            if let Some(command) = &record.command {
                command.apply(board)?;
                applied.push(id);
            }
            kept.push(record);
            continue;
        }

        let mut op = Some(record.event.body.operation.clone());
        for event in just_confirmed {
            op = op.and_then(|op| transform::transform(&event.body.operation, op));
        }
        let Some(op) = op else {
            warn!(event = %id, "in-flight record suppressed by concurrent remote operation");
            continue;
        };

        match Command::derive(op.clone(), board) {
            Ok(command) => {
                command.apply(board)?;
                record.event.body.operation = op;
                record.command = Some(command);
                applied.push(id);
                kept.push(record);
            }
            Err(error) => {
                warn!(event = %id, %error, "dropping in-flight record that no longer binds");
            }
        }
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use banmen_types::{
        EventBody, GeometryChange, GeometryOp, ItemId, ItemState, UserId, Vec2,
    };
    use std::collections::BTreeMap;

    fn keep_all(_: PendingKind, _: &HistoryRecord) -> bool {
        true
    }

    struct Fixture {
        board: Board,
        queue: EventQueue,
        counter: u64,
        original: Vec<Operation>,
    }

    impl Fixture {
        fn new() -> Self {
            Self { board: Board::new(), queue: EventQueue::new(), counter: 0, original: Vec::new() }
        }

        fn commit(&mut self, op: Operation) {
            self.counter += 1;
            let command = Command::derive(op.clone(), &self.board).unwrap();
            command.apply(&mut self.board).unwrap();
            self.original.push(op);
            self.queue.add_new(HistoryRecord {
                event: Event {
                    order: 0,
                    body: EventBody {
                        event_id: banmen_types::EventId::new(UserId(1), self.counter),
                        user_id: UserId(1),
                        document_id: "doc-1".into(),
                        operation: command.op().clone(),
                    },
                },
                command: Some(command),
            });
        }
    }

    fn add_note(z: u32) -> (Operation, ItemId) {
        let item = ItemState::note(ItemId::new(), z);
        let id = item.id;
        (Operation::Structure(StructureOp::Add { items: vec![item], created_at: None }), id)
    }

    fn translate(id: ItemId, x: f64, y: f64) -> Operation {
        Operation::Geometry(GeometryOp::Update {
            changes: BTreeMap::from([(id, GeometryChange::TranslateBy { delta: Vec2::new(x, y) })]),
        })
    }

    #[test]
    fn test_adjacent_translations_coalesce_in_fresh_queue() {
        let mut fx = Fixture::new();
        let (add, id) = add_note(0);
        fx.commit(add);
        fx.commit(translate(id, 2.0, 0.0));
        fx.commit(translate(id, 3.0, 0.0));

        // The two moves coalesced into one record before ever being sent.
        assert_eq!(fx.queue.fresh().len(), 2);
        assert_eq!(
            fx.queue.fresh()[1].event.body.operation,
            translate(id, 5.0, 0.0)
        );
    }

    #[test]
    fn test_one_pack_in_flight() {
        let mut fx = Fixture::new();
        let (add, id) = add_note(0);
        fx.commit(add);
        assert!(fx.queue.promote_fresh().is_some());
        assert_eq!(fx.queue.pending_send().len(), 1);
        assert!(fx.queue.fresh().is_empty());

        fx.commit(translate(id, 1.0, 0.0));
        // Second promotion blocked until the in-flight pack confirms.
        assert!(fx.queue.promote_fresh().is_none());

        fx.queue.confirm(1);
        assert!(fx.queue.pending_send().is_empty());
        assert_eq!(fx.queue.confirmed().len(), 1);
        assert_eq!(fx.queue.confirmed()[0].event.order, 1);

        assert!(fx.queue.promote_fresh().is_some());
    }

    #[test]
    fn test_queue_conservation_under_merging() {
        // Replaying confirmed ++ pending_send ++ fresh from an empty board
        // must reproduce the state the original unmerged sequence produced.
        let mut fx = Fixture::new();
        let (add_a, a) = add_note(0);
        let (add_b, b) = add_note(1);
        fx.commit(add_a);
        fx.commit(translate(a, 2.0, 0.0));
        fx.commit(translate(a, 3.0, 0.0));
        fx.queue.promote_fresh();
        fx.queue.confirm(1);
        fx.commit(add_b);
        fx.commit(translate(b, 0.0, 4.0));

        let mut replayed = Board::new();
        for record in fx.queue.iter_all() {
            replayed.apply(&record.event.body.operation).unwrap();
        }

        let mut original = Board::new();
        for op in &fx.original {
            original.apply(op).unwrap();
        }

        assert_eq!(replayed, original);
        assert_eq!(replayed, fx.board);
    }

    #[test]
    fn test_confirmed_tail_coalesces_and_index_follows() {
        let mut fx = Fixture::new();
        let (add, id) = add_note(0);
        fx.commit(add);
        fx.queue.promote_fresh();
        fx.queue.confirm(1);

        fx.commit(translate(id, 1.0, 0.0));
        fx.queue.promote_fresh();
        fx.queue.confirm(2);
        fx.commit(translate(id, 1.0, 0.0));
        fx.queue.promote_fresh();
        fx.queue.confirm(3);

        // The two confirmed translations merged into one record.
        assert_eq!(fx.queue.confirmed().len(), 2);
        // The merged record keeps the earlier order.
        assert_eq!(fx.queue.confirmed()[1].event.order, 2);
        // Both ids still resolve to the surviving record.
        let second = banmen_types::EventId::new(UserId(1), 2);
        let third = banmen_types::EventId::new(UserId(1), 3);
        assert!(fx.queue.find_confirmed(second).is_some());
        assert!(fx.queue.find_confirmed(third).is_some());
        assert_eq!(
            fx.queue.find_confirmed(third).unwrap().event.body.operation,
            translate(id, 2.0, 0.0)
        );
    }

    #[test]
    fn test_revert_then_apply_restores_state() {
        let mut fx = Fixture::new();
        let (add, id) = add_note(0);
        fx.commit(add);
        fx.queue.promote_fresh();
        fx.queue.confirm(1);
        fx.commit(translate(id, 5.0, 5.0));

        let applied = fx.board.clone();
        fx.queue.revert_unconfirmed(&mut fx.board, &keep_all).unwrap();
        assert_eq!(
            fx.board.item_transform(id).unwrap().translate,
            Vec2::ZERO
        );

        fx.queue.apply_unconfirmed(&mut fx.board, &[], &keep_all).unwrap();
        assert_eq!(fx.board, applied);
    }

    #[test]
    fn test_default_filter_keeps_unsent_creations_applied() {
        let mut fx = Fixture::new();
        let (add, id) = add_note(0);
        fx.commit(add);

        fx.queue.revert_unconfirmed(&mut fx.board, &default_revert_filter).unwrap();
        // The half-created item did not flash away.
        assert!(fx.board.contains(id));

        fx.queue.apply_unconfirmed(&mut fx.board, &[], &default_revert_filter).unwrap();
        assert!(fx.board.contains(id));
        assert_eq!(fx.board.len(), 1);
    }

    #[test]
    fn test_sync_log_coalesces_consecutive_kinds() {
        let mut fx = Fixture::new();
        let (add_a, _) = add_note(0);
        let (add_b, _) = add_note(1);
        fx.commit(add_a);
        fx.commit(add_b);
        fx.queue.promote_fresh();
        fx.queue.confirm(1);

        let kinds: Vec<_> = fx.queue.log().entries().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![SyncLogKind::AddedNew, SyncLogKind::ToSend, SyncLogKind::Confirmed]
        );
        // Two added records coalesced into one AddedNew entry.
        assert_eq!(fx.queue.log().entries()[0].events.len(), 2);
    }
}
