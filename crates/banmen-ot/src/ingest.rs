//! Remote ingestion: expand, rewind, transform, merge, apply, replay.
//!
//! Inbound events may arrive batched and may carry gaps in the global
//! order: `lastKnownOrder + 1 < order` means the sender had not yet seen
//! the events in between, so its operation is transformed against every
//! confirmed-or-concurrent event in `(lastKnownOrder, order]` before it is
//! applied. Local optimistic state is reverted around the whole pass and
//! re-applied (transformed and re-derived) on top of the ingested state.

use banmen_types::{Event, EventBody, EventId, ItemId, Operation, SyncEvent, SyncEventPack};
use tracing::{debug, warn};

use crate::{
    default_revert_filter, merge, transform, Board, Command, EventLog, HistoryRecord,
    RecordFilter, Result,
};

/// Side channel of an ingestion pass, for selection/caret restoration by
/// the embedding application.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IngestOutcome {
    /// Items brought into existence by this pass.
    pub created: Vec<ItemId>,
    /// Items whose rich text was edited by this pass.
    pub text_edited: Vec<ItemId>,
    /// Event ids appended to the confirmed log.
    pub confirmed: Vec<EventId>,
}

impl EventLog {
    /// Ingest inbound event packs with the default revert filter (unsent
    /// creations stay applied).
    pub fn ingest(
        &mut self,
        board: &mut Board,
        packs: &[SyncEventPack],
    ) -> Result<IngestOutcome> {
        self.ingest_filtered(board, packs, &default_revert_filter)
    }

    /// Ingest inbound event packs, with a caller-supplied filter deciding
    /// which in-flight records participate in the revert/replay pair.
    pub fn ingest_filtered(
        &mut self,
        board: &mut Board,
        packs: &[SyncEventPack],
        filter: RecordFilter,
    ) -> Result<IngestOutcome> {
        let mut outcome = IngestOutcome::default();

        // 1. Expand batches into individual events; drop foreign-document
        //    traffic and events already replayed (at-least-once delivery).
        let inbound: Vec<SyncEvent> = packs
            .iter()
            .flat_map(|pack| pack.expand())
            .filter(|sync_event| {
                let body = &sync_event.event.body;
                if body.document_id != self.document_id() {
                    warn!(
                        expected = self.document_id(),
                        got = %body.document_id,
                        "event for foreign document, skipping"
                    );
                    return false;
                }
                if self.queue().knows_confirmed(body.event_id) {
                    debug!(event = %body.event_id, "event already confirmed, skipping replay");
                    return false;
                }
                true
            })
            .collect();
        if inbound.is_empty() {
            return Ok(outcome);
        }

        // 2. Rewind local optimistic state to the last-confirmed baseline.
        self.queue_mut().revert_unconfirmed(board, filter)?;

        // 3. Per event: detect a causal gap and transform against every
        //    confirmed-or-concurrent event the sender had not seen. The
        //    sender's own events never count — an author has always seen
        //    its own history, whatever its watermark says.
        let mut batch: Vec<Event> = Vec::new();
        for sync_event in inbound {
            let order = sync_event.event.order;
            let sender_watermark = sync_event.last_known_order;
            let author = sync_event.event.body.user_id;
            let event_id = sync_event.event.body.event_id;

            let mut op = Some(sync_event.event.body.operation.clone());
            if sender_watermark + 1 < order {
                let mut against: Vec<&Event> = self
                    .queue()
                    .confirmed_in_range(sender_watermark, order, author);
                against.extend(batch.iter().filter(|event| {
                    event.order > sender_watermark
                        && event.order <= order
                        && event.body.user_id != author
                }));
                against.sort_by_key(|event| event.order);

                for event in against {
                    op = op.and_then(|op| transform::transform(&event.body.operation, op));
                }
            }

            let Some(op) = op else {
                debug!(event = %event_id, "inbound event suppressed by transform");
                continue;
            };
            batch.push(Event {
                order,
                body: EventBody { operation: op, ..sync_event.event.body },
            });
        }

        // 4. Pairwise-merge the transformed batch to keep emitted history
        //    small. A merged event keeps the earlier one's id and order.
        let mut merged: Vec<Event> = Vec::new();
        for event in batch {
            if let Some(tail) = merged.last_mut() {
                if tail.body.user_id == event.body.user_id {
                    if let Some(op) = merge::merge(&tail.body.operation, &event.body.operation) {
                        tail.body.operation = op;
                        continue;
                    }
                }
            }
            merged.push(event);
        }

        // 5. Bind each event to live targets, apply, and append confirmed.
        let mut appended: Vec<Event> = Vec::new();
        for event in merged {
            let op = &event.body.operation;
            let command = if op.is_history() {
                match self.bind_remote_history(op) {
                    Some(command) => command,
                    None => continue,
                }
            } else {
                match Command::derive(op.clone(), board) {
                    Ok(command) => command,
                    Err(error) => {
                        warn!(
                            event = %event.body.event_id,
                            %error,
                            "inbound operation does not bind, skipping"
                        );
                        continue;
                    }
                }
            };
            command.apply(board)?;

            outcome.created.extend(op.created_ids());
            if let Operation::Text(text_op) = op {
                outcome.text_edited.push(text_op.id);
            }
            outcome.confirmed.push(event.body.event_id);

            self.observe_order(event.order);
            appended.push(event.clone());
            self.queue_mut().push_confirmed(HistoryRecord { event, command: Some(command) });
        }

        // 6. Replay local optimistic state on top, corrected for the events
        //    just confirmed.
        self.queue_mut().apply_unconfirmed(board, &appended, filter)?;

        Ok(outcome)
    }

    fn bind_remote_history(&self, op: &Operation) -> Option<Command> {
        let target_id = match op {
            Operation::History(banmen_types::HistoryOp::Undo { event_id })
            | Operation::History(banmen_types::HistoryOp::Redo { event_id }) => *event_id,
            _ => return None,
        };
        let record = self.queue().find_confirmed(target_id)?;
        match &record.command {
            Some(target) => Some(Command::history(op.clone(), target.clone())),
            None => {
                warn!(event = %target_id, "remote history marker references command-less record");
                None
            }
        }
    }
}
