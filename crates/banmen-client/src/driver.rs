//! The outbound sync handshake.
//!
//! One pack in flight at a time. A publish tick batches unsent records into
//! a pack tagged with the local sequence number and the last confirmed
//! order; a resend tick re-sends the same pack, unmodified, until the
//! matching confirmation arrives. Repeated silence turns into a
//! connection-suspect notice for the embedding application — the pack is
//! never abandoned.

use std::time::{Duration, Instant};

use banmen_types::{ClientMessage, UserId};
use banmen_ot::EventLog;
use tracing::{debug, info, warn};

use crate::Transport;

/// Handshake timing knobs.
#[derive(Clone, Copy, Debug)]
pub struct SyncConfig {
    /// How often unsent records are batched into a pack.
    pub publish_interval: Duration,
    /// How long to wait for a confirmation before re-sending.
    pub resend_interval: Duration,
    /// Consecutive unanswered resends before the connection is suspect.
    pub max_silent_resends: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            publish_interval: Duration::from_millis(500),
            resend_interval: Duration::from_secs(3),
            max_silent_resends: 5,
        }
    }
}

/// Connection-health notices surfaced to the embedding application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionNotice {
    /// Several resend intervals passed without a confirmation.
    ConnectionSuspect,
    /// A confirmation arrived after the connection was suspect.
    ConnectionRecovered,
}

/// The single outstanding pack awaiting acknowledgment.
#[derive(Clone, Debug)]
pub struct PendingEvent {
    pub message: ClientMessage,
    pub sequence_number: u64,
    pub last_sent: Instant,
    pub resends: u32,
}

/// Per-connection handshake state machine.
#[derive(Debug)]
pub struct SyncDriver {
    document_id: String,
    user_id: UserId,
    config: SyncConfig,
    sequence_number: u64,
    pending: Option<PendingEvent>,
    suspect: bool,
}

impl SyncDriver {
    pub fn new(document_id: impl Into<String>, user_id: UserId, config: SyncConfig) -> Self {
        Self {
            document_id: document_id.into(),
            user_id,
            config,
            sequence_number: 0,
            pending: None,
            suspect: false,
        }
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn pending(&self) -> Option<&PendingEvent> {
        self.pending.as_ref()
    }

    /// Batch unsent records into a pack and send it. No-op while a pack is
    /// already in flight or there is nothing to send.
    pub fn tick_publish(
        &mut self,
        log: &mut EventLog,
        transport: &mut dyn Transport,
        now: Instant,
    ) -> bool {
        if self.pending.is_some() {
            return false;
        }
        let Some(pack) = log.make_pack() else {
            return false;
        };
        debug!(
            operations = pack.body.operations.len(),
            sequence = self.sequence_number,
            "publishing pack"
        );
        let message = ClientMessage::BoardEvent {
            document_id: self.document_id.clone(),
            event: pack,
            sequence_number: self.sequence_number,
            user_id: self.user_id,
        };
        transport.send(message.clone());
        self.pending = Some(PendingEvent {
            message,
            sequence_number: self.sequence_number,
            last_sent: now,
            resends: 0,
        });
        true
    }

    /// Re-send the outstanding pack if the confirmation is overdue.
    pub fn tick_resend(
        &mut self,
        transport: &mut dyn Transport,
        now: Instant,
    ) -> Option<SessionNotice> {
        let pending = self.pending.as_mut()?;
        if now.duration_since(pending.last_sent) < self.config.resend_interval {
            return None;
        }
        // The pack goes out unmodified; the server dedupes by sequence.
        transport.send(pending.message.clone());
        pending.last_sent = now;
        pending.resends += 1;
        debug!(sequence = pending.sequence_number, resends = pending.resends, "re-sent pack");

        if pending.resends >= self.config.max_silent_resends && !self.suspect {
            self.suspect = true;
            warn!(
                resends = pending.resends,
                "no confirmation after repeated resends, connection suspect"
            );
            return Some(SessionNotice::ConnectionSuspect);
        }
        None
    }

    /// Apply a server confirmation to the outstanding pack.
    ///
    /// A confirmation that does not match the outstanding pack — wrong
    /// document, wrong sequence, or a record-count mismatch inside the log
    /// — is logged and ignored; the pack stays pending for the next resend
    /// cycle.
    pub fn handle_confirmation(
        &mut self,
        log: &mut EventLog,
        document_id: &str,
        sequence_number: u64,
        order: u64,
    ) -> Option<SessionNotice> {
        if document_id != self.document_id {
            warn!(got = document_id, "confirmation for foreign document, ignoring");
            return None;
        }
        let Some(pending) = &self.pending else {
            warn!(sequence_number, "confirmation with no pack outstanding, ignoring");
            return None;
        };
        if pending.sequence_number != sequence_number {
            warn!(
                expected = pending.sequence_number,
                got = sequence_number,
                "confirmation sequence mismatch, ignoring"
            );
            return None;
        }
        let ClientMessage::BoardEvent { event, .. } = &pending.message;
        if !log.confirm(order, event.body.operations.len()) {
            return None;
        }

        self.pending = None;
        self.sequence_number += 1;
        if self.suspect {
            self.suspect = false;
            info!(order, "confirmation received, connection recovered");
            return Some(SessionNotice::ConnectionRecovered);
        }
        None
    }
}
