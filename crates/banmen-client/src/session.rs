//! The single-task session loop.
//!
//! Wraps a board, its event log, and the handshake driver in one tokio task.
//! Timer ticks, inbound server messages, and local commands all drain
//! through the same `select!` loop, so no queue mutation ever overlaps with
//! another — the cooperative model the engine requires, without locks.
//!
//! ```text
//!   SessionHandle (Clone)        mpsc       Session task (single-threaded)
//!   ┌─────────────────────┐   ────────▶   ┌─────────────────────────────┐
//!   │ .commit(op)         │               │ Board + EventLog + Driver   │
//!   │ .undo() / .redo()   │   ◀────────   │ publish / resend timers     │
//!   │ .snapshot()         │    oneshot    │ inbound confirmations/events│
//!   └─────────────────────┘               └─────────────────────────────┘
//! ```

use banmen_ot::{Board, EventLog, IngestOutcome, OtError};
use banmen_types::{EventId, Operation, ServerMessage, Snapshot, UserId};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::{SessionNotice, SyncConfig, SyncDriver, Transport};

/// Errors surfaced to session handle callers.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session shut down")]
    Shutdown,
    #[error(transparent)]
    Engine(#[from] OtError),
}

/// Internal command sent from SessionHandle to the session task.
enum SessionCommand {
    Commit {
        op: Operation,
        reply: oneshot::Sender<Result<EventId, OtError>>,
    },
    Undo {
        reply: oneshot::Sender<Result<Option<EventId>, OtError>>,
    },
    Redo {
        reply: oneshot::Sender<Result<Option<EventId>, OtError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Result<Snapshot, OtError>>,
    },
    Shutdown,
}

/// Out-of-band notifications for the embedding application.
#[derive(Debug)]
pub enum SessionEvent {
    Notice(SessionNotice),
    Ingested(IngestOutcome),
}

/// Cloneable handle to a running session task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Apply a local operation optimistically.
    pub async fn commit(&self, op: Operation) -> Result<EventId, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(SessionCommand::Commit { op, reply }).map_err(|_| SessionError::Shutdown)?;
        Ok(rx.await.map_err(|_| SessionError::Shutdown)??)
    }

    /// Undo this user's most recent operation, if permitted.
    pub async fn undo(&self) -> Result<Option<EventId>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(SessionCommand::Undo { reply }).map_err(|_| SessionError::Shutdown)?;
        Ok(rx.await.map_err(|_| SessionError::Shutdown)??)
    }

    /// Redo this user's most recent undo, if the chain is intact.
    pub async fn redo(&self) -> Result<Option<EventId>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(SessionCommand::Redo { reply }).map_err(|_| SessionError::Shutdown)?;
        Ok(rx.await.map_err(|_| SessionError::Shutdown)??)
    }

    /// Capture a reconnect snapshot of the confirmed state.
    pub async fn snapshot(&self) -> Result<Snapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(SessionCommand::Snapshot { reply }).map_err(|_| SessionError::Shutdown)?;
        Ok(rx.await.map_err(|_| SessionError::Shutdown)??)
    }

    /// Ask the session task to stop after draining current work.
    pub fn shutdown(&self) {
        let _ = self.tx.send(SessionCommand::Shutdown);
    }
}

/// One document's sync session: board, log, and handshake driver behind a
/// command channel.
pub struct Session {
    board: Board,
    log: EventLog,
    driver: SyncDriver,
    config: SyncConfig,
    transport: Box<dyn Transport>,
    inbound: mpsc::UnboundedReceiver<ServerMessage>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Session {
    /// Build a session plus its handle and event stream.
    pub fn new(
        document_id: impl Into<String>,
        user_id: UserId,
        config: SyncConfig,
        transport: Box<dyn Transport>,
        inbound: mpsc::UnboundedReceiver<ServerMessage>,
    ) -> (Self, SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let document_id = document_id.into();
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let session = Self {
            board: Board::new(),
            log: EventLog::new(document_id.clone(), user_id),
            driver: SyncDriver::new(document_id, user_id, config),
            config,
            transport,
            inbound,
            commands,
            events,
        };
        (session, SessionHandle { tx: command_tx }, event_rx)
    }

    /// Run the session loop until shutdown or channel closure.
    pub async fn run(mut self) {
        let mut publish = tokio::time::interval(self.config.publish_interval);
        let mut resend = tokio::time::interval(self.config.resend_interval);

        loop {
            tokio::select! {
                // Biased: inbound server state lands before later local
                // commands observe it, keeping the loop deterministic.
                biased;
                message = self.inbound.recv() => match message {
                    Some(message) => self.handle_server_message(message),
                    None => break,
                },
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Commit { op, reply }) => {
                        let _ = reply.send(self.log.commit(op, &mut self.board));
                    }
                    Some(SessionCommand::Undo { reply }) => {
                        let _ = reply.send(self.log.undo(&mut self.board));
                    }
                    Some(SessionCommand::Redo { reply }) => {
                        let _ = reply.send(self.log.redo(&mut self.board));
                    }
                    Some(SessionCommand::Snapshot { reply }) => {
                        let _ = reply.send(self.log.snapshot(&self.board));
                    }
                    Some(SessionCommand::Shutdown) | None => break,
                },
                _ = publish.tick() => {
                    self.driver.tick_publish(
                        &mut self.log,
                        self.transport.as_mut(),
                        std::time::Instant::now(),
                    );
                }
                _ = resend.tick() => {
                    if let Some(notice) = self
                        .driver
                        .tick_resend(self.transport.as_mut(), std::time::Instant::now())
                    {
                        let _ = self.events.send(SessionEvent::Notice(notice));
                    }
                }
            }
        }
    }

    fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Confirmation { document_id, sequence_number, order } => {
                if let Some(notice) = self.driver.handle_confirmation(
                    &mut self.log,
                    &document_id,
                    sequence_number,
                    order,
                ) {
                    let _ = self.events.send(SessionEvent::Notice(notice));
                }
            }
            ServerMessage::BoardEvents { document_id, events } => {
                if document_id != self.log.document_id() {
                    warn!(got = %document_id, "events for foreign document, ignoring");
                    return;
                }
                match self.log.ingest(&mut self.board, &events) {
                    Ok(outcome) => {
                        let _ = self.events.send(SessionEvent::Ingested(outcome));
                    }
                    Err(error) => warn!(%error, "failed to ingest remote events"),
                }
            }
        }
    }
}
