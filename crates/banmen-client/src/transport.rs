//! The transport seam.
//!
//! The sync core only ever needs `send`; sockets, reconnects, and framing
//! live behind this trait. Delivery is fire-and-forget — reliability comes
//! from the resend cycle, not from the transport.

use banmen_types::ClientMessage;
use tokio::sync::mpsc;
use tracing::warn;

/// Outbound message sink.
pub trait Transport: Send {
    fn send(&mut self, message: ClientMessage);
}

/// Channel-backed transport: hands outbound messages to whatever task owns
/// the socket. Also the standard test double.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<ClientMessage>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, message: ClientMessage) {
        if self.tx.send(message).is_err() {
            // The resend cycle will retry once a transport is back.
            warn!("transport closed, dropping outbound message");
        }
    }
}
