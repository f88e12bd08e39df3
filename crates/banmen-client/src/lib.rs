//! Outbound sync handshake and session loop for Banmen.
//!
//! The engine crate (`banmen-ot`) is synchronous and transport-agnostic;
//! this crate adds the I/O: a publish/resend handshake driver with one pack
//! in flight, a transport trait for the socket owner, and a single tokio
//! task serializing timers, inbound messages, and local commands — the
//! event loop the engine's cooperative model requires.

mod driver;
mod session;
mod transport;

pub use driver::{PendingEvent, SessionNotice, SyncConfig, SyncDriver};
pub use session::{Session, SessionError, SessionEvent, SessionHandle};
pub use transport::{ChannelTransport, Transport};
