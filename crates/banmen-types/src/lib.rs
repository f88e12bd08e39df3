//! Shared identifiers, operation model, and wire shapes for Banmen.
//!
//! This crate is the leaf of the workspace: pure data, no engine logic.
//! Everything here is serializable; the operation model is a closed tagged
//! union per mutation family, and the wire shapes mirror the sync protocol
//! (camelCase fields, `kind`-tagged envelopes).

mod event;
mod ids;
mod item;
mod op;

pub use event::{
    ClientMessage, Event, EventBody, EventPack, PackBody, PackedOperation, ServerMessage,
    Snapshot, SyncEvent, SyncEventPack,
};
pub use ids::{EventId, EventIdParseError, GroupId, ItemId, UserId};
pub use item::{Anchor, ItemBody, ItemState, RichText, TextBlock, Transform2d};
pub use op::{
    EndpointEnd, GeometryChange, GeometryOp, GroupOp, HistoryOp, Operation, StructureOp,
    TextEdit, TextOp, ZOrderMove,
};

// Geometry primitives are part of the public vocabulary.
pub use kurbo::{Point, Vec2};
