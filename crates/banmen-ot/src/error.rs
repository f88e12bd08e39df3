//! Error types for the sync engine.

use banmen_types::{EventId, GroupId, ItemId};
use thiserror::Error;

/// Errors that can occur while deriving, applying, or reverting operations.
#[derive(Error, Debug)]
pub enum OtError {
    /// An operation's target is required and missing. Deriving a reverse for
    /// a structural op whose item no longer exists is a precondition
    /// violation of the command, not a recoverable condition.
    #[error("item not found: {0:?}")]
    ItemNotFound(ItemId),

    /// Creation of an item whose id already exists on the board.
    #[error("item already exists: {0:?}")]
    DuplicateItem(ItemId),

    /// Group lookup failed while deriving a reverse.
    #[error("group not found: {0:?}")]
    GroupNotFound(GroupId),

    /// A text edit addressed a block index that does not exist.
    #[error("no text block at {path:?} in item {id:?}")]
    NodeNotFound { id: ItemId, path: Vec<usize> },

    /// A text edit offset falls outside its block.
    #[error("edit offset {offset} out of bounds for block of length {len}")]
    OffsetOutOfBounds { offset: usize, len: usize },

    /// A scale with factor 0 has no inverse.
    #[error("non-invertible scale factor {0}")]
    DegenerateScale(f64),

    /// A history marker referenced an event not present in the log.
    #[error("record not found: {0}")]
    RecordNotFound(EventId),

    /// A history marker referenced a record whose command was not rebuilt
    /// (snapshot restore without replay).
    #[error("record {0} has no bound command")]
    MissingCommand(EventId),

    /// History operations bind through the event log, never directly.
    #[error("history operation reached a direct apply path")]
    UnboundHistory,

    /// Snapshot encode/decode failure.
    #[error("snapshot serialization error: {0}")]
    Snapshot(String),
}

/// Result type for sync-engine operations.
pub type Result<T> = std::result::Result<T, OtError>;
