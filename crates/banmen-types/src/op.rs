//! The operation model: every mutation to a board is one of these.
//!
//! Operations are:
//! - **Self-describing**: replaying one against the correct target needs no
//!   state beyond the target's current value. Deletions carry the removed
//!   content for that reason.
//! - **Serializable**: they are the wire payload of every event.
//! - **Closed**: one tagged union per family, matched exhaustively. There is
//!   no runtime handler registry and no optional cross-family field.

use std::collections::BTreeMap;

use kurbo::{Point, Vec2};
use serde::{Deserialize, Serialize};
use strum::AsRefStr;

use crate::{Anchor, EventId, ItemId, ItemState, GroupId, TextBlock};

/// A single mutation, tagged by target family.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "op", rename_all = "camelCase")]
pub enum Operation {
    Structure(StructureOp),
    Geometry(GeometryOp),
    Text(TextOp),
    Group(GroupOp),
    History(HistoryOp),
}

/// Document-structure mutations: item creation and removal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, AsRefStr)]
#[serde(tag = "method", rename_all = "camelCase")]
#[serde(rename_all_fields = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum StructureOp {
    /// Create one or more items. `created_at` is the author's wall-clock
    /// stamp; two adds coalesce only when it is explicit and identical.
    Add {
        items: Vec<ItemState>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        created_at: Option<u64>,
    },
    /// Remove items by id.
    Remove { ids: Vec<ItemId> },
    /// Clone existing items, offsetting the clones. Maps source id to the
    /// id of its clone.
    Duplicate { mapping: BTreeMap<ItemId, ItemId>, offset: Vec2 },
    /// Insert externally serialized items (clipboard). `mapping` relates the
    /// ids items were serialized under to the fresh ids they carry now, so
    /// intra-selection connector references can be rewired.
    Paste { items: Vec<ItemState>, mapping: BTreeMap<ItemId, ItemId> },
}

/// Item-geometry mutations: placement, stacking, connector endpoints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, AsRefStr)]
#[serde(tag = "method", rename_all = "camelCase")]
#[serde(rename_all_fields = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum GeometryOp {
    /// Per-item placement changes. A single-item edit is a one-entry map; a
    /// multi-selection drag is one entry per member.
    Update { changes: BTreeMap<ItemId, GeometryChange> },
    /// Restack one item.
    ZOrder { id: ItemId, to: ZOrderMove },
    /// Re-anchor one end of a connector. `gesture` stamps all moves of a
    /// single drag; endpoint sets only coalesce within one gesture.
    SetEndpoint {
        id: ItemId,
        end: EndpointEnd,
        anchor: Anchor,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gesture: Option<u64>,
    },
}

/// One item's placement change.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
#[serde(rename_all_fields = "camelCase")]
pub enum GeometryChange {
    TranslateBy { delta: Vec2 },
    TranslateTo { pos: Point },
    ScaleBy { factor: f64 },
    ScaleTo { scale: f64 },
    RotateBy { angle: f64 },
    RotateTo { angle: f64 },
    /// Combined scale-and-translate, produced by merging a scale delta with
    /// a translate delta. Components apply independently.
    ScaleTranslate { factor: f64, delta: Vec2 },
}

impl GeometryChange {
    /// Whether this change is a relative delta (algebraically invertible)
    /// rather than an absolute setter.
    pub fn is_delta(&self) -> bool {
        matches!(
            self,
            GeometryChange::TranslateBy { .. }
                | GeometryChange::ScaleBy { .. }
                | GeometryChange::RotateBy { .. }
                | GeometryChange::ScaleTranslate { .. }
        )
    }
}

/// Restacking moves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
#[serde(rename_all_fields = "camelCase")]
pub enum ZOrderMove {
    BringToFront,
    SendToBack,
    MoveTo { index: usize },
}

/// Which end of a connector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndpointEnd {
    Start,
    End,
}

/// Rich-text mutations on a single note item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextOp {
    pub id: ItemId,
    pub edits: Vec<TextEdit>,
}

/// One sub-edit of a text operation.
///
/// `path` addresses a block by index; `offset` is a char offset within the
/// block. Removals carry the removed content so the edit inverts without a
/// state read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, AsRefStr)]
#[serde(tag = "method", rename_all = "camelCase")]
#[serde(rename_all_fields = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum TextEdit {
    Insert { path: Vec<usize>, offset: usize, text: String },
    Delete { path: Vec<usize>, offset: usize, text: String },
    InsertNode { path: Vec<usize>, block: TextBlock },
    RemoveNode { path: Vec<usize>, block: TextBlock },
    /// Split the block at `path` at `offset`; the tail becomes a new block
    /// at the next sibling index.
    SplitNode { path: Vec<usize>, offset: usize },
    /// Merge the block at `path` into its previous sibling.
    MergeNode { path: Vec<usize> },
    /// Toggle a block-level style mark.
    SetMark { path: Vec<usize>, mark: String, on: bool },
}

impl TextEdit {
    /// The block index this edit addresses.
    pub fn node_index(&self) -> usize {
        match self {
            TextEdit::Insert { path, .. }
            | TextEdit::Delete { path, .. }
            | TextEdit::InsertNode { path, .. }
            | TextEdit::RemoveNode { path, .. }
            | TextEdit::SplitNode { path, .. }
            | TextEdit::MergeNode { path }
            | TextEdit::SetMark { path, .. } => path.first().copied().unwrap_or(0),
        }
    }
}

/// Grouping mutations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, AsRefStr)]
#[serde(tag = "method", rename_all = "camelCase")]
#[serde(rename_all_fields = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum GroupOp {
    AddGroup { group: GroupId, items: Vec<ItemId> },
    RemoveGroup { group: GroupId },
}

/// History markers: a synthetic operation that re-applies or reverts the
/// referenced event's command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, AsRefStr)]
#[serde(tag = "method", rename_all = "camelCase")]
#[serde(rename_all_fields = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum HistoryOp {
    Undo { event_id: EventId },
    Redo { event_id: EventId },
}

impl Operation {
    /// Wire name of the operation family, for logs.
    pub fn family(&self) -> &'static str {
        match self {
            Operation::Structure(_) => "structure",
            Operation::Geometry(_) => "geometry",
            Operation::Text(_) => "text",
            Operation::Group(_) => "group",
            Operation::History(_) => "history",
        }
    }

    /// Whether this is an undo/redo marker.
    pub fn is_history(&self) -> bool {
        matches!(self, Operation::History(_))
    }

    /// Ids of items this operation brings into existence.
    pub fn created_ids(&self) -> Vec<ItemId> {
        match self {
            Operation::Structure(StructureOp::Add { items, .. })
            | Operation::Structure(StructureOp::Paste { items, .. }) => {
                items.iter().map(|i| i.id).collect()
            }
            Operation::Structure(StructureOp::Duplicate { mapping, .. }) => {
                mapping.values().copied().collect()
            }
            _ => Vec::new(),
        }
    }

    /// Whether the per-user undo walk may stop at this operation.
    ///
    /// Mid-gesture endpoint drags are high-frequency transients; undoing one
    /// would land the user inside a half-finished drag.
    pub fn is_undoable(&self) -> bool {
        !matches!(
            self,
            Operation::Geometry(GeometryOp::SetEndpoint { gesture: Some(_), .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_wire_tags() {
        let op = Operation::Structure(StructureOp::Remove { ids: vec![ItemId::nil()] });
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["family"], "structure");
        assert_eq!(json["op"]["method"], "remove");

        let back: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_geometry_change_roundtrip() {
        let op = Operation::Geometry(GeometryOp::Update {
            changes: BTreeMap::from([(
                ItemId::nil(),
                GeometryChange::ScaleTranslate { factor: 2.0, delta: Vec2::new(3.0, -1.0) },
            )]),
        });
        let json = serde_json::to_string(&op).unwrap();
        let back: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_created_ids_from_duplicate_mapping() {
        let src = ItemId::new();
        let dst = ItemId::new();
        let op = Operation::Structure(StructureOp::Duplicate {
            mapping: BTreeMap::from([(src, dst)]),
            offset: Vec2::new(16.0, 16.0),
        });
        assert_eq!(op.created_ids(), vec![dst]);
    }

    #[test]
    fn test_gestured_endpoint_moves_are_not_undoable() {
        let drag = Operation::Geometry(GeometryOp::SetEndpoint {
            id: ItemId::nil(),
            end: EndpointEnd::Start,
            anchor: Anchor::Floating { at: Point::ZERO },
            gesture: Some(9),
        });
        assert!(!drag.is_undoable());

        let settled = Operation::Geometry(GeometryOp::SetEndpoint {
            id: ItemId::nil(),
            end: EndpointEnd::Start,
            anchor: Anchor::Floating { at: Point::ZERO },
            gesture: None,
        });
        assert!(settled.is_undoable());
    }
}
