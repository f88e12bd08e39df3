//! The board item store — the document-model collaborator.
//!
//! Holds live items in an order-preserving id map whose iteration order IS
//! the stacking (z) order, plus a group registry. The engine mutates a board
//! only through [`Board::apply`]; application is synchronous and complete
//! before the call returns.
//!
//! Per the protocol's forward-compatibility stance, an operation addressing
//! a missing item degrades to a logged no-op; a structural inconsistency
//! (re-creating an existing id) is an error.

use std::collections::BTreeMap;

use banmen_types::{
    Anchor, EndpointEnd, GeometryChange, GeometryOp, GroupId, GroupOp, ItemBody, ItemId,
    ItemState, Operation, RichText, StructureOp, TextOp, Transform2d, ZOrderMove,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{text, OtError, Result};

/// One live item. Stacking position is the item's index in the board map.
#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    pub transform: Transform2d,
    pub group: Option<GroupId>,
    pub body: ItemBody,
}

impl Item {
    fn from_state(state: &ItemState) -> Self {
        Self { transform: state.transform, group: state.group, body: state.body.clone() }
    }
}

/// Serialized board contents (snapshot payload).
#[derive(Serialize, Deserialize)]
struct BoardContents {
    items: Vec<ItemState>,
    groups: Vec<(GroupId, Vec<ItemId>)>,
}

/// The live item store for one document.
#[derive(Clone, Debug, Default)]
pub struct Board {
    items: IndexMap<ItemId, Item>,
    groups: BTreeMap<GroupId, Vec<ItemId>>,
}

impl PartialEq for Board {
    fn eq(&self, other: &Self) -> bool {
        // Order-sensitive: stacking is state.
        self.items.iter().eq(other.items.iter()) && self.groups == other.groups
    }
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    /// Current placement of an item.
    pub fn item_transform(&self, id: ItemId) -> Option<Transform2d> {
        self.items.get(&id).map(|i| i.transform)
    }

    /// Current stacking index of an item.
    pub fn item_z(&self, id: ItemId) -> Option<usize> {
        self.items.get_index_of(&id)
    }

    /// Current anchor of a connector end.
    pub fn connector_anchor(&self, id: ItemId, end: EndpointEnd) -> Option<Anchor> {
        match &self.items.get(&id)?.body {
            ItemBody::Connector { start, end: finish } => Some(match end {
                EndpointEnd::Start => *start,
                EndpointEnd::End => *finish,
            }),
            _ => None,
        }
    }

    /// Rich text of a note item.
    pub fn note_text(&self, id: ItemId) -> Option<&RichText> {
        match &self.items.get(&id)?.body {
            ItemBody::Note { text } => Some(text),
            _ => None,
        }
    }

    /// Members of a group.
    pub fn group_members(&self, group: GroupId) -> Option<&[ItemId]> {
        self.groups.get(&group).map(|m| m.as_slice())
    }

    /// Full serialization of one item, including its stacking index.
    pub fn serialize_item(&self, id: ItemId) -> Option<ItemState> {
        let (z, _, item) = self.items.get_full(&id)?;
        Some(ItemState {
            id,
            z: z as u32,
            transform: item.transform,
            group: item.group,
            body: item.body.clone(),
        })
    }

    /// All items in stacking order.
    pub fn items_ordered(&self) -> Vec<ItemState> {
        self.items
            .iter()
            .enumerate()
            .map(|(z, (id, item))| ItemState {
                id: *id,
                z: z as u32,
                transform: item.transform,
                group: item.group,
                body: item.body.clone(),
            })
            .collect()
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Apply one operation. The single entry point the engine mutates
    /// through.
    pub fn apply(&mut self, op: &Operation) -> Result<()> {
        match op {
            Operation::Structure(op) => self.apply_structure(op),
            Operation::Geometry(op) => self.apply_geometry(op),
            Operation::Text(op) => self.apply_text(op),
            Operation::Group(op) => self.apply_group(op),
            Operation::History(_) => {
                // History markers bind through the event log, never here.
                warn!("history operation reached Board::apply, ignoring");
                Ok(())
            }
        }
    }

    fn apply_structure(&mut self, op: &StructureOp) -> Result<()> {
        match op {
            StructureOp::Add { items, .. } => {
                for state in items {
                    self.insert_state(state)?;
                }
                Ok(())
            }
            StructureOp::Remove { ids } => {
                for id in ids {
                    if self.items.shift_remove(id).is_none() {
                        warn!(item = %id, "remove of unknown item, ignoring");
                        continue;
                    }
                    for members in self.groups.values_mut() {
                        members.retain(|m| m != id);
                    }
                }
                Ok(())
            }
            StructureOp::Duplicate { mapping, offset } => {
                for (source, clone) in mapping {
                    let Some(item) = self.items.get(source) else {
                        warn!(item = %source, "duplicate of unknown item, ignoring");
                        continue;
                    };
                    let mut item = item.clone();
                    item.transform.translate += *offset;
                    item.group = None;
                    remap_anchors(&mut item.body, mapping);
                    if self.items.insert(*clone, item).is_some() {
                        return Err(OtError::DuplicateItem(*clone));
                    }
                }
                Ok(())
            }
            StructureOp::Paste { items, mapping } => {
                for state in items {
                    let mut state = state.clone();
                    remap_anchors(&mut state.body, mapping);
                    self.insert_state(&state)?;
                }
                Ok(())
            }
        }
    }

    fn apply_geometry(&mut self, op: &GeometryOp) -> Result<()> {
        match op {
            GeometryOp::Update { changes } => {
                for (id, change) in changes {
                    let Some(item) = self.items.get_mut(id) else {
                        warn!(item = %id, "geometry change for unknown item, ignoring");
                        continue;
                    };
                    apply_change(&mut item.transform, change);
                }
                Ok(())
            }
            GeometryOp::ZOrder { id, to } => {
                let Some(from) = self.items.get_index_of(id) else {
                    warn!(item = %id, "restack of unknown item, ignoring");
                    return Ok(());
                };
                let top = self.items.len().saturating_sub(1);
                let to = match to {
                    ZOrderMove::BringToFront => top,
                    ZOrderMove::SendToBack => 0,
                    ZOrderMove::MoveTo { index } => (*index).min(top),
                };
                self.items.move_index(from, to);
                Ok(())
            }
            GeometryOp::SetEndpoint { id, end, anchor, .. } => {
                let Some(item) = self.items.get_mut(id) else {
                    warn!(item = %id, "endpoint set for unknown item, ignoring");
                    return Ok(());
                };
                match &mut item.body {
                    ItemBody::Connector { start, end: finish } => {
                        match end {
                            EndpointEnd::Start => *start = *anchor,
                            EndpointEnd::End => *finish = *anchor,
                        }
                        Ok(())
                    }
                    _ => {
                        warn!(item = %id, "endpoint set on non-connector, ignoring");
                        Ok(())
                    }
                }
            }
        }
    }

    fn apply_text(&mut self, op: &TextOp) -> Result<()> {
        let Some(item) = self.items.get_mut(&op.id) else {
            warn!(item = %op.id, "text edit for unknown item, ignoring");
            return Ok(());
        };
        match &mut item.body {
            ItemBody::Note { text } => {
                for edit in &op.edits {
                    text::apply_edit(op.id, text, edit)?;
                }
                Ok(())
            }
            _ => {
                warn!(item = %op.id, "text edit on non-note item, ignoring");
                Ok(())
            }
        }
    }

    fn apply_group(&mut self, op: &GroupOp) -> Result<()> {
        match op {
            GroupOp::AddGroup { group, items } => {
                let mut members = Vec::with_capacity(items.len());
                for id in items {
                    let Some(item) = self.items.get_mut(id) else {
                        warn!(item = %id, "group member unknown, skipping");
                        continue;
                    };
                    item.group = Some(*group);
                    members.push(*id);
                }
                self.groups.insert(*group, members);
                Ok(())
            }
            GroupOp::RemoveGroup { group } => {
                let Some(members) = self.groups.remove(group) else {
                    warn!(group = %group, "remove of unknown group, ignoring");
                    return Ok(());
                };
                for id in members {
                    if let Some(item) = self.items.get_mut(&id) {
                        item.group = None;
                    }
                }
                Ok(())
            }
        }
    }

    /// Insert a serialized item at `min(z, len)`, restoring its stacking
    /// position when it was captured by a removal reverse.
    fn insert_state(&mut self, state: &ItemState) -> Result<()> {
        if self.items.contains_key(&state.id) {
            return Err(OtError::DuplicateItem(state.id));
        }
        let index = (state.z as usize).min(self.items.len());
        self.items.shift_insert(index, state.id, Item::from_state(state));
        if let Some(group) = state.group {
            let members = self.groups.entry(group).or_default();
            if !members.contains(&state.id) {
                members.push(state.id);
            }
        }
        Ok(())
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Opaque serialized board bytes for the snapshot contract.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let contents = BoardContents {
            items: self.items_ordered(),
            groups: self.groups.iter().map(|(g, m)| (*g, m.clone())).collect(),
        };
        serde_json::to_vec(&contents).map_err(|e| OtError::Snapshot(e.to_string()))
    }

    /// Rebuild a board from snapshot bytes, without replaying history.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let contents: BoardContents =
            serde_json::from_slice(bytes).map_err(|e| OtError::Snapshot(e.to_string()))?;
        let mut board = Board::new();
        for state in &contents.items {
            board.insert_state(state)?;
        }
        // The registry is authoritative over per-item group tags.
        board.groups = contents.groups.into_iter().collect();
        Ok(board)
    }
}

fn apply_change(transform: &mut Transform2d, change: &GeometryChange) {
    match change {
        GeometryChange::TranslateBy { delta } => transform.translate += *delta,
        GeometryChange::TranslateTo { pos } => transform.translate = pos.to_vec2(),
        GeometryChange::ScaleBy { factor } => transform.scale *= factor,
        GeometryChange::ScaleTo { scale } => transform.scale = *scale,
        GeometryChange::RotateBy { angle } => transform.rotation += angle,
        GeometryChange::RotateTo { angle } => transform.rotation = *angle,
        GeometryChange::ScaleTranslate { factor, delta } => {
            transform.scale *= factor;
            transform.translate += *delta;
        }
    }
}

/// Rewrite attached anchors through an id mapping (duplicate/paste).
fn remap_anchors(body: &mut ItemBody, mapping: &BTreeMap<ItemId, ItemId>) {
    if let ItemBody::Connector { start, end } = body {
        for anchor in [start, end] {
            if let Anchor::Item { id, .. } = anchor {
                if let Some(mapped) = mapping.get(id) {
                    *id = *mapped;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use banmen_types::{Point, Vec2};
    use std::collections::BTreeMap;

    fn add(items: Vec<ItemState>) -> Operation {
        Operation::Structure(StructureOp::Add { items, created_at: None })
    }

    fn note_at(z: u32) -> ItemState {
        ItemState::note(ItemId::new(), z)
    }

    #[test]
    fn test_add_remove_roundtrip() {
        let mut board = Board::new();
        let state = note_at(0);
        let id = state.id;

        board.apply(&add(vec![state])).unwrap();
        assert_eq!(board.len(), 1);
        assert!(board.contains(id));

        board
            .apply(&Operation::Structure(StructureOp::Remove { ids: vec![id] }))
            .unwrap();
        assert!(board.is_empty());
    }

    #[test]
    fn test_duplicate_add_is_an_error() {
        let mut board = Board::new();
        let state = note_at(0);
        board.apply(&add(vec![state.clone()])).unwrap();
        assert!(matches!(
            board.apply(&add(vec![state])),
            Err(OtError::DuplicateItem(_))
        ));
    }

    #[test]
    fn test_insert_state_restores_stacking_position() {
        let mut board = Board::new();
        let a = note_at(0);
        let b = note_at(1);
        let c = note_at(2);
        let (ida, idb, idc) = (a.id, b.id, c.id);
        board.apply(&add(vec![a, b, c])).unwrap();

        let serialized = board.serialize_item(idb).unwrap();
        board
            .apply(&Operation::Structure(StructureOp::Remove { ids: vec![idb] }))
            .unwrap();
        board.apply(&add(vec![serialized])).unwrap();

        let order: Vec<_> = board.items_ordered().into_iter().map(|s| s.id).collect();
        assert_eq!(order, vec![ida, idb, idc]);
    }

    #[test]
    fn test_zorder_moves() {
        let mut board = Board::new();
        let states: Vec<_> = (0..3).map(note_at).collect();
        let ids: Vec<_> = states.iter().map(|s| s.id).collect();
        board.apply(&add(states)).unwrap();

        board
            .apply(&Operation::Geometry(GeometryOp::ZOrder {
                id: ids[0],
                to: ZOrderMove::BringToFront,
            }))
            .unwrap();
        let order: Vec<_> = board.items_ordered().into_iter().map(|s| s.id).collect();
        assert_eq!(order, vec![ids[1], ids[2], ids[0]]);

        board
            .apply(&Operation::Geometry(GeometryOp::ZOrder {
                id: ids[0],
                to: ZOrderMove::SendToBack,
            }))
            .unwrap();
        let order: Vec<_> = board.items_ordered().into_iter().map(|s| s.id).collect();
        assert_eq!(order, vec![ids[0], ids[1], ids[2]]);
    }

    #[test]
    fn test_geometry_change_for_unknown_item_is_ignored() {
        let mut board = Board::new();
        let op = Operation::Geometry(GeometryOp::Update {
            changes: BTreeMap::from([(
                ItemId::new(),
                GeometryChange::TranslateBy { delta: Vec2::new(1.0, 1.0) },
            )]),
        });
        board.apply(&op).unwrap();
        assert!(board.is_empty());
    }

    #[test]
    fn test_duplicate_remaps_internal_connectors() {
        let mut board = Board::new();
        let a = note_at(0);
        let b = note_at(1);
        let (ida, idb) = (a.id, b.id);
        let connector = ItemState::connector(
            ItemId::new(),
            2,
            Anchor::Item { id: ida, at: Point::new(0.0, 0.0) },
            Anchor::Item { id: idb, at: Point::new(5.0, 5.0) },
        );
        let conn_id = connector.id;
        board.apply(&add(vec![a, b, connector])).unwrap();

        let mapping = BTreeMap::from([
            (ida, ItemId::new()),
            (idb, ItemId::new()),
            (conn_id, ItemId::new()),
        ]);
        board
            .apply(&Operation::Structure(StructureOp::Duplicate {
                mapping: mapping.clone(),
                offset: Vec2::new(10.0, 0.0),
            }))
            .unwrap();

        assert_eq!(board.len(), 6);
        let clone_conn = board.item(mapping[&conn_id]).unwrap();
        match &clone_conn.body {
            ItemBody::Connector { start, end } => {
                assert_eq!(start.item_id(), Some(mapping[&ida]));
                assert_eq!(end.item_id(), Some(mapping[&idb]));
            }
            other => panic!("expected connector, got {other:?}"),
        }
    }

    #[test]
    fn test_group_registry_and_member_tags() {
        let mut board = Board::new();
        let a = note_at(0);
        let b = note_at(1);
        let (ida, idb) = (a.id, b.id);
        board.apply(&add(vec![a, b])).unwrap();

        let group = GroupId::new();
        board
            .apply(&Operation::Group(GroupOp::AddGroup { group, items: vec![ida, idb] }))
            .unwrap();
        assert_eq!(board.group_members(group), Some(&[ida, idb][..]));
        assert_eq!(board.item(ida).unwrap().group, Some(group));

        board
            .apply(&Operation::Group(GroupOp::RemoveGroup { group }))
            .unwrap();
        assert_eq!(board.group_members(group), None);
        assert_eq!(board.item(ida).unwrap().group, None);
    }

    #[test]
    fn test_snapshot_bytes_roundtrip() {
        let mut board = Board::new();
        let a = note_at(0);
        let b = note_at(1);
        let group = GroupId::new();
        let ids = vec![a.id, b.id];
        board.apply(&add(vec![a, b])).unwrap();
        board
            .apply(&Operation::Group(GroupOp::AddGroup { group, items: ids }))
            .unwrap();
        board
            .apply(&Operation::Geometry(GeometryOp::Update {
                changes: BTreeMap::from([(
                    board.items_ordered()[0].id,
                    GeometryChange::TranslateBy { delta: Vec2::new(4.0, 2.0) },
                )]),
            }))
            .unwrap();

        let bytes = board.to_bytes().unwrap();
        let restored = Board::from_bytes(&bytes).unwrap();
        assert_eq!(restored, board);
    }
}
