//! The conflict-resolution (operational transformation) engine.
//!
//! `transform(confirmed, op)` adjusts `op` — issued concurrently, without
//! knowledge of `confirmed` — so that applying it after `confirmed`
//! preserves its author's intent. `Some(op)` keeps the (possibly adjusted)
//! operation; `None` suppresses it outright.
//!
//! Unrelated pairs pass through unchanged: "no adjustment" is always safe,
//! just occasionally lossy, and is the deliberate default for every pair
//! without an explicit rule (including merge-node against anything).

use banmen_types::{
    GeometryOp, GroupOp, ItemBody, ItemId, ItemState, Operation, StructureOp, TextEdit, TextOp,
};

use crate::text::char_len;

/// Adjust `op` for application after `confirmed`.
pub fn transform(confirmed: &Operation, op: Operation) -> Option<Operation> {
    match confirmed {
        Operation::Text(confirmed) => transform_against_text(confirmed, op),
        Operation::Structure(StructureOp::Remove { ids }) => transform_against_remove(ids, op),
        _ => Some(op),
    }
}

// =============================================================================
// Text-position transform
// =============================================================================

fn transform_against_text(confirmed: &TextOp, op: Operation) -> Option<Operation> {
    let mut incoming = match op {
        Operation::Text(incoming) => incoming,
        other => return Some(other),
    };
    if incoming.id != confirmed.id {
        return Some(Operation::Text(incoming));
    }

    let mut surviving = Vec::with_capacity(incoming.edits.len());
    for edit in incoming.edits.drain(..) {
        let mut current = Some(edit);
        for against in &confirmed.edits {
            current = match current {
                Some(edit) => transform_edit(against, edit),
                None => break,
            };
        }
        if let Some(edit) = current {
            surviving.push(edit);
        }
    }

    if surviving.is_empty() {
        None
    } else {
        Some(Operation::Text(TextOp { id: incoming.id, edits: surviving }))
    }
}

fn transform_edit(confirmed: &TextEdit, edit: TextEdit) -> Option<TextEdit> {
    match confirmed {
        TextEdit::Insert { offset, text, .. } => {
            Some(after_insert(confirmed.node_index(), *offset, char_len(text), edit))
        }
        TextEdit::Delete { offset, text, .. } => {
            after_delete(confirmed.node_index(), *offset, char_len(text), edit)
        }
        TextEdit::InsertNode { .. } => Some(after_node_insert(confirmed.node_index(), edit)),
        TextEdit::RemoveNode { .. } => after_node_remove(confirmed.node_index(), edit),
        TextEdit::SplitNode { offset, .. } => {
            Some(after_split(confirmed.node_index(), *offset, edit))
        }
        // No rule: pass through unchanged.
        TextEdit::MergeNode { .. } | TextEdit::SetMark { .. } => Some(edit),
    }
}

fn node_index(edit: &TextEdit) -> usize {
    edit.node_index()
}

fn with_node(mut edit: TextEdit, index: usize) -> TextEdit {
    let path = match &mut edit {
        TextEdit::Insert { path, .. }
        | TextEdit::Delete { path, .. }
        | TextEdit::InsertNode { path, .. }
        | TextEdit::RemoveNode { path, .. }
        | TextEdit::SplitNode { path, .. }
        | TextEdit::MergeNode { path }
        | TextEdit::SetMark { path, .. } => path,
    };
    if path.is_empty() {
        *path = vec![index];
    } else {
        path[0] = index;
    }
    edit
}

fn offset_of(edit: &TextEdit) -> Option<usize> {
    match edit {
        TextEdit::Insert { offset, .. }
        | TextEdit::Delete { offset, .. }
        | TextEdit::SplitNode { offset, .. } => Some(*offset),
        _ => None,
    }
}

fn with_offset(mut edit: TextEdit, value: usize) -> TextEdit {
    if let TextEdit::Insert { offset, .. }
    | TextEdit::Delete { offset, .. }
    | TextEdit::SplitNode { offset, .. } = &mut edit
    {
        *offset = value;
    }
    edit
}

/// A confirmed insertion of `len` chars at (`node`, `at`) shifts later
/// positions in the same node.
fn after_insert(node: usize, at: usize, len: usize, edit: TextEdit) -> TextEdit {
    if node_index(&edit) != node {
        return edit;
    }
    match offset_of(&edit) {
        Some(offset) if offset >= at => with_offset(edit, offset + len),
        // A range that started before the insertion point keeps its
        // position; partial overlap has no rule and stays unchanged.
        _ => edit,
    }
}

/// A confirmed deletion of `len` chars at (`node`, `at`) shifts or shrinks
/// later positions in the same node.
fn after_delete(node: usize, at: usize, len: usize, edit: TextEdit) -> Option<TextEdit> {
    if node_index(&edit) != node {
        return Some(edit);
    }
    let deleted_end = at + len;

    if let TextEdit::Delete { path, offset, text } = &edit {
        // Range subtraction: keep only the chars the confirmed deletion did
        // not already remove.
        let start = *offset;
        let end = start + char_len(text);
        if end <= at {
            return Some(edit);
        }
        if start >= deleted_end {
            return Some(with_offset(edit, start - len));
        }
        let head: String = text.chars().take(at.saturating_sub(start)).collect();
        let tail: String = text.chars().skip((deleted_end - start).min(char_len(text))).collect();
        let remaining = format!("{head}{tail}");
        if remaining.is_empty() {
            return None;
        }
        return Some(TextEdit::Delete {
            path: path.clone(),
            offset: start.min(at),
            text: remaining,
        });
    }

    match offset_of(&edit) {
        Some(offset) if offset >= deleted_end => Some(with_offset(edit, offset - len)),
        // Position inside the deleted range collapses to its start.
        Some(offset) if offset >= at => Some(with_offset(edit, at)),
        _ => Some(edit),
    }
}

/// A confirmed node insertion at `node` shifts that index and everything
/// after it.
fn after_node_insert(node: usize, edit: TextEdit) -> TextEdit {
    let index = node_index(&edit);
    if index >= node {
        with_node(edit, index + 1)
    } else {
        edit
    }
}

/// A confirmed node removal drops edits addressed to it and shifts later
/// siblings down.
fn after_node_remove(node: usize, edit: TextEdit) -> Option<TextEdit> {
    let index = node_index(&edit);
    if index == node {
        None
    } else if index > node {
        Some(with_node(edit, index - 1))
    } else {
        Some(edit)
    }
}

/// A confirmed split of `node` at `at`: content from `at` onward now lives
/// in the next sibling, and later siblings shift up.
fn after_split(node: usize, at: usize, edit: TextEdit) -> TextEdit {
    let index = node_index(&edit);
    if index > node {
        return with_node(edit, index + 1);
    }
    if index != node {
        return edit;
    }
    match offset_of(&edit) {
        Some(offset) if offset >= at => with_offset(with_node(edit, index + 1), offset - at),
        _ => edit,
    }
}

// =============================================================================
// Structural transform
// =============================================================================

fn transform_against_remove(removed: &[ItemId], op: Operation) -> Option<Operation> {
    match op {
        Operation::Structure(StructureOp::Add { items, created_at }) => {
            let items = demote_items(items, removed)?;
            Some(Operation::Structure(StructureOp::Add { items, created_at }))
        }
        Operation::Structure(StructureOp::Paste { items, mapping }) => {
            let items = demote_items(items, removed)?;
            Some(Operation::Structure(StructureOp::Paste { items, mapping }))
        }
        Operation::Structure(StructureOp::Remove { mut ids }) => {
            // First remover wins per id; the remainder is still this
            // author's intent.
            ids.retain(|id| !removed.contains(id));
            if ids.is_empty() {
                None
            } else {
                Some(Operation::Structure(StructureOp::Remove { ids }))
            }
        }
        Operation::Structure(StructureOp::Duplicate { mut mapping, offset }) => {
            mapping.retain(|source, _| !removed.contains(source));
            if mapping.is_empty() {
                None
            } else {
                Some(Operation::Structure(StructureOp::Duplicate { mapping, offset }))
            }
        }
        Operation::Geometry(GeometryOp::Update { mut changes }) => {
            changes.retain(|id, _| !removed.contains(id));
            if changes.is_empty() {
                None
            } else {
                Some(Operation::Geometry(GeometryOp::Update { changes }))
            }
        }
        Operation::Geometry(GeometryOp::ZOrder { id, .. }) if removed.contains(&id) => None,
        Operation::Geometry(GeometryOp::SetEndpoint { id, end, anchor, gesture }) => {
            if removed.contains(&id) {
                return None;
            }
            let anchor = match anchor.item_id() {
                Some(target) if removed.contains(&target) => anchor.floating(),
                _ => anchor,
            };
            Some(Operation::Geometry(GeometryOp::SetEndpoint { id, end, anchor, gesture }))
        }
        Operation::Text(op) if removed.contains(&op.id) => None,
        Operation::Group(GroupOp::AddGroup { group, mut items }) => {
            items.retain(|id| !removed.contains(id));
            if items.is_empty() {
                None
            } else {
                Some(Operation::Group(GroupOp::AddGroup { group, items }))
            }
        }
        other => Some(other),
    }
}

/// Rewrite connector endpoints that reference removed items to floating
/// anchors; suppress a connector whose both endpoints referenced removed
/// items; suppress the whole creation when nothing is left.
fn demote_items(items: Vec<ItemState>, removed: &[ItemId]) -> Option<Vec<ItemState>> {
    let items: Vec<_> = items
        .into_iter()
        .filter_map(|mut item| {
            if let ItemBody::Connector { start, end } = &mut item.body {
                let mut demoted = 0;
                for anchor in [start, end] {
                    if let Some(target) = anchor.item_id() {
                        if removed.contains(&target) {
                            *anchor = anchor.floating();
                            demoted += 1;
                        }
                    }
                }
                if demoted == 2 {
                    return None;
                }
            }
            Some(item)
        })
        .collect();

    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}
