//! The coalescing engine.
//!
//! Pure functions deciding whether two operations issued back-to-back by one
//! author collapse into a single operation with the same combined effect.
//! "Not mergeable" is the conservative default — returning `None` always
//! leaves both operations applied independently, which is correct, just less
//! compact.
//!
//! Two same-id removals never merge here: concurrent removals span actors
//! and are the transform engine's concern.

use banmen_types::{
    GeometryChange, GeometryOp, ItemBody, Operation, StructureOp, TextEdit, TextOp,
};

use crate::text;

/// Combine two adjacent operations, or report that they do not coalesce.
pub fn merge(older: &Operation, newer: &Operation) -> Option<Operation> {
    match (older, newer) {
        (Operation::Geometry(a), Operation::Geometry(b)) => {
            merge_geometry(a, b).map(Operation::Geometry)
        }
        (Operation::Structure(a), Operation::Structure(b)) => merge_structure(a, b),
        (Operation::Structure(a), Operation::Text(b)) => merge_add_edit(a, b),
        (Operation::Text(a), Operation::Text(b)) => merge_text(a, b),
        _ => None,
    }
}

fn merge_geometry(older: &GeometryOp, newer: &GeometryOp) -> Option<GeometryOp> {
    match (older, newer) {
        (GeometryOp::Update { changes: a }, GeometryOp::Update { changes: b }) => {
            // Id-wise: shared ids must combine, untouched ids ride along.
            let mut merged = a.clone();
            for (id, change_b) in b {
                let combined = match merged.get(id) {
                    Some(change_a) => merge_change(change_a, change_b)?,
                    None => *change_b,
                };
                merged.insert(*id, combined);
            }
            Some(GeometryOp::Update { changes: merged })
        }
        (
            GeometryOp::SetEndpoint { id: id_a, end: end_a, gesture: gesture_a, .. },
            GeometryOp::SetEndpoint { id: id_b, end: end_b, gesture: gesture_b, .. },
        ) if id_a == id_b && end_a == end_b && gesture_a == gesture_b => {
            // Same drag gesture (or both settled): the later anchor wins. A
            // timestamp mismatch means a user-visible intermediate state
            // sits between the two sets, so they stay separate.
            Some(newer.clone())
        }
        _ => None,
    }
}

fn merge_change(a: &GeometryChange, b: &GeometryChange) -> Option<GeometryChange> {
    use GeometryChange::*;
    match (a, b) {
        (TranslateBy { delta: d1 }, TranslateBy { delta: d2 }) => {
            Some(TranslateBy { delta: *d1 + *d2 })
        }
        (ScaleBy { factor: f1 }, ScaleBy { factor: f2 }) => Some(ScaleBy { factor: f1 * f2 }),
        (RotateBy { angle: a1 }, RotateBy { angle: a2 }) => Some(RotateBy { angle: a1 + a2 }),
        // Mixed scale/translate deltas promote to the combined op;
        // components apply independently, so order does not matter.
        (ScaleBy { factor }, TranslateBy { delta }) | (TranslateBy { delta }, ScaleBy { factor }) => {
            Some(ScaleTranslate { factor: *factor, delta: *delta })
        }
        (ScaleTranslate { factor, delta }, TranslateBy { delta: d2 }) => {
            Some(ScaleTranslate { factor: *factor, delta: *delta + *d2 })
        }
        (TranslateBy { delta: d1 }, ScaleTranslate { factor, delta }) => {
            Some(ScaleTranslate { factor: *factor, delta: *d1 + *delta })
        }
        (ScaleTranslate { factor, delta }, ScaleBy { factor: f2 }) => {
            Some(ScaleTranslate { factor: factor * f2, delta: *delta })
        }
        (ScaleBy { factor: f1 }, ScaleTranslate { factor, delta }) => {
            Some(ScaleTranslate { factor: f1 * factor, delta: *delta })
        }
        (ScaleTranslate { factor: f1, delta: d1 }, ScaleTranslate { factor: f2, delta: d2 }) => {
            Some(ScaleTranslate { factor: f1 * f2, delta: *d1 + *d2 })
        }
        _ => None,
    }
}

fn merge_structure(older: &StructureOp, newer: &StructureOp) -> Option<Operation> {
    match (older, newer) {
        (
            StructureOp::Add { items: a, created_at: Some(t1) },
            StructureOp::Add { items: b, created_at: Some(t2) },
        ) if t1 == t2 => {
            let mut items = a.clone();
            items.extend(b.iter().cloned());
            Some(Operation::Structure(StructureOp::Add { items, created_at: Some(*t1) }))
        }
        _ => None,
    }
}

/// The one documented cross-family merge: an add of a fresh rich-text item
/// followed immediately by its first edit collapses into a single add whose
/// initial content already contains the text. The empty-then-filled item is
/// never emitted.
fn merge_add_edit(older: &StructureOp, newer: &TextOp) -> Option<Operation> {
    let StructureOp::Add { items, created_at } = older else {
        return None;
    };
    let index = items.iter().position(|i| i.id == newer.id)?;
    let ItemBody::Note { text } = &items[index].body else {
        return None;
    };

    let mut text = text.clone();
    for edit in &newer.edits {
        text::apply_edit(newer.id, &mut text, edit).ok()?;
    }

    let mut items = items.clone();
    items[index].body = ItemBody::Note { text };
    Some(Operation::Structure(StructureOp::Add { items, created_at: *created_at }))
}

fn merge_text(older: &TextOp, newer: &TextOp) -> Option<Operation> {
    if older.id != newer.id {
        return None;
    }
    // Only single-sub-edit pairs in a recognized adjacency coalesce.
    let [a] = older.edits.as_slice() else { return None };
    let [b] = newer.edits.as_slice() else { return None };
    let edit = merge_edit(a, b)?;
    Some(Operation::Text(TextOp { id: older.id, edits: vec![edit] }))
}

fn merge_edit(a: &TextEdit, b: &TextEdit) -> Option<TextEdit> {
    match (a, b) {
        (
            TextEdit::Insert { path: p1, offset: o1, text: t1 },
            TextEdit::Insert { path: p2, offset: o2, text: t2 },
        ) if p1 == p2 => {
            if *o2 == o1 + text::char_len(t1) {
                // Forward typing
                Some(TextEdit::Insert { path: p1.clone(), offset: *o1, text: format!("{t1}{t2}") })
            } else if o2 == o1 {
                // Insertion at the same point lands before the earlier text
                Some(TextEdit::Insert { path: p1.clone(), offset: *o1, text: format!("{t2}{t1}") })
            } else {
                None
            }
        }
        (
            TextEdit::Delete { path: p1, offset: o1, text: t1 },
            TextEdit::Delete { path: p2, offset: o2, text: t2 },
        ) if p1 == p2 => {
            if o2 == o1 {
                // Forward delete
                Some(TextEdit::Delete { path: p1.clone(), offset: *o1, text: format!("{t1}{t2}") })
            } else if *o1 == o2 + text::char_len(t2) {
                // Backspace run
                Some(TextEdit::Delete { path: p1.clone(), offset: *o2, text: format!("{t2}{t1}") })
            } else {
                None
            }
        }
        (
            TextEdit::SetMark { path: p1, mark: m1, .. },
            TextEdit::SetMark { path: p2, mark: m2, .. },
        ) if p1 == p2 && m1 == m2 => Some(b.clone()),
        _ => None,
    }
}
