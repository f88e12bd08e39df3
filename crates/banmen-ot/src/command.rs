//! Commands bind an operation to its computed inverse.
//!
//! The inverse is derived eagerly, before the operation is applied:
//! absolute setters read the value they are about to overwrite, structural
//! removals capture full serializations of the items they are about to
//! destroy. Relative deltas invert algebraically and need no state read.
//!
//! A history command wraps the command of the event it references; applying
//! an undo reverts the target, reverting an undo re-applies it.

use banmen_types::{
    GeometryChange, GeometryOp, GroupOp, HistoryOp, Operation, StructureOp, TextEdit, TextOp,
};

use crate::{merge, text, Board, OtError, Result};

/// A runtime pairing of one operation with the operation that undoes it.
#[derive(Clone, Debug)]
pub enum Command {
    Direct {
        op: Operation,
        inverse: Operation,
    },
    /// An undo/redo marker bound to the command of the referenced event.
    History {
        op: Operation,
        target: Box<Command>,
    },
}

impl Command {
    /// Build a command for `op`, computing its inverse from the board's
    /// current state. Must be called before `op` is applied.
    ///
    /// Fails when the inverse requires state that no longer exists — that is
    /// a precondition violation of the command, not a recoverable error.
    pub fn derive(op: Operation, board: &Board) -> Result<Command> {
        if op.is_history() {
            return Err(OtError::UnboundHistory);
        }
        let inverse = derive_inverse(&op, board)?;
        Ok(Command::Direct { op, inverse })
    }

    /// Bind a history marker to the command of the event it references.
    pub fn history(op: Operation, target: Command) -> Command {
        Command::History { op, target: Box::new(target) }
    }

    /// The operation this command applies.
    pub fn op(&self) -> &Operation {
        match self {
            Command::Direct { op, .. } | Command::History { op, .. } => op,
        }
    }

    /// Mutate the board forward.
    pub fn apply(&self, board: &mut Board) -> Result<()> {
        match self {
            Command::Direct { op, .. } => board.apply(op),
            Command::History { op, target } => match op {
                Operation::History(HistoryOp::Undo { .. }) => target.revert(board),
                Operation::History(HistoryOp::Redo { .. }) => target.apply(board),
                _ => Err(OtError::UnboundHistory),
            },
        }
    }

    /// Mutate the board back to the pre-apply state.
    pub fn revert(&self, board: &mut Board) -> Result<()> {
        match self {
            Command::Direct { inverse, .. } => board.apply(inverse),
            Command::History { op, target } => match op {
                Operation::History(HistoryOp::Undo { .. }) => target.apply(board),
                Operation::History(HistoryOp::Redo { .. }) => target.revert(board),
                _ => Err(OtError::UnboundHistory),
            },
        }
    }

    /// Coalesce `newer` into this command in place: the rebound command,
    /// applied instead of the original, yields the same end state as
    /// applying original-then-newer, and its inverse undoes both.
    ///
    /// Returns false (leaving self untouched) when the pair is not
    /// mergeable.
    pub fn merge(&mut self, newer: &Command) -> bool {
        let (Command::Direct { op: op_a, inverse: inv_a }, Command::Direct { op: op_b, inverse: inv_b }) =
            (&*self, newer)
        else {
            return false;
        };
        let Some(merged) = merge::merge(op_a, op_b) else {
            return false;
        };

        let inverse = if let (
            Operation::Structure(StructureOp::Remove { ids: newer_ids }),
            Operation::Structure(StructureOp::Remove { ids: older_ids }),
        ) = (inv_b, inv_a)
        {
            // Two creations coalesced: one removal of the union undoes both.
            let mut ids = older_ids.clone();
            for id in newer_ids {
                if !ids.contains(id) {
                    ids.push(*id);
                }
            }
            Operation::Structure(StructureOp::Remove { ids })
        } else if matches!(merged, Operation::Structure(StructureOp::Add { .. }))
            && matches!(op_b, Operation::Text(_))
        {
            // Creation absorbed its first edit: removing the item undoes
            // everything.
            inv_a.clone()
        } else if overwrites_absolute(op_b) {
            // The newer op overwrote an absolute field; the older inverse
            // already restores the pre-merge value.
            inv_a.clone()
        } else if let Some(inverse) = merge::merge(inv_b, inv_a) {
            // Delta inverses compose in reverse application order.
            inverse
        } else {
            return false;
        };

        *self = Command::Direct { op: merged, inverse };
        true
    }
}

/// Whether an operation replaces an absolute value rather than applying a
/// delta, so the older command's inverse still restores the original state.
fn overwrites_absolute(op: &Operation) -> bool {
    match op {
        Operation::Geometry(GeometryOp::SetEndpoint { .. }) => true,
        Operation::Text(TextOp { edits, .. }) => {
            edits.iter().all(|e| matches!(e, TextEdit::SetMark { .. }))
        }
        _ => false,
    }
}

fn derive_inverse(op: &Operation, board: &Board) -> Result<Operation> {
    match op {
        Operation::Structure(op) => derive_structure_inverse(op, board),
        Operation::Geometry(op) => derive_geometry_inverse(op, board),
        Operation::Text(op) => derive_text_inverse(op, board),
        Operation::Group(op) => derive_group_inverse(op, board),
        Operation::History(_) => Err(OtError::UnboundHistory),
    }
}

fn derive_structure_inverse(op: &StructureOp, board: &Board) -> Result<Operation> {
    let inverse = match op {
        StructureOp::Add { items, .. } => {
            StructureOp::Remove { ids: items.iter().map(|i| i.id).collect() }
        }
        StructureOp::Remove { ids } => {
            // Capture full serializations before the removal executes,
            // ascending by stacking index so re-insertion restores order.
            let mut items = Vec::with_capacity(ids.len());
            for id in ids {
                items.push(board.serialize_item(*id).ok_or(OtError::ItemNotFound(*id))?);
            }
            items.sort_by_key(|s| s.z);
            StructureOp::Add { items, created_at: None }
        }
        StructureOp::Duplicate { mapping, .. } => {
            StructureOp::Remove { ids: mapping.values().copied().collect() }
        }
        StructureOp::Paste { items, .. } => {
            StructureOp::Remove { ids: items.iter().map(|i| i.id).collect() }
        }
    };
    Ok(Operation::Structure(inverse))
}

fn derive_geometry_inverse(op: &GeometryOp, board: &Board) -> Result<Operation> {
    let inverse = match op {
        GeometryOp::Update { changes } => {
            let mut inverted = std::collections::BTreeMap::new();
            for (id, change) in changes {
                let change = match change {
                    GeometryChange::TranslateBy { delta } => {
                        GeometryChange::TranslateBy { delta: -*delta }
                    }
                    GeometryChange::ScaleBy { factor } => {
                        if *factor == 0.0 {
                            return Err(OtError::DegenerateScale(*factor));
                        }
                        GeometryChange::ScaleBy { factor: 1.0 / factor }
                    }
                    GeometryChange::RotateBy { angle } => GeometryChange::RotateBy { angle: -angle },
                    GeometryChange::ScaleTranslate { factor, delta } => {
                        if *factor == 0.0 {
                            return Err(OtError::DegenerateScale(*factor));
                        }
                        GeometryChange::ScaleTranslate { factor: 1.0 / factor, delta: -*delta }
                    }
                    GeometryChange::TranslateTo { .. } => {
                        let current =
                            board.item_transform(*id).ok_or(OtError::ItemNotFound(*id))?;
                        GeometryChange::TranslateTo { pos: current.position() }
                    }
                    GeometryChange::ScaleTo { .. } => {
                        let current =
                            board.item_transform(*id).ok_or(OtError::ItemNotFound(*id))?;
                        GeometryChange::ScaleTo { scale: current.scale }
                    }
                    GeometryChange::RotateTo { .. } => {
                        let current =
                            board.item_transform(*id).ok_or(OtError::ItemNotFound(*id))?;
                        GeometryChange::RotateTo { angle: current.rotation }
                    }
                };
                inverted.insert(*id, change);
            }
            GeometryOp::Update { changes: inverted }
        }
        GeometryOp::ZOrder { id, .. } => {
            // Move back to the stacking index captured before the move.
            let index = board.item_z(*id).ok_or(OtError::ItemNotFound(*id))?;
            GeometryOp::ZOrder { id: *id, to: banmen_types::ZOrderMove::MoveTo { index } }
        }
        GeometryOp::SetEndpoint { id, end, .. } => {
            let anchor =
                board.connector_anchor(*id, *end).ok_or(OtError::ItemNotFound(*id))?;
            GeometryOp::SetEndpoint { id: *id, end: *end, anchor, gesture: None }
        }
    };
    Ok(Operation::Geometry(inverse))
}

fn derive_text_inverse(op: &TextOp, board: &Board) -> Result<Operation> {
    // Edits apply sequentially, so each inverse is computed against the
    // simulated state its edit sees, then the list replays in reverse.
    let mut sim = board.note_text(op.id).ok_or(OtError::ItemNotFound(op.id))?.clone();
    let mut inverses = Vec::with_capacity(op.edits.len());
    for edit in &op.edits {
        inverses.push(text::invert_edit(op.id, &sim, edit)?);
        text::apply_edit(op.id, &mut sim, edit)?;
    }
    inverses.reverse();
    Ok(Operation::Text(TextOp { id: op.id, edits: inverses }))
}

fn derive_group_inverse(op: &GroupOp, board: &Board) -> Result<Operation> {
    let inverse = match op {
        GroupOp::AddGroup { group, .. } => GroupOp::RemoveGroup { group: *group },
        GroupOp::RemoveGroup { group } => GroupOp::AddGroup {
            group: *group,
            items: board
                .group_members(*group)
                .ok_or(OtError::GroupNotFound(*group))?
                .to_vec(),
        },
    };
    Ok(Operation::Group(inverse))
}
