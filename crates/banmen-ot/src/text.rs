//! Rich-text edit application and inversion.
//!
//! Offsets are char offsets; all byte arithmetic stays inside this module.
//! `invert_edit` must be called against the pre-apply state — that is where
//! merge offsets and mark toggles read their previous values.

use banmen_types::{ItemId, RichText, TextBlock, TextEdit};

use crate::{OtError, Result};

pub(crate) fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte index of the given char offset; `s.len()` when past the end.
fn byte_of(s: &str, char_idx: usize) -> usize {
    s.char_indices().nth(char_idx).map(|(i, _)| i).unwrap_or(s.len())
}

fn block_at<'a>(id: ItemId, text: &'a RichText, path: &[usize]) -> Result<&'a TextBlock> {
    let idx = path.first().copied().unwrap_or(0);
    text.blocks
        .get(idx)
        .ok_or_else(|| OtError::NodeNotFound { id, path: path.to_vec() })
}

fn block_at_mut<'a>(id: ItemId, text: &'a mut RichText, path: &[usize]) -> Result<&'a mut TextBlock> {
    let idx = path.first().copied().unwrap_or(0);
    text.blocks
        .get_mut(idx)
        .ok_or_else(|| OtError::NodeNotFound { id, path: path.to_vec() })
}

/// Apply one edit in place.
pub(crate) fn apply_edit(id: ItemId, text: &mut RichText, edit: &TextEdit) -> Result<()> {
    match edit {
        TextEdit::Insert { path, offset, text: inserted } => {
            let block = block_at_mut(id, text, path)?;
            let len = char_len(&block.text);
            if *offset > len {
                return Err(OtError::OffsetOutOfBounds { offset: *offset, len });
            }
            let at = byte_of(&block.text, *offset);
            block.text.insert_str(at, inserted);
        }
        TextEdit::Delete { path, offset, text: removed } => {
            let block = block_at_mut(id, text, path)?;
            let len = char_len(&block.text);
            let n = char_len(removed);
            if offset + n > len {
                return Err(OtError::OffsetOutOfBounds { offset: offset + n, len });
            }
            let start = byte_of(&block.text, *offset);
            let end = byte_of(&block.text, offset + n);
            block.text.replace_range(start..end, "");
        }
        TextEdit::InsertNode { path, block } => {
            let idx = edit.node_index();
            if idx > text.blocks.len() {
                return Err(OtError::NodeNotFound { id, path: path.clone() });
            }
            text.blocks.insert(idx, block.clone());
        }
        TextEdit::RemoveNode { path, .. } => {
            let idx = edit.node_index();
            if idx >= text.blocks.len() {
                return Err(OtError::NodeNotFound { id, path: path.clone() });
            }
            text.blocks.remove(idx);
        }
        TextEdit::SplitNode { path, offset } => {
            let idx = edit.node_index();
            let block = block_at_mut(id, text, path)?;
            let len = char_len(&block.text);
            if *offset > len {
                return Err(OtError::OffsetOutOfBounds { offset: *offset, len });
            }
            let at = byte_of(&block.text, *offset);
            let tail = block.text.split_off(at);
            let marks = block.marks.clone();
            text.blocks.insert(idx + 1, TextBlock { text: tail, marks });
        }
        TextEdit::MergeNode { path } => {
            let idx = edit.node_index();
            if idx == 0 || idx >= text.blocks.len() {
                return Err(OtError::NodeNotFound { id, path: path.clone() });
            }
            let merged = text.blocks.remove(idx);
            let prev = &mut text.blocks[idx - 1];
            prev.text.push_str(&merged.text);
            prev.marks.extend(merged.marks);
        }
        TextEdit::SetMark { path, mark, on } => {
            let block = block_at_mut(id, text, path)?;
            if *on {
                block.marks.insert(mark.clone());
            } else {
                block.marks.remove(mark);
            }
        }
    }
    Ok(())
}

/// Compute the inverse of an edit against the pre-apply state.
pub(crate) fn invert_edit(id: ItemId, text: &RichText, edit: &TextEdit) -> Result<TextEdit> {
    Ok(match edit {
        TextEdit::Insert { path, offset, text } => {
            TextEdit::Delete { path: path.clone(), offset: *offset, text: text.clone() }
        }
        TextEdit::Delete { path, offset, text } => {
            TextEdit::Insert { path: path.clone(), offset: *offset, text: text.clone() }
        }
        TextEdit::InsertNode { path, block } => {
            TextEdit::RemoveNode { path: path.clone(), block: block.clone() }
        }
        TextEdit::RemoveNode { path, block } => {
            TextEdit::InsertNode { path: path.clone(), block: block.clone() }
        }
        TextEdit::SplitNode { path, .. } => {
            TextEdit::MergeNode { path: vec![edit.node_index() + 1] }
        }
        TextEdit::MergeNode { path } => {
            let idx = edit.node_index();
            if idx == 0 {
                return Err(OtError::NodeNotFound { id, path: path.clone() });
            }
            let prev = block_at(id, text, &[idx - 1])?;
            TextEdit::SplitNode { path: vec![idx - 1], offset: char_len(&prev.text) }
        }
        TextEdit::SetMark { path, mark, .. } => {
            let block = block_at(id, text, path)?;
            TextEdit::SetMark {
                path: path.clone(),
                mark: mark.clone(),
                on: block.marks.contains(mark),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> ItemId {
        ItemId::nil()
    }

    #[test]
    fn test_insert_delete_roundtrip() {
        let mut text = RichText::from_plain("hello");
        let edit = TextEdit::Insert { path: vec![0], offset: 5, text: " world".into() };
        let inverse = invert_edit(item(), &text, &edit).unwrap();

        apply_edit(item(), &mut text, &edit).unwrap();
        assert_eq!(text.plain_text(), "hello world");

        apply_edit(item(), &mut text, &inverse).unwrap();
        assert_eq!(text.plain_text(), "hello");
    }

    #[test]
    fn test_split_then_merge_restores() {
        let mut text = RichText::from_plain("hello world");
        let split = TextEdit::SplitNode { path: vec![0], offset: 5 };
        let inverse = invert_edit(item(), &text, &split).unwrap();

        apply_edit(item(), &mut text, &split).unwrap();
        assert_eq!(text.blocks.len(), 2);
        assert_eq!(text.blocks[0].text, "hello");
        assert_eq!(text.blocks[1].text, " world");

        apply_edit(item(), &mut text, &inverse).unwrap();
        assert_eq!(text.blocks.len(), 1);
        assert_eq!(text.blocks[0].text, "hello world");
    }

    #[test]
    fn test_merge_inverse_reads_previous_length() {
        let mut text = RichText { blocks: vec![TextBlock::new("abc"), TextBlock::new("def")] };
        let merge = TextEdit::MergeNode { path: vec![1] };
        let inverse = invert_edit(item(), &text, &merge).unwrap();
        assert_eq!(inverse, TextEdit::SplitNode { path: vec![0], offset: 3 });

        apply_edit(item(), &mut text, &merge).unwrap();
        assert_eq!(text.blocks.len(), 1);
        apply_edit(item(), &mut text, &inverse).unwrap();
        assert_eq!(text.blocks[0].text, "abc");
        assert_eq!(text.blocks[1].text, "def");
    }

    #[test]
    fn test_set_mark_inverse_restores_previous_state() {
        let mut text = RichText::from_plain("x");
        let on = TextEdit::SetMark { path: vec![0], mark: "bold".into(), on: true };
        let inverse = invert_edit(item(), &text, &on).unwrap();

        apply_edit(item(), &mut text, &on).unwrap();
        assert!(text.blocks[0].marks.contains("bold"));

        apply_edit(item(), &mut text, &inverse).unwrap();
        assert!(!text.blocks[0].marks.contains("bold"));
    }

    #[test]
    fn test_multibyte_offsets_are_char_offsets() {
        let mut text = RichText::from_plain("héllo");
        let edit = TextEdit::Delete { path: vec![0], offset: 1, text: "é".into() };
        apply_edit(item(), &mut text, &edit).unwrap();
        assert_eq!(text.plain_text(), "hllo");
    }

    #[test]
    fn test_out_of_bounds_offset_errors() {
        let mut text = RichText::from_plain("ab");
        let edit = TextEdit::Insert { path: vec![0], offset: 3, text: "x".into() };
        assert!(matches!(
            apply_edit(item(), &mut text, &edit),
            Err(OtError::OffsetOutOfBounds { .. })
        ));
    }
}
