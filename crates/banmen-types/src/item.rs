//! Wire-level item model.
//!
//! The sync core treats items as mostly opaque: it applies operations to
//! them, reads back just enough state to derive inverses, and serializes
//! them whole when a removal must be reversible. The only structure it
//! genuinely interprets is connector anchoring (for the remove-vs-add
//! transform) and rich-text content (for text coalescing and OT).
//!
//! Shape-specific properties stay an uninterpreted JSON value.

use std::collections::BTreeSet;

use kurbo::{Point, Vec2};
use serde::{Deserialize, Serialize};

use crate::{GroupId, ItemId};

/// Decomposed 2D placement of an item.
///
/// Components are stored independently (not as a composed affine), so delta
/// operations on different components commute. That property is what lets
/// the merge engine promote a scale followed by a translate into one
/// combined op without tracking application order.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transform2d {
    pub translate: Vec2,
    pub scale: f64,
    pub rotation: f64,
}

impl Transform2d {
    pub fn identity() -> Self {
        Self { translate: Vec2::ZERO, scale: 1.0, rotation: 0.0 }
    }

    /// Current position as a point (for absolute-setter reads).
    pub fn position(&self) -> Point {
        Point::new(self.translate.x, self.translate.y)
    }
}

impl Default for Transform2d {
    fn default() -> Self {
        Self::identity()
    }
}

/// One end of a connector: either attached to another item or floating at a
/// raw coordinate.
///
/// An attached anchor caches the layout point it was last resolved to, so
/// demoting it to a floating anchor (when the referenced item is removed by
/// a concurrent actor) preserves the connector's visible position.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Anchor {
    Item { id: ItemId, at: Point },
    Floating { at: Point },
}

impl Anchor {
    /// The referenced item, if attached.
    pub fn item_id(&self) -> Option<ItemId> {
        match self {
            Anchor::Item { id, .. } => Some(*id),
            Anchor::Floating { .. } => None,
        }
    }

    /// The cached layout point.
    pub fn at(&self) -> Point {
        match self {
            Anchor::Item { at, .. } | Anchor::Floating { at } => *at,
        }
    }

    /// Demote to a floating anchor at the cached point.
    pub fn floating(&self) -> Anchor {
        Anchor::Floating { at: self.at() }
    }
}

/// One block (paragraph-level node) of rich text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    /// Block-level style marks ("bold", "code", ...), unordered.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub marks: BTreeSet<String>,
}

impl TextBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), marks: BTreeSet::new() }
    }
}

/// Rich text content: an ordered list of blocks.
///
/// Text edit paths address blocks by index; offsets are char offsets within
/// a block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichText {
    pub blocks: Vec<TextBlock>,
}

impl RichText {
    /// A single empty block — the initial content of a freshly created note.
    pub fn empty() -> Self {
        Self { blocks: vec![TextBlock::default()] }
    }

    pub fn from_plain(text: impl Into<String>) -> Self {
        Self { blocks: vec![TextBlock::new(text)] }
    }

    /// Concatenated block text, newline-separated. For display and tests.
    pub fn plain_text(&self) -> String {
        self.blocks.iter().map(|b| b.text.as_str()).collect::<Vec<_>>().join("\n")
    }
}

/// Type-specific item content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ItemBody {
    /// A geometric shape. Properties (fill, stroke, path data, ...) are the
    /// renderer's business and pass through uninterpreted.
    Shape { shape: String, props: serde_json::Value },
    /// A rich-text note.
    Note { text: RichText },
    /// A connector between two anchors.
    Connector { start: Anchor, end: Anchor },
}

/// Full serialization of one item, sufficient to recreate it in place.
///
/// `z` is the stacking index at serialization time; re-adding a removed item
/// at `min(z, len)` restores its original stacking position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemState {
    pub id: ItemId,
    pub z: u32,
    pub transform: Transform2d,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupId>,
    pub body: ItemBody,
}

impl ItemState {
    /// A fresh note item with empty content, placed at the top of the stack.
    pub fn note(id: ItemId, z: u32) -> Self {
        Self {
            id,
            z,
            transform: Transform2d::identity(),
            group: None,
            body: ItemBody::Note { text: RichText::empty() },
        }
    }

    /// A fresh connector between two anchors.
    pub fn connector(id: ItemId, z: u32, start: Anchor, end: Anchor) -> Self {
        Self {
            id,
            z,
            transform: Transform2d::identity(),
            group: None,
            body: ItemBody::Connector { start, end },
        }
    }
}
