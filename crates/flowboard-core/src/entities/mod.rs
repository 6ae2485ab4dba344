//! Entity definitions for the canvas document.

mod comment;
mod drawing;
mod edge;
pub(crate) mod lenient;
mod layer;
mod node;
mod stack;
mod text_box;

pub use comment::{Comment, CommentTarget, CommentTargetKind};
pub use drawing::{DrawPoint, DrawTool, Drawing, StrokeStyle};
pub use edge::Edge;
pub use layer::{DEFAULT_LAYER_ID, Layer};
pub use node::{NODE_HEIGHT, NODE_WIDTH, Node, NodeType, TaskStatus};
pub use stack::{StackGroup, StackItem, StackItemKind};
pub use text_box::{TextBox, TextBoxKind};

use crate::clock::Millis;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for any entity.
pub type EntityId = String;

/// Generate a fresh entity id.
pub fn new_id() -> EntityId {
    Uuid::new_v4().to_string()
}

/// The kinds of persisted entity, one tombstone map each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Node,
    Edge,
    Drawing,
    TextBox,
    Comment,
    Layer,
    Stack,
}

/// Common contract of every persisted entity.
pub trait Entity: Clone + Serialize {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    fn created_at(&self) -> Millis;

    fn updated_at(&self) -> Millis;

    fn layer_id(&self) -> &str;

    fn set_layer_id(&mut self, layer_id: &str);

    /// Stamp a mutation at `now`. `updatedAt` never decreases.
    fn touch(&mut self, now: Millis);

    /// Stamp a freshly created entity.
    fn stamp_created(&mut self, now: Millis);

    /// Overwrite both stamps, e.g. to undo changes made by an update closure.
    fn set_timestamps(&mut self, created_at: Millis, updated_at: Millis);

    /// Clamp and re-derive fields after deserialization or an update.
    fn normalize(&mut self) {}
}

/// Author identity attached to user-created content.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Author {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(deserialize_with = "lenient::string")]
    pub name: String,
}

/// A file attached to a node or comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::or_default", skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, deserialize_with = "lenient::or_default", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient::or_default", skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Reference to a z-ordered item on the canvas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRef {
    pub kind: ItemKind,
    pub id: EntityId,
}

impl ItemRef {
    pub fn node(id: impl Into<EntityId>) -> Self {
        Self { kind: ItemKind::Node, id: id.into() }
    }

    pub fn text_box(id: impl Into<EntityId>) -> Self {
        Self { kind: ItemKind::TextBox, id: id.into() }
    }

    pub fn comment(id: impl Into<EntityId>) -> Self {
        Self { kind: ItemKind::Comment, id: id.into() }
    }
}

/// Kinds of item that take part in per-layer paint order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemKind {
    Node,
    TextBox,
    Comment,
}

/// Clamp a percentage-like value into [0, 100]. NaN maps to 0.
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Replace a non-finite coordinate with 0.
pub(crate) fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_percent() {
        assert_eq!(clamp_percent(-5.0), 0.0);
        assert_eq!(clamp_percent(42.5), 42.5);
        assert_eq!(clamp_percent(250.0), 100.0);
        assert_eq!(clamp_percent(f64::NAN), 0.0);
        assert_eq!(clamp_percent(f64::INFINITY), 100.0);
        assert_eq!(clamp_percent(f64::NEG_INFINITY), 0.0);
    }

    #[test]
    fn test_new_ids_are_unique() {
        assert_ne!(new_id(), new_id());
    }
}
