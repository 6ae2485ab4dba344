//! Stack groups: reversible grouping of co-located items.

use super::{Entity, EntityId, EntityKind, finite_or_zero, lenient, new_id};
use crate::clock::Millis;
use kurbo::{Point, Size};
use serde::{Deserialize, Serialize};

/// Uniform size text boxes take while their stack is collapsed.
pub const COLLAPSED_SIZE: Size = Size::new(180.0, 120.0);

/// Members that can be stacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StackItemKind {
    Node,
    TextBox,
}

/// A member of a stack with its last known live geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackItem {
    pub kind: StackItemKind,
    #[serde(deserialize_with = "lenient::string")]
    pub id: EntityId,
    #[serde(default, deserialize_with = "lenient::coordinate")]
    pub x: f64,
    #[serde(default, deserialize_with = "lenient::coordinate")]
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<f64>,
}

/// A group of items collapsed into (or expanded from) one representative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackGroup {
    #[serde(deserialize_with = "lenient::string")]
    pub id: EntityId,
    #[serde(default, deserialize_with = "lenient::list")]
    pub items: Vec<StackItem>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub collapsed: bool,
    #[serde(default = "default_collapsed_size")]
    pub collapsed_size: Size,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub anchor: Point,
    #[serde(default = "lenient::default_layer_id", deserialize_with = "lenient::layer_id")]
    pub layer_id: String,
    #[serde(default, deserialize_with = "lenient::millis")]
    pub created_at: Millis,
    #[serde(default, deserialize_with = "lenient::millis")]
    pub updated_at: Millis,
}

fn default_collapsed_size() -> Size {
    COLLAPSED_SIZE
}

impl StackGroup {
    pub fn new(items: Vec<StackItem>, anchor: Point, layer_id: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            items,
            collapsed: false,
            collapsed_size: COLLAPSED_SIZE,
            anchor,
            layer_id: layer_id.into(),
            created_at: 0,
            updated_at: 0,
        }
    }

    pub fn contains(&self, kind: StackItemKind, id: &str) -> bool {
        self.items.iter().any(|item| item.kind == kind && item.id == id)
    }
}

impl Entity for StackGroup {
    const KIND: EntityKind = EntityKind::Stack;

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> Millis {
        self.created_at
    }

    fn updated_at(&self) -> Millis {
        self.updated_at
    }

    fn layer_id(&self) -> &str {
        &self.layer_id
    }

    fn set_layer_id(&mut self, layer_id: &str) {
        self.layer_id = layer_id.to_string();
    }

    fn touch(&mut self, now: Millis) {
        self.updated_at = self.updated_at.max(now);
    }

    fn stamp_created(&mut self, now: Millis) {
        self.created_at = now;
        self.updated_at = now;
    }

    fn set_timestamps(&mut self, created_at: Millis, updated_at: Millis) {
        self.created_at = created_at;
        self.updated_at = updated_at;
    }

    fn normalize(&mut self) {
        self.anchor = Point::new(finite_or_zero(self.anchor.x), finite_or_zero(self.anchor.y));
        if !(self.collapsed_size.width.is_finite() && self.collapsed_size.width > 0.0)
            || !(self.collapsed_size.height.is_finite() && self.collapsed_size.height > 0.0)
        {
            self.collapsed_size = COLLAPSED_SIZE;
        }
        let mut seen = std::collections::HashSet::new();
        self.items.retain(|item| seen.insert((item.kind, item.id.clone())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_defaults() {
        let json = r#"{"id":"s1","items":[{"kind":"node","id":"n1","x":1,"y":2},
                       {"kind":"textBox","id":"t1","x":3,"y":4,"w":50,"h":60},
                       {"kind":"drawing","id":"d1"}]}"#;
        let mut stack: StackGroup = serde_json::from_str(json).unwrap();
        stack.normalize();
        assert_eq!(stack.items.len(), 2);
        assert!(!stack.collapsed);
        assert_eq!(stack.collapsed_size, COLLAPSED_SIZE);
        assert_eq!(stack.anchor, Point::ZERO);
        assert!(stack.contains(StackItemKind::TextBox, "t1"));
        assert!(!stack.contains(StackItemKind::Node, "t1"));
        assert_eq!(stack.items[1].w, Some(50.0));
    }
}
