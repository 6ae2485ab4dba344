//! Task and idea nodes.

use super::{Attachment, Author, Entity, EntityId, EntityKind, clamp_percent, finite_or_zero, lenient, new_id};
use crate::clock::Millis;
use serde::{Deserialize, Serialize};

/// Nominal node footprint, used to find a node's center.
pub const NODE_WIDTH: f64 = 220.0;
pub const NODE_HEIGHT: f64 = 120.0;

/// What a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    #[default]
    Task,
    Idea,
}

/// Task status, always derived from progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Queued,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn from_progress(progress: f64) -> Self {
        if progress <= 0.0 {
            TaskStatus::Queued
        } else if progress >= 100.0 {
            TaskStatus::Done
        } else {
            TaskStatus::InProgress
        }
    }
}

/// A node on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    #[serde(deserialize_with = "lenient::string")]
    pub id: EntityId,
    #[serde(default, deserialize_with = "lenient::string")]
    pub title: String,
    /// Rich text, stored as produced by the editor.
    #[serde(default, deserialize_with = "lenient::string")]
    pub content: String,
    #[serde(rename = "type", default, deserialize_with = "lenient::or_default")]
    pub node_type: NodeType,
    #[serde(default, deserialize_with = "lenient::coordinate")]
    pub x: f64,
    #[serde(default, deserialize_with = "lenient::coordinate")]
    pub y: f64,
    /// Base energy in [0, 100].
    #[serde(default, deserialize_with = "lenient::number")]
    pub energy: f64,
    /// Task progress in [0, 100].
    #[serde(default, deserialize_with = "lenient::number")]
    pub progress: f64,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub status: TaskStatus,
    /// Progress is derived from incoming edges instead of set directly.
    #[serde(default, deserialize_with = "lenient::flag")]
    pub child_progress: bool,
    #[serde(default, deserialize_with = "lenient::list")]
    pub attachments: Vec<Attachment>,
    #[serde(default, deserialize_with = "lenient::or_default", skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    #[serde(default = "lenient::default_layer_id", deserialize_with = "lenient::layer_id")]
    pub layer_id: String,
    #[serde(default, deserialize_with = "lenient::z_index", skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i64>,
    #[serde(default, deserialize_with = "lenient::millis")]
    pub created_at: Millis,
    #[serde(default, deserialize_with = "lenient::millis")]
    pub updated_at: Millis,
}

impl Node {
    /// Create a task node at the given position.
    pub fn task(title: impl Into<String>, x: f64, y: f64) -> Self {
        Self::new(NodeType::Task, title, x, y)
    }

    /// Create an idea node at the given position.
    pub fn idea(title: impl Into<String>, x: f64, y: f64) -> Self {
        Self::new(NodeType::Idea, title, x, y)
    }

    fn new(node_type: NodeType, title: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            id: new_id(),
            title: title.into(),
            content: String::new(),
            node_type,
            x,
            y,
            energy: 0.0,
            progress: 0.0,
            status: TaskStatus::Queued,
            child_progress: false,
            attachments: Vec::new(),
            author: None,
            layer_id: lenient::default_layer_id(),
            z_index: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_energy(mut self, energy: f64) -> Self {
        self.energy = clamp_percent(energy);
        self
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = clamp_percent(progress);
        self.status = TaskStatus::from_progress(self.progress);
        self
    }

    pub fn with_layer(mut self, layer_id: impl Into<String>) -> Self {
        self.layer_id = layer_id.into();
        self
    }

    pub fn is_task(&self) -> bool {
        self.node_type == NodeType::Task
    }

    /// Whether this is a finished task.
    pub fn is_done(&self) -> bool {
        self.is_task() && (self.progress >= 100.0 || self.status == TaskStatus::Done)
    }

    /// Center of the node's nominal footprint.
    pub fn center(&self) -> kurbo::Point {
        kurbo::Point::new(self.x + NODE_WIDTH / 2.0, self.y + NODE_HEIGHT / 2.0)
    }
}

impl Entity for Node {
    const KIND: EntityKind = EntityKind::Node;

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
        self.x = finite_or_zero(self.x);
        self.y = finite_or_zero(self.y);
        self.energy = clamp_percent(self.energy);
        self.progress = clamp_percent(self.progress);
        self.status = TaskStatus::from_progress(self.progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_progress() {
        assert_eq!(TaskStatus::from_progress(-1.0), TaskStatus::Queued);
        assert_eq!(TaskStatus::from_progress(0.0), TaskStatus::Queued);
        assert_eq!(TaskStatus::from_progress(0.5), TaskStatus::InProgress);
        assert_eq!(TaskStatus::from_progress(99.9), TaskStatus::InProgress);
        assert_eq!(TaskStatus::from_progress(100.0), TaskStatus::Done);
    }

    #[test]
    fn test_normalize_clamps_and_derives_status() {
        let mut node = Node::task("a", f64::NAN, 4.0);
        node.energy = f64::INFINITY;
        node.progress = 140.0;
        node.status = TaskStatus::Queued;
        node.normalize();
        assert_eq!(node.x, 0.0);
        assert_eq!(node.energy, 100.0);
        assert_eq!(node.progress, 100.0);
        assert_eq!(node.status, TaskStatus::Done);
        assert!(node.is_done());
    }

    #[test]
    fn test_wire_format() {
        let node = Node::idea("spark", 10.0, 20.0).with_id("n1").with_energy(40.0);
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "idea");
        assert_eq!(json["layerId"], "base");
        assert_eq!(json["childProgress"], false);
        assert!(json.get("zIndex").is_none());

        let parsed: Node = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, node);
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let mut node = Node::task("a", 0.0, 0.0);
        node.stamp_created(500);
        node.touch(400);
        assert_eq!(node.updated_at, 500);
        node.touch(600);
        assert_eq!(node.updated_at, 600);
        assert_eq!(node.created_at, 500);
    }
}
