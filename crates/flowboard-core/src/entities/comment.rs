//! Threaded comments.

use super::{Attachment, Author, Entity, EntityId, EntityKind, lenient, new_id};
use crate::clock::Millis;
use serde::{Deserialize, Serialize};

/// What a comment is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommentTargetKind {
    #[default]
    Canvas,
    Node,
    Edge,
    TextBox,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentTarget {
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub kind: CommentTargetKind,
    /// Id of the target entity; `None` for canvas comments.
    #[serde(default, deserialize_with = "lenient::or_default", skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
}

impl CommentTarget {
    pub fn canvas() -> Self {
        Self::default()
    }

    pub fn node(id: impl Into<EntityId>) -> Self {
        Self {
            kind: CommentTargetKind::Node,
            id: Some(id.into()),
        }
    }
}

/// A comment, optionally a reply to another comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(deserialize_with = "lenient::string")]
    pub id: EntityId,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub target: CommentTarget,
    #[serde(default, deserialize_with = "lenient::or_default", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<EntityId>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub text: String,
    #[serde(default, deserialize_with = "lenient::list")]
    pub attachments: Vec<Attachment>,
    #[serde(default, deserialize_with = "lenient::or_default", skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    #[serde(default, deserialize_with = "lenient::coordinate")]
    pub x: f64,
    #[serde(default, deserialize_with = "lenient::coordinate")]
    pub y: f64,
    #[serde(default = "lenient::default_layer_id", deserialize_with = "lenient::layer_id")]
    pub layer_id: String,
    #[serde(default, deserialize_with = "lenient::z_index", skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i64>,
    #[serde(default, deserialize_with = "lenient::millis")]
    pub created_at: Millis,
    #[serde(default, deserialize_with = "lenient::millis")]
    pub updated_at: Millis,
}

impl Comment {
    pub fn new(target: CommentTarget, text: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            target,
            parent_id: None,
            text: text.into(),
            attachments: Vec::new(),
            author: None,
            x: 0.0,
            y: 0.0,
            layer_id: lenient::default_layer_id(),
            z_index: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    /// A reply in the thread of `parent`.
    pub fn reply_to(parent: &Comment, text: impl Into<String>) -> Self {
        let mut reply = Self::new(parent.target.clone(), text);
        reply.parent_id = Some(parent.id.clone());
        reply.layer_id = parent.layer_id.clone();
        reply
    }
}

impl Entity for Comment {
    const KIND: EntityKind = EntityKind::Comment;

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
        if self.target.kind == CommentTargetKind::Canvas {
            self.target.id = None;
        }
        if self.parent_id.as_deref() == Some(self.id.as_str()) {
            self.parent_id = None;
        }
    }
}
