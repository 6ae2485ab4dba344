//! Text, image and file boxes.

use super::{Author, Entity, EntityId, EntityKind, finite_or_zero, lenient, new_id};
use crate::clock::Millis;
use serde::{Deserialize, Serialize};

/// Smallest width/height a box can have.
const MIN_BOX_SIZE: f64 = 8.0;

/// What a text box holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextBoxKind {
    #[default]
    Text,
    Image,
    File,
}

/// A positioned, sized box on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBox {
    #[serde(deserialize_with = "lenient::string")]
    pub id: EntityId,
    #[serde(default, deserialize_with = "lenient::coordinate")]
    pub x: f64,
    #[serde(default, deserialize_with = "lenient::coordinate")]
    pub y: f64,
    #[serde(default, deserialize_with = "lenient::coordinate")]
    pub width: f64,
    #[serde(default, deserialize_with = "lenient::coordinate")]
    pub height: f64,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub kind: TextBoxKind,
    /// Inline text, or a data URL for small images.
    #[serde(default, deserialize_with = "lenient::string")]
    pub content: String,
    /// Remote object reference for images and files.
    #[serde(default, deserialize_with = "lenient::or_default", skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "lenient::or_default", skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
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

impl TextBox {
    pub fn new(kind: TextBoxKind, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            id: new_id(),
            x,
            y,
            width,
            height,
            kind,
            content: String::new(),
            source: None,
            file_name: None,
            author: None,
            layer_id: lenient::default_layer_id(),
            z_index: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    /// A plain text box.
    pub fn text(content: impl Into<String>, x: f64, y: f64, width: f64, height: f64) -> Self {
        let mut text_box = Self::new(TextBoxKind::Text, x, y, width, height);
        text_box.content = content.into();
        text_box
    }

    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn rect(&self) -> kurbo::Rect {
        kurbo::Rect::new(self.x, self.y, self.x + self.width, self.y + self.height)
    }
}

impl Entity for TextBox {
    const KIND: EntityKind = EntityKind::TextBox;

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
        self.width = finite_or_zero(self.width).max(MIN_BOX_SIZE);
        self.height = finite_or_zero(self.height).max(MIN_BOX_SIZE);
    }
}
