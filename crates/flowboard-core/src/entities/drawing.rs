//! Freehand strokes.

use super::{Author, Entity, EntityId, EntityKind, lenient, new_id};
use crate::clock::Millis;
use serde::{Deserialize, Serialize};

/// One sampled point of a stroke.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawPoint {
    #[serde(deserialize_with = "lenient::coordinate")]
    pub x: f64,
    #[serde(deserialize_with = "lenient::coordinate")]
    pub y: f64,
    #[serde(default, deserialize_with = "lenient::or_default", skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
}

impl DrawPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, pressure: None }
    }
}

/// Pen tool a stroke was drawn with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawTool {
    #[default]
    Pen,
    Marker,
    Highlighter,
}

/// Visual stroke attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrokeStyle {
    pub color: String,
    pub width: f64,
    pub opacity: f64,
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self {
            color: "#1f2937".to_string(),
            width: 2.0,
            opacity: 1.0,
        }
    }
}

/// A freehand drawing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drawing {
    #[serde(deserialize_with = "lenient::string")]
    pub id: EntityId,
    #[serde(default, deserialize_with = "lenient::list")]
    pub points: Vec<DrawPoint>,
    /// Smoothed SVG path produced by the beautifier, if any.
    #[serde(default, deserialize_with = "lenient::or_default", skip_serializing_if = "Option::is_none")]
    pub beautified_path: Option<String>,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub tool: DrawTool,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub style: StrokeStyle,
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

impl Drawing {
    pub fn new(points: Vec<DrawPoint>, tool: DrawTool) -> Self {
        Self {
            id: new_id(),
            points,
            beautified_path: None,
            tool,
            style: StrokeStyle::default(),
            author: None,
            layer_id: lenient::default_layer_id(),
            z_index: None,
            created_at: 0,
            updated_at: 0,
        }
    }
}

impl Entity for Drawing {
    const KIND: EntityKind = EntityKind::Drawing;

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
        if !self.style.width.is_finite() || self.style.width <= 0.0 {
            self.style.width = StrokeStyle::default().width;
        }
        self.style.opacity = if self.style.opacity.is_finite() {
            self.style.opacity.clamp(0.0, 1.0)
        } else {
            1.0
        };
    }
}
