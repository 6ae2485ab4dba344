//! Visibility layers.

use super::{Entity, EntityId, EntityKind, lenient, new_id};
use crate::clock::Millis;
use serde::{Deserialize, Serialize};

/// Id of the layer that always exists.
pub const DEFAULT_LAYER_ID: &str = "base";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    #[serde(deserialize_with = "lenient::string")]
    pub id: EntityId,
    #[serde(default, deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(default = "lenient::default_true", deserialize_with = "lenient::flag_default_true")]
    pub visible: bool,
    #[serde(default, deserialize_with = "lenient::millis")]
    pub created_at: Millis,
    #[serde(default, deserialize_with = "lenient::millis")]
    pub updated_at: Millis,
}

impl Layer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            visible: true,
            created_at: 0,
            updated_at: 0,
        }
    }

    /// The default layer. Its timestamps are 0 so that any real edit wins.
    pub fn base() -> Self {
        Self {
            id: DEFAULT_LAYER_ID.to_string(),
            name: "Base".to_string(),
            visible: true,
            created_at: 0,
            updated_at: 0,
        }
    }

    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_LAYER_ID
    }
}

impl Entity for Layer {
    const KIND: EntityKind = EntityKind::Layer;

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> Millis {
        self.created_at
    }

    fn updated_at(&self) -> Millis {
        self.updated_at
    }

    /// A layer belongs to itself.
    fn layer_id(&self) -> &str {
        &self.id
    }

    fn set_layer_id(&mut self, _layer_id: &str) {}

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
}
