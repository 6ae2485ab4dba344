//! Directed connections between nodes.

use super::{Author, Entity, EntityId, EntityKind, lenient, new_id};
use crate::clock::Millis;
use serde::{Deserialize, Serialize};

/// A directed edge from `source` to `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(deserialize_with = "lenient::string")]
    pub id: EntityId,
    #[serde(deserialize_with = "lenient::string")]
    pub source: EntityId,
    #[serde(deserialize_with = "lenient::string")]
    pub target: EntityId,
    /// Whether the edge carries energy from source to target.
    #[serde(default = "lenient::default_true", deserialize_with = "lenient::flag_default_true")]
    pub energy_enabled: bool,
    #[serde(default, deserialize_with = "lenient::or_default", skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    #[serde(default = "lenient::default_layer_id", deserialize_with = "lenient::layer_id")]
    pub layer_id: String,
    #[serde(default, deserialize_with = "lenient::millis")]
    pub created_at: Millis,
    #[serde(default, deserialize_with = "lenient::millis")]
    pub updated_at: Millis,
}

impl Edge {
    pub fn new(source: impl Into<EntityId>, target: impl Into<EntityId>) -> Self {
        Self {
            id: new_id(),
            source: source.into(),
            target: target.into(),
            energy_enabled: true,
            author: None,
            layer_id: lenient::default_layer_id(),
            created_at: 0,
            updated_at: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.id = id.into();
        self
    }

    /// Whether this edge has `node_id` as either endpoint.
    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }
}

impl Entity for Edge {
    const KIND: EntityKind = EntityKind::Edge;

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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_enabled_defaults_to_true() {
        let edge: Edge = serde_json::from_str(r#"{"id":"e1","source":"a","target":"b"}"#).unwrap();
        assert!(edge.energy_enabled);
        assert!(edge.touches("a"));
        assert!(edge.touches("b"));
        assert!(!edge.touches("c"));

        let edge: Edge =
            serde_json::from_str(r#"{"id":"e1","source":"a","target":"b","energyEnabled":false}"#).unwrap();
        assert!(!edge.energy_enabled);
    }

    #[test]
    fn test_missing_endpoint_is_rejected() {
        assert!(serde_json::from_str::<Edge>(r#"{"id":"e1","source":"a"}"#).is_err());
    }
}
