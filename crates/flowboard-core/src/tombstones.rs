//! Deletion ledger.
//!
//! One map per entity kind from id to the time the id was deleted. Entries
//! only ever move forward: recording and merging both take the maximum.

use crate::clock::Millis;
use crate::entities::{DEFAULT_LAYER_ID, EntityKind, lenient};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Deletion timestamps for a single entity kind.
pub type TombstoneMap = BTreeMap<String, Millis>;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tombstones {
    pub nodes: TombstoneMap,
    pub edges: TombstoneMap,
    pub drawings: TombstoneMap,
    pub text_boxes: TombstoneMap,
    pub comments: TombstoneMap,
    pub layers: TombstoneMap,
    pub stacks: TombstoneMap,
}

impl Tombstones {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(&self, kind: EntityKind) -> &TombstoneMap {
        match kind {
            EntityKind::Node => &self.nodes,
            EntityKind::Edge => &self.edges,
            EntityKind::Drawing => &self.drawings,
            EntityKind::TextBox => &self.text_boxes,
            EntityKind::Comment => &self.comments,
            EntityKind::Layer => &self.layers,
            EntityKind::Stack => &self.stacks,
        }
    }

    fn map_mut(&mut self, kind: EntityKind) -> &mut TombstoneMap {
        match kind {
            EntityKind::Node => &mut self.nodes,
            EntityKind::Edge => &mut self.edges,
            EntityKind::Drawing => &mut self.drawings,
            EntityKind::TextBox => &mut self.text_boxes,
            EntityKind::Comment => &mut self.comments,
            EntityKind::Layer => &mut self.layers,
            EntityKind::Stack => &mut self.stacks,
        }
    }

    /// Deletion time recorded for `id`, if any.
    pub fn get(&self, kind: EntityKind, id: &str) -> Option<Millis> {
        self.map(kind).get(id).copied()
    }

    /// Whether `id` has been deleted at or after `updated_at`.
    pub fn suppresses(&self, kind: EntityKind, id: &str, updated_at: Millis) -> bool {
        self.get(kind, id).is_some_and(|deleted_at| deleted_at >= updated_at)
    }

    /// Record a deletion of an entity last edited at `updated_at`.
    ///
    /// The stamp is `max(now, updated_at + 1)` so it always beats the edit it
    /// follows, and never lowers an existing entry. Returns the stored stamp.
    pub fn record(&mut self, kind: EntityKind, id: &str, now: Millis, updated_at: Millis) -> Millis {
        let stamp = now.max(updated_at.saturating_add(1));
        let entry = self.map_mut(kind).entry(id.to_string()).or_insert(stamp);
        *entry = (*entry).max(stamp);
        *entry
    }

    /// Element-wise maximum of two ledgers.
    pub fn merge(&self, other: &Tombstones) -> Tombstones {
        Tombstones {
            nodes: merge_maps(&self.nodes, &other.nodes),
            edges: merge_maps(&self.edges, &other.edges),
            drawings: merge_maps(&self.drawings, &other.drawings),
            text_boxes: merge_maps(&self.text_boxes, &other.text_boxes),
            comments: merge_maps(&self.comments, &other.comments),
            layers: merge_maps(&self.layers, &other.layers),
            stacks: merge_maps(&self.stacks, &other.stacks),
        }
    }

    /// Total number of recorded deletions.
    pub fn len(&self) -> usize {
        [
            &self.nodes,
            &self.edges,
            &self.drawings,
            &self.text_boxes,
            &self.comments,
            &self.layers,
            &self.stacks,
        ]
        .iter()
        .map(|m| m.len())
        .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build a ledger from an untrusted JSON value.
    ///
    /// Anything that is not an object yields an empty ledger; per-kind values
    /// that are not objects are empty maps; entries whose stamp is not a finite
    /// number are skipped.
    pub fn from_value(value: &Value) -> Tombstones {
        let Some(object) = value.as_object() else {
            return Tombstones::default();
        };
        let read = |key: &str| -> TombstoneMap {
            object
                .get(key)
                .and_then(Value::as_object)
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|(id, stamp)| {
                            lenient::value_to_millis(stamp).map(|stamp| (id.clone(), stamp))
                        })
                        .collect()
                })
                .unwrap_or_default()
        };
        let mut tombstones = Tombstones {
            nodes: read("nodes"),
            edges: read("edges"),
            drawings: read("drawings"),
            text_boxes: read("textBoxes"),
            comments: read("comments"),
            layers: read("layers"),
            stacks: read("stacks"),
        };
        // The default layer can never be deleted.
        tombstones.layers.remove(DEFAULT_LAYER_ID);
        tombstones
    }
}

fn merge_maps(a: &TombstoneMap, b: &TombstoneMap) -> TombstoneMap {
    let mut merged = a.clone();
    for (id, &stamp) in b {
        merged
            .entry(id.clone())
            .and_modify(|existing| *existing = (*existing).max(stamp))
            .or_insert(stamp);
    }
    merged
}
