//! The session document and its wire normalization.

use crate::entities::{
    Comment, DEFAULT_LAYER_ID, Drawing, Edge, Entity, Layer, Node, StackGroup, StackItemKind,
    TextBox,
};
use crate::merge::newer;
use crate::tombstones::Tombstones;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// The full replicated document.
///
/// Every collection is kept in canonical order (`createdAt`, then `id`) and
/// holds at most one item per id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub drawings: Vec<Drawing>,
    pub text_boxes: Vec<TextBox>,
    pub comments: Vec<Comment>,
    pub layers: Vec<Layer>,
    pub stacks: Vec<StackGroup>,
    pub tombstones: Tombstones,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// An empty document containing only the default layer.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            drawings: Vec::new(),
            text_boxes: Vec::new(),
            comments: Vec::new(),
            layers: vec![Layer::base()],
            stacks: Vec::new(),
            tombstones: Tombstones::new(),
        }
    }

    /// Parse and normalize a JSON document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let raw: Value = serde_json::from_str(json)?;
        Ok(normalize_session_state(&raw))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        find(&self.nodes, id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        find_mut(&mut self.nodes, id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        find(&self.edges, id)
    }

    pub fn drawing(&self, id: &str) -> Option<&Drawing> {
        find(&self.drawings, id)
    }

    pub fn text_box(&self, id: &str) -> Option<&TextBox> {
        find(&self.text_boxes, id)
    }

    pub fn text_box_mut(&mut self, id: &str) -> Option<&mut TextBox> {
        find_mut(&mut self.text_boxes, id)
    }

    pub fn comment(&self, id: &str) -> Option<&Comment> {
        find(&self.comments, id)
    }

    pub fn layer(&self, id: &str) -> Option<&Layer> {
        find(&self.layers, id)
    }

    pub fn stack(&self, id: &str) -> Option<&StackGroup> {
        find(&self.stacks, id)
    }

    /// The live stack that has this item as a member, if any.
    pub fn stack_containing(&self, kind: StackItemKind, id: &str) -> Option<&StackGroup> {
        self.stacks.iter().find(|stack| stack.contains(kind, id))
    }

    /// Whether the item sits in a collapsed stack and so cannot move on its own.
    pub fn is_pinned_by_stack(&self, kind: StackItemKind, id: &str) -> bool {
        self.stack_containing(kind, id).is_some_and(|stack| stack.collapsed)
    }

    /// Re-insert the default layer if it went missing.
    pub fn ensure_default_layer(&mut self) {
        self.tombstones.layers.remove(DEFAULT_LAYER_ID);
        if self.layer(DEFAULT_LAYER_ID).is_none() {
            insert_sorted(&mut self.layers, Layer::base());
        }
    }
}

/// Turn an untrusted wire payload into a session document.
///
/// Non-objects yield an empty document; non-array collections are empty;
/// malformed items are dropped; duplicate ids collapse to the newest copy;
/// items already covered by their own tombstone are dropped.
pub fn normalize_session_state(raw: &Value) -> SessionState {
    let Some(object) = raw.as_object() else {
        if !raw.is_null() {
            log::warn!("session snapshot is not an object, treating it as empty");
        }
        return SessionState::new();
    };

    let tombstones = object
        .get("tombstones")
        .map(Tombstones::from_value)
        .unwrap_or_default();

    let mut state = SessionState {
        nodes: normalize_items(object.get("nodes"), &tombstones),
        edges: normalize_items(object.get("edges"), &tombstones),
        drawings: normalize_items(object.get("drawings"), &tombstones),
        text_boxes: normalize_items(object.get("textBoxes"), &tombstones),
        comments: normalize_items(object.get("comments"), &tombstones),
        layers: normalize_items(object.get("layers"), &tombstones),
        stacks: normalize_items(object.get("stacks"), &tombstones),
        tombstones,
    };
    state.ensure_default_layer();
    state
}

fn normalize_items<T>(value: Option<&Value>, tombstones: &Tombstones) -> Vec<T>
where
    T: Entity + DeserializeOwned,
{
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    let parsed = items.iter().filter_map(|item| {
        match serde_json::from_value::<T>(item.clone()) {
            Ok(mut entity) if !entity.id().is_empty() => {
                entity.normalize();
                Some(entity)
            }
            Ok(_) => {
                log::warn!("dropping {:?} without an id", T::KIND);
                None
            }
            Err(err) => {
                log::warn!("dropping malformed {:?}: {}", T::KIND, err);
                None
            }
        }
    });
    canonicalize(parsed.filter(|item| !tombstones.suppresses(T::KIND, item.id(), item.updated_at())))
}

/// Canonical order: creation time, then id.
pub(crate) fn canonical_cmp<T: Entity>(a: &T, b: &T) -> Ordering {
    a.created_at()
        .cmp(&b.created_at())
        .then_with(|| a.id().cmp(b.id()))
}

/// Collapse duplicate ids to their newest copy and sort canonically.
pub(crate) fn canonicalize<T: Entity>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut by_id: BTreeMap<String, T> = BTreeMap::new();
    for item in items {
        match by_id.get(item.id()) {
            Some(existing) if !newer(&item, existing) => {}
            _ => {
                by_id.insert(item.id().to_string(), item);
            }
        }
    }
    let mut items: Vec<T> = by_id.into_values().collect();
    items.sort_by(canonical_cmp);
    items
}

pub(crate) fn find<'a, T: Entity>(items: &'a [T], id: &str) -> Option<&'a T> {
    items.iter().find(|item| item.id() == id)
}

pub(crate) fn find_mut<'a, T: Entity>(items: &'a mut [T], id: &str) -> Option<&'a mut T> {
    items.iter_mut().find(|item| item.id() == id)
}

/// Insert keeping canonical order. An existing item with the same id is replaced.
pub(crate) fn insert_sorted<T: Entity>(items: &mut Vec<T>, item: T) {
    items.retain(|existing| existing.id() != item.id());
    let pos = items.partition_point(|existing| canonical_cmp(existing, &item) == Ordering::Less);
    items.insert(pos, item);
}

pub(crate) fn take<T: Entity>(items: &mut Vec<T>, id: &str) -> Option<T> {
    let pos = items.iter().position(|item| item.id() == id)?;
    Some(items.remove(pos))
}
