//! Paint order and stack groups.
//!
//! Z-order is per layer over nodes, text boxes and comments. Stacks fold two
//! or more items of one layer into a collapsed pile around an anchor point.
//! While a stack is collapsed, each member's true geometry lives in the
//! stack's item list and the member's own x/y is display-only.

use crate::clock::Millis;
use crate::entities::{
    Entity, EntityId, EntityKind, ItemKind, ItemRef, NODE_HEIGHT, NODE_WIDTH, StackGroup, StackItem,
    StackItemKind,
};
use crate::session::{SessionState, find, find_mut, insert_sorted, take};
use kurbo::{Point, Size, Vec2};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Distance between consecutive members of a collapsed pile.
pub const STACK_SPREAD: f64 = 24.0;

/// A paint-order move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZAction {
    /// One step towards the front.
    Up,
    /// One step towards the back.
    Down,
    /// Frontmost.
    Top,
    /// Backmost.
    Bottom,
}

struct ZEntry {
    kind: ItemKind,
    id: EntityId,
    z: Option<i64>,
    created_at: Millis,
}

fn z_entries(state: &SessionState, layer_id: &str) -> Vec<ZEntry> {
    let nodes = state.nodes.iter().filter(|n| n.layer_id == layer_id).map(|n| ZEntry {
        kind: ItemKind::Node,
        id: n.id.clone(),
        z: n.z_index,
        created_at: n.created_at,
    });
    let boxes = state.text_boxes.iter().filter(|t| t.layer_id == layer_id).map(|t| ZEntry {
        kind: ItemKind::TextBox,
        id: t.id.clone(),
        z: t.z_index,
        created_at: t.created_at,
    });
    let comments = state.comments.iter().filter(|c| c.layer_id == layer_id).map(|c| ZEntry {
        kind: ItemKind::Comment,
        id: c.id.clone(),
        z: c.z_index,
        created_at: c.created_at,
    });
    let mut entries: Vec<ZEntry> = nodes.chain(boxes).chain(comments).collect();
    entries.sort_by(|a, b| {
        (a.z.unwrap_or(0), a.kind, a.created_at, &a.id).cmp(&(b.z.unwrap_or(0), b.kind, b.created_at, &b.id))
    });
    entries
}

fn item_layer<'a>(state: &'a SessionState, item: &ItemRef) -> Option<&'a str> {
    match item.kind {
        ItemKind::Node => state.node(&item.id).map(|n| n.layer_id.as_str()),
        ItemKind::TextBox => state.text_box(&item.id).map(|t| t.layer_id.as_str()),
        ItemKind::Comment => state.comment(&item.id).map(|c| c.layer_id.as_str()),
    }
}

fn set_z(state: &mut SessionState, kind: ItemKind, id: &str, z: i64, now: Millis) {
    match kind {
        ItemKind::Node => {
            if let Some(node) = state.node_mut(id) {
                node.z_index = Some(z);
                node.touch(now);
            }
        }
        ItemKind::TextBox => {
            if let Some(text_box) = state.text_box_mut(id) {
                text_box.z_index = Some(z);
                text_box.touch(now);
            }
        }
        ItemKind::Comment => {
            if let Some(comment) = find_mut(&mut state.comments, id) {
                comment.z_index = Some(z);
                comment.touch(now);
            }
        }
    }
}

/// Move an item in its layer's paint order.
///
/// Ranks are renumbered 0..n-1 and only items whose stored `zIndex`
/// differs from their new rank are written. Returns false when the item is
/// missing or already at the requested end.
pub fn move_item(state: &mut SessionState, item: &ItemRef, action: ZAction, now: Millis) -> bool {
    let Some(layer_id) = item_layer(state, item).map(str::to_string) else {
        return false;
    };
    let mut entries = z_entries(state, &layer_id);
    let Some(pos) = entries.iter().position(|e| e.kind == item.kind && e.id == item.id) else {
        return false;
    };
    let last = entries.len() - 1;
    match action {
        ZAction::Up if pos < last => entries.swap(pos, pos + 1),
        ZAction::Down if pos > 0 => entries.swap(pos, pos - 1),
        ZAction::Top if pos < last => {
            let entry = entries.remove(pos);
            entries.push(entry);
        }
        ZAction::Bottom if pos > 0 => {
            let entry = entries.remove(pos);
            entries.insert(0, entry);
        }
        _ => return false,
    }

    for (rank, entry) in entries.iter().enumerate() {
        let rank = rank as i64;
        if entry.z != Some(rank) {
            set_z(state, entry.kind, &entry.id, rank, now);
        }
    }
    true
}

fn stack_kind(kind: ItemKind) -> Option<StackItemKind> {
    match kind {
        ItemKind::Node => Some(StackItemKind::Node),
        ItemKind::TextBox => Some(StackItemKind::TextBox),
        ItemKind::Comment => None,
    }
}

/// Current live geometry of a stackable item, if it exists.
fn measure(state: &SessionState, kind: StackItemKind, id: &str) -> Option<StackItem> {
    match kind {
        StackItemKind::Node => state.node(id).map(|n| StackItem {
            kind,
            id: n.id.clone(),
            x: n.x,
            y: n.y,
            w: None,
            h: None,
        }),
        StackItemKind::TextBox => state.text_box(id).map(|t| StackItem {
            kind,
            id: t.id.clone(),
            x: t.x,
            y: t.y,
            w: Some(t.width),
            h: Some(t.height),
        }),
    }
}

fn is_live(state: &SessionState, item: &StackItem) -> bool {
    match item.kind {
        StackItemKind::Node => state.node(&item.id).is_some(),
        StackItemKind::TextBox => state.text_box(&item.id).is_some(),
    }
}

fn item_center(item: &StackItem) -> Point {
    match item.kind {
        StackItemKind::Node => Point::new(item.x + NODE_WIDTH / 2.0, item.y + NODE_HEIGHT / 2.0),
        StackItemKind::TextBox => Point::new(
            item.x + item.w.unwrap_or(0.0) / 2.0,
            item.y + item.h.unwrap_or(0.0) / 2.0,
        ),
    }
}

/// Centroid of the member centers.
pub fn centroid(items: &[StackItem]) -> Point {
    if items.is_empty() {
        return Point::ZERO;
    }
    let sum = items
        .iter()
        .fold(Vec2::ZERO, |acc, item| acc + item_center(item).to_vec2());
    let count = items.len() as f64;
    Point::new(sum.x / count, sum.y / count)
}

/// Ring offsets of a collapsed pile of `count` members, centered on zero.
///
/// Members sit on a circle, starting at angle 0, with neighbours exactly
/// [`STACK_SPREAD`] apart.
pub fn collapsed_offsets(count: usize) -> Vec<Vec2> {
    if count < 2 {
        return vec![Vec2::ZERO; count];
    }
    let step = std::f64::consts::TAU / count as f64;
    let radius = STACK_SPREAD / (2.0 * (step / 2.0).sin());
    (0..count)
        .map(|i| Vec2::from_angle(step * i as f64) * radius)
        .collect()
}

/// Write a position (and for text boxes, optionally a size) onto a member.
fn place(state: &mut SessionState, kind: StackItemKind, id: &str, origin: Point, size: Option<Size>, now: Millis) {
    match kind {
        StackItemKind::Node => {
            if let Some(node) = state.node_mut(id) {
                node.x = origin.x;
                node.y = origin.y;
                node.touch(now);
            }
        }
        StackItemKind::TextBox => {
            if let Some(text_box) = state.text_box_mut(id) {
                text_box.x = origin.x;
                text_box.y = origin.y;
                if let Some(size) = size {
                    text_box.width = size.width;
                    text_box.height = size.height;
                }
                text_box.touch(now);
            }
        }
    }
}

/// Move members to their display positions around the anchor.
fn lay_out_collapsed(state: &mut SessionState, stack: &StackGroup, now: Millis) {
    let offsets = collapsed_offsets(stack.items.len());
    for (item, offset) in stack.items.iter().zip(offsets) {
        let center = stack.anchor + offset;
        match item.kind {
            StackItemKind::Node => {
                let origin = center - Vec2::new(NODE_WIDTH / 2.0, NODE_HEIGHT / 2.0);
                place(state, item.kind, &item.id, origin, None, now);
            }
            StackItemKind::TextBox => {
                let size = stack.collapsed_size;
                let origin = center - Vec2::new(size.width / 2.0, size.height / 2.0);
                place(state, item.kind, &item.id, origin, Some(size), now);
            }
        }
    }
}

/// Put members back at their recorded geometry.
fn restore_members(state: &mut SessionState, items: &[StackItem], now: Millis) {
    for item in items {
        let size = match (item.w, item.h) {
            (Some(w), Some(h)) => Some(Size::new(w, h)),
            _ => None,
        };
        place(state, item.kind, &item.id, Point::new(item.x, item.y), size, now);
    }
}

fn replace_stack(state: &mut SessionState, stack: StackGroup) {
    insert_sorted(&mut state.stacks, stack);
}

fn dissolve(state: &mut SessionState, id: &str, now: Millis) -> Option<StackGroup> {
    let stack = take(&mut state.stacks, id)?;
    state
        .tombstones
        .record(EntityKind::Stack, &stack.id, now, stack.updated_at);
    Some(stack)
}

/// Group items into a new, collapsed stack.
///
/// Needs at least two distinct live nodes/text boxes, none already stacked,
/// all on the same layer. Returns the new stack id.
pub fn create_stack(state: &mut SessionState, members: &[ItemRef], now: Millis) -> Option<EntityId> {
    let mut seen = HashSet::new();
    let members: Vec<&ItemRef> = members.iter().filter(|m| seen.insert(*m)).collect();
    if members.len() < 2 {
        return None;
    }

    let mut items = Vec::with_capacity(members.len());
    let mut layer_id: Option<String> = None;
    for member in members {
        let kind = stack_kind(member.kind)?;
        let item = measure(state, kind, &member.id)?;
        if state.stack_containing(kind, &member.id).is_some() {
            return None;
        }
        let member_layer = item_layer(state, member)?;
        match &layer_id {
            Some(layer) if layer != member_layer => return None,
            Some(_) => {}
            None => layer_id = Some(member_layer.to_string()),
        }
        items.push(item);
    }

    let anchor = centroid(&items);
    let mut stack = StackGroup::new(items, anchor, layer_id.unwrap_or_default());
    stack.collapsed = true;
    stack.stamp_created(now);
    lay_out_collapsed(state, &stack, now);
    let id = stack.id.clone();
    replace_stack(state, stack);
    log::debug!("created stack {id}");
    Some(id)
}

/// Restore members to their recorded geometry.
pub fn expand_stack(state: &mut SessionState, id: &str, now: Millis) -> bool {
    let Some(mut stack) = find(&state.stacks, id).cloned() else {
        return false;
    };
    if !stack.collapsed {
        return false;
    }
    restore_members(state, &stack.items, now);
    stack.collapsed = false;
    stack.touch(now);
    replace_stack(state, stack);
    true
}

/// Collapse a stack around the centroid of its members' current geometry.
///
/// An expanded stack first re-measures its members, so moves made while
/// expanded are kept. An already collapsed stack recomputes its anchor from
/// the recorded geometry, which is the current true geometry of its members.
pub fn collapse_stack(state: &mut SessionState, id: &str, now: Millis) -> bool {
    let Some(mut stack) = find(&state.stacks, id).cloned() else {
        return false;
    };
    if !stack.collapsed {
        for item in &mut stack.items {
            if let Some(current) = measure(state, item.kind, &item.id) {
                *item = current;
            }
        }
    }
    stack.anchor = centroid(&stack.items);
    stack.collapsed = true;
    stack.touch(now);
    lay_out_collapsed(state, &stack, now);
    replace_stack(state, stack);
    true
}

pub fn toggle_stack(state: &mut SessionState, id: &str, now: Millis) -> bool {
    match state.stack(id).map(|stack| stack.collapsed) {
        Some(true) => expand_stack(state, id, now),
        Some(false) => collapse_stack(state, id, now),
        None => false,
    }
}

/// Dissolve a stack, restoring its members first if it is collapsed.
pub fn ungroup_stack(state: &mut SessionState, id: &str, now: Millis) -> bool {
    let Some(stack) = dissolve(state, id, now) else {
        return false;
    };
    if stack.collapsed {
        restore_members(state, &stack.items, now);
    }
    true
}

/// Drag a collapsed stack as a whole.
pub fn move_stack(state: &mut SessionState, id: &str, delta: Vec2, now: Millis) -> bool {
    let Some(mut stack) = find(&state.stacks, id).cloned() else {
        return false;
    };
    if !stack.collapsed {
        return false;
    }
    stack.anchor += delta;
    for item in &mut stack.items {
        item.x += delta.x;
        item.y += delta.y;
    }
    stack.touch(now);
    lay_out_collapsed(state, &stack, now);
    replace_stack(state, stack);
    true
}

/// Drop dead members from every stack and dissolve stacks left with fewer
/// than two. Survivors of a dissolved collapsed stack get their true geometry
/// back. Returns the number of stacks dissolved.
pub fn prune_stacks(state: &mut SessionState, now: Millis) -> usize {
    let mut dissolved = 0;
    let ids: Vec<EntityId> = state.stacks.iter().map(|s| s.id.clone()).collect();
    for id in ids {
        let Some(mut stack) = find(&state.stacks, &id).cloned() else {
            continue;
        };
        let live: Vec<StackItem> = stack
            .items
            .iter()
            .filter(|item| is_live(state, item))
            .cloned()
            .collect();
        if live.len() == stack.items.len() {
            continue;
        }
        if live.len() < 2 {
            dissolve(state, &id, now);
            if stack.collapsed {
                restore_members(state, &live, now);
            }
            dissolved += 1;
            continue;
        }
        stack.items = live;
        stack.touch(now);
        if stack.collapsed {
            stack.anchor = centroid(&stack.items);
            lay_out_collapsed(state, &stack, now);
        }
        replace_stack(state, stack);
    }
    if dissolved > 0 {
        log::debug!("pruned {dissolved} stacks");
    }
    dissolved
}
