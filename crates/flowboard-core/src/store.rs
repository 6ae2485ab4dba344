//! The engine: the live document plus everything derived from it.
//!
//! `EngineState` owns the session document, the undo history, the derived
//! energy/progress maps and the selection. All mutations go through it so
//! that timestamps, tombstones, stack invariants and derived values stay in
//! step. Callers learn about changes by draining [`EngineState::poll_events`].

use crate::clock::{Clock, Millis, SystemClock};
use crate::energy::{EnergyMap, EnergyMode, effective_progress, propagate};
use crate::entities::{
    Comment, DEFAULT_LAYER_ID, Drawing, Edge, Entity, EntityId, EntityKind, ItemKind, ItemRef,
    Layer, Node, StackItemKind, TextBox,
};
use crate::history::HistoryManager;
use crate::merge::merge_session_state;
use crate::session::{SessionState, find, insert_sorted, normalize_session_state, take};
use crate::stacking::{self, ZAction};
use kurbo::Vec2;
use serde_json::Value;
use std::collections::HashSet;

/// Notifications queued by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// A local mutation changed the document.
    DocumentChanged,
    /// A remote snapshot was merged in.
    RemoteMerged,
    /// Undo or redo replaced the document.
    HistoryRestored,
}

/// Apply `f` to a copy of `current`.
///
/// The id and both stamps are not editable through the closure; the result
/// is normalized and stamped at `now`. Returns `None` if the closure tried to
/// change the id.
fn edited<T: Entity>(current: &T, now: Millis, f: impl FnOnce(&mut T)) -> Option<T> {
    let mut next = current.clone();
    f(&mut next);
    if next.id() != current.id() {
        log::warn!("refusing to change the id of {:?} {}", T::KIND, current.id());
        return None;
    }
    next.set_timestamps(current.created_at(), current.updated_at());
    next.normalize();
    next.touch(now);
    Some(next)
}

pub struct EngineState {
    state: SessionState,
    clock: Box<dyn Clock>,
    history: HistoryManager,
    energy_mode: EnergyMode,
    energy: EnergyMap,
    progress: EnergyMap,
    selection: Vec<ItemRef>,
    events: Vec<EngineEvent>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineState {
    /// An empty document on the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self::from_session(SessionState::new(), clock)
    }

    /// Start from an existing document, e.g. one loaded from storage.
    pub fn from_session(state: SessionState, clock: impl Clock + 'static) -> Self {
        let mut engine = Self {
            state,
            clock: Box::new(clock),
            history: HistoryManager::new(),
            energy_mode: EnergyMode::default(),
            energy: EnergyMap::new(),
            progress: EnergyMap::new(),
            selection: Vec::new(),
            events: Vec::new(),
        };
        engine.state.ensure_default_layer();
        engine.recompute();
        engine
    }

    pub fn now(&self) -> Millis {
        self.clock.now_millis()
    }

    /// Read access to the document.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// An owned copy of the document, for sending or saving.
    pub fn snapshot(&self) -> SessionState {
        self.state.clone()
    }

    /// Drain queued events, oldest first.
    pub fn poll_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    fn emit(&mut self, event: EngineEvent) {
        if self.events.last() != Some(&event) {
            self.events.push(event);
        }
    }

    fn changed(&mut self) {
        self.emit(EngineEvent::DocumentChanged);
    }

    fn recompute(&mut self) {
        let run = propagate(&self.state.nodes, &self.state.edges, self.energy_mode);
        self.energy = run.values;
        self.progress = effective_progress(&self.state.nodes, &self.state.edges);
    }

    /// Layer an item should live on: `requested` if it is a live layer,
    /// otherwise `fallback`.
    fn live_layer<'a>(&self, requested: &'a str, fallback: &'a str) -> &'a str {
        if self.state.layer(requested).is_some() {
            requested
        } else {
            fallback
        }
    }

    fn prepare_new<T: Entity>(&self, item: &mut T) {
        item.normalize();
        let layer = self.live_layer(item.layer_id(), DEFAULT_LAYER_ID).to_string();
        item.set_layer_id(&layer);
        item.stamp_created(self.now());
    }

    /// Keep the previous layer if the closure moved the item to a missing one.
    fn keep_live_layer<T: Entity>(&self, next: &mut T, previous: &str) {
        let layer = self.live_layer(next.layer_id(), previous).to_string();
        next.set_layer_id(&layer);
    }

    fn forget_selected(&mut self, kind: ItemKind, ids: &HashSet<EntityId>) {
        self.selection
            .retain(|item| !(item.kind == kind && ids.contains(&item.id)));
    }

    // --- Nodes ---

    pub fn add_node(&mut self, mut node: Node) -> EntityId {
        self.prepare_new(&mut node);
        let id = node.id.clone();
        insert_sorted(&mut self.state.nodes, node);
        self.recompute();
        self.changed();
        id
    }

    /// Edit a node in place.
    ///
    /// Fields are re-clamped afterwards. Position changes are dropped while
    /// the node is pinned by a collapsed stack, and a stacked node keeps its
    /// layer.
    pub fn update_node(&mut self, id: &str, f: impl FnOnce(&mut Node)) -> bool {
        let Some(current) = self.state.node(id) else {
            return false;
        };
        let Some(mut next) = edited(current, self.now(), f) else {
            return false;
        };
        if self.state.is_pinned_by_stack(StackItemKind::Node, id) {
            next.x = current.x;
            next.y = current.y;
        }
        if self.state.stack_containing(StackItemKind::Node, id).is_some() {
            next.layer_id = current.layer_id.clone();
        } else {
            let previous = current.layer_id.clone();
            self.keep_live_layer(&mut next, &previous);
        }
        insert_sorted(&mut self.state.nodes, next);
        self.recompute();
        self.changed();
        true
    }

    /// Move a node. Returns false if it is missing or pinned by a collapsed stack.
    pub fn set_node_position(&mut self, id: &str, x: f64, y: f64) -> bool {
        if self.state.is_pinned_by_stack(StackItemKind::Node, id) {
            return false;
        }
        self.update_node(id, |node| {
            node.x = x;
            node.y = y;
        })
    }

    /// Delete a node together with every edge touching it.
    pub fn delete_node(&mut self, id: &str) -> bool {
        let now = self.now();
        if !self.remove_node(id, now) {
            return false;
        }
        stacking::prune_stacks(&mut self.state, now);
        self.recompute();
        self.changed();
        true
    }

    /// Tombstone a node and its edges without pruning or recomputing.
    fn remove_node(&mut self, id: &str, now: Millis) -> bool {
        let Some(node) = take(&mut self.state.nodes, id) else {
            return false;
        };
        self.state
            .tombstones
            .record(EntityKind::Node, &node.id, now, node.updated_at);

        let (dead, live): (Vec<Edge>, Vec<Edge>) = std::mem::take(&mut self.state.edges)
            .into_iter()
            .partition(|edge| edge.touches(id));
        self.state.edges = live;
        for edge in &dead {
            self.state
                .tombstones
                .record(EntityKind::Edge, &edge.id, now, edge.updated_at);
        }

        let ids = HashSet::from([node.id]);
        self.forget_selected(ItemKind::Node, &ids);
        log::debug!("deleted node {id} and {} edges", dead.len());
        true
    }

    // --- Edges ---

    /// Connect two distinct live nodes. Returns `None` otherwise.
    pub fn add_edge(&mut self, mut edge: Edge) -> Option<EntityId> {
        if edge.source == edge.target
            || self.state.node(&edge.source).is_none()
            || self.state.node(&edge.target).is_none()
        {
            return None;
        }
        self.prepare_new(&mut edge);
        let id = edge.id.clone();
        insert_sorted(&mut self.state.edges, edge);
        self.recompute();
        self.changed();
        Some(id)
    }

    /// Edit an edge. Its endpoints are fixed; reconnecting is delete + add.
    pub fn update_edge(&mut self, id: &str, f: impl FnOnce(&mut Edge)) -> bool {
        let Some(current) = self.state.edge(id) else {
            return false;
        };
        let Some(mut next) = edited(current, self.now(), f) else {
            return false;
        };
        next.source = current.source.clone();
        next.target = current.target.clone();
        let previous = current.layer_id.clone();
        self.keep_live_layer(&mut next, &previous);
        insert_sorted(&mut self.state.edges, next);
        self.recompute();
        self.changed();
        true
    }

    pub fn delete_edge(&mut self, id: &str) -> bool {
        let Some(edge) = take(&mut self.state.edges, id) else {
            return false;
        };
        self.state
            .tombstones
            .record(EntityKind::Edge, &edge.id, self.now(), edge.updated_at);
        self.recompute();
        self.changed();
        true
    }

    // --- Drawings ---

    pub fn add_drawing(&mut self, mut drawing: Drawing) -> EntityId {
        self.prepare_new(&mut drawing);
        let id = drawing.id.clone();
        insert_sorted(&mut self.state.drawings, drawing);
        self.changed();
        id
    }

    pub fn update_drawing(&mut self, id: &str, f: impl FnOnce(&mut Drawing)) -> bool {
        let Some(current) = self.state.drawing(id) else {
            return false;
        };
        let Some(mut next) = edited(current, self.now(), f) else {
            return false;
        };
        let previous = current.layer_id.clone();
        self.keep_live_layer(&mut next, &previous);
        insert_sorted(&mut self.state.drawings, next);
        self.changed();
        true
    }

    pub fn delete_drawing(&mut self, id: &str) -> bool {
        let Some(drawing) = take(&mut self.state.drawings, id) else {
            return false;
        };
        self.state
            .tombstones
            .record(EntityKind::Drawing, &drawing.id, self.now(), drawing.updated_at);
        self.changed();
        true
    }

    // --- Text boxes ---

    pub fn add_text_box(&mut self, mut text_box: TextBox) -> EntityId {
        self.prepare_new(&mut text_box);
        let id = text_box.id.clone();
        insert_sorted(&mut self.state.text_boxes, text_box);
        self.changed();
        id
    }

    /// Edit a text box. While pinned by a collapsed stack its geometry is
    /// display-only and geometry changes are dropped.
    pub fn update_text_box(&mut self, id: &str, f: impl FnOnce(&mut TextBox)) -> bool {
        let Some(current) = self.state.text_box(id) else {
            return false;
        };
        let Some(mut next) = edited(current, self.now(), f) else {
            return false;
        };
        if self.state.is_pinned_by_stack(StackItemKind::TextBox, id) {
            next.x = current.x;
            next.y = current.y;
            next.width = current.width;
            next.height = current.height;
        }
        if self.state.stack_containing(StackItemKind::TextBox, id).is_some() {
            next.layer_id = current.layer_id.clone();
        } else {
            let previous = current.layer_id.clone();
            self.keep_live_layer(&mut next, &previous);
        }
        insert_sorted(&mut self.state.text_boxes, next);
        self.changed();
        true
    }

    pub fn set_text_box_position(&mut self, id: &str, x: f64, y: f64) -> bool {
        if self.state.is_pinned_by_stack(StackItemKind::TextBox, id) {
            return false;
        }
        self.update_text_box(id, |text_box| {
            text_box.x = x;
            text_box.y = y;
        })
    }

    pub fn delete_text_box(&mut self, id: &str) -> bool {
        let now = self.now();
        let Some(text_box) = take(&mut self.state.text_boxes, id) else {
            return false;
        };
        self.state
            .tombstones
            .record(EntityKind::TextBox, &text_box.id, now, text_box.updated_at);
        self.forget_selected(ItemKind::TextBox, &HashSet::from([text_box.id]));
        stacking::prune_stacks(&mut self.state, now);
        self.changed();
        true
    }

    // --- Comments ---

    pub fn add_comment(&mut self, mut comment: Comment) -> EntityId {
        self.prepare_new(&mut comment);
        let id = comment.id.clone();
        insert_sorted(&mut self.state.comments, comment);
        self.changed();
        id
    }

    pub fn update_comment(&mut self, id: &str, f: impl FnOnce(&mut Comment)) -> bool {
        let Some(current) = self.state.comment(id) else {
            return false;
        };
        let Some(mut next) = edited(current, self.now(), f) else {
            return false;
        };
        let previous = current.layer_id.clone();
        self.keep_live_layer(&mut next, &previous);
        insert_sorted(&mut self.state.comments, next);
        self.changed();
        true
    }

    /// Delete a comment and every reply below it.
    pub fn delete_comment(&mut self, id: &str) -> bool {
        if self.state.comment(id).is_none() {
            return false;
        }
        let mut doomed = HashSet::from([id.to_string()]);
        loop {
            let replies: Vec<EntityId> = self
                .state
                .comments
                .iter()
                .filter(|c| !doomed.contains(&c.id))
                .filter(|c| c.parent_id.as_ref().is_some_and(|p| doomed.contains(p)))
                .map(|c| c.id.clone())
                .collect();
            if replies.is_empty() {
                break;
            }
            doomed.extend(replies);
        }
        self.remove_comments(&doomed, self.now());
        self.changed();
        true
    }

    fn remove_comments(&mut self, ids: &HashSet<EntityId>, now: Millis) {
        let (dead, live): (Vec<Comment>, Vec<Comment>) = std::mem::take(&mut self.state.comments)
            .into_iter()
            .partition(|comment| ids.contains(&comment.id));
        self.state.comments = live;
        for comment in dead {
            self.state
                .tombstones
                .record(EntityKind::Comment, &comment.id, now, comment.updated_at);
        }
        self.forget_selected(ItemKind::Comment, ids);
    }

    // --- Layers ---

    pub fn add_layer(&mut self, mut layer: Layer) -> EntityId {
        layer.stamp_created(self.now());
        let id = layer.id.clone();
        insert_sorted(&mut self.state.layers, layer);
        self.changed();
        id
    }

    pub fn rename_layer(&mut self, id: &str, name: impl Into<String>) -> bool {
        let now = self.now();
        let Some(layer) = find(&self.state.layers, id) else {
            return false;
        };
        let mut layer = layer.clone();
        layer.name = name.into();
        layer.touch(now);
        insert_sorted(&mut self.state.layers, layer);
        self.changed();
        true
    }

    /// Show or hide a layer. Hiding the default layer is refused while it is
    /// the only visible one.
    pub fn set_layer_visible(&mut self, id: &str, visible: bool) -> bool {
        let now = self.now();
        let Some(layer) = find(&self.state.layers, id) else {
            return false;
        };
        if !visible && layer.is_default() {
            let others_visible = self
                .state
                .layers
                .iter()
                .any(|other| !other.is_default() && other.visible);
            if !others_visible {
                return false;
            }
        }
        if layer.visible == visible {
            return true;
        }
        let mut layer = layer.clone();
        layer.visible = visible;
        layer.touch(now);
        insert_sorted(&mut self.state.layers, layer);
        self.changed();
        true
    }

    /// Delete a layer and everything on it. The default layer cannot be deleted.
    pub fn delete_layer(&mut self, id: &str) -> bool {
        if id == DEFAULT_LAYER_ID {
            return false;
        }
        let now = self.now();
        let Some(layer) = take(&mut self.state.layers, id) else {
            return false;
        };
        self.state
            .tombstones
            .record(EntityKind::Layer, &layer.id, now, layer.updated_at);

        let nodes: Vec<EntityId> = self
            .state
            .nodes
            .iter()
            .filter(|n| n.layer_id == id)
            .map(|n| n.id.clone())
            .collect();
        for node_id in &nodes {
            self.remove_node(node_id, now);
        }

        let (dead, live): (Vec<Drawing>, Vec<Drawing>) = std::mem::take(&mut self.state.drawings)
            .into_iter()
            .partition(|d| d.layer_id == id);
        self.state.drawings = live;
        for drawing in dead {
            self.state
                .tombstones
                .record(EntityKind::Drawing, &drawing.id, now, drawing.updated_at);
        }

        let (dead, live): (Vec<TextBox>, Vec<TextBox>) = std::mem::take(&mut self.state.text_boxes)
            .into_iter()
            .partition(|t| t.layer_id == id);
        self.state.text_boxes = live;
        let dead_boxes: HashSet<EntityId> = dead.iter().map(|t| t.id.clone()).collect();
        for text_box in dead {
            self.state
                .tombstones
                .record(EntityKind::TextBox, &text_box.id, now, text_box.updated_at);
        }
        self.forget_selected(ItemKind::TextBox, &dead_boxes);

        let comments: HashSet<EntityId> = self
            .state
            .comments
            .iter()
            .filter(|c| c.layer_id == id)
            .map(|c| c.id.clone())
            .collect();
        self.remove_comments(&comments, now);

        stacking::prune_stacks(&mut self.state, now);
        self.recompute();
        self.changed();
        log::debug!("deleted layer {id} with {} nodes", nodes.len());
        true
    }

    // --- Stacking ---

    pub fn move_item(&mut self, item: &ItemRef, action: ZAction) -> bool {
        let now = self.now();
        let moved = stacking::move_item(&mut self.state, item, action, now);
        if moved {
            self.changed();
        }
        moved
    }

    pub fn create_stack(&mut self, items: &[ItemRef]) -> Option<EntityId> {
        let now = self.now();
        let id = stacking::create_stack(&mut self.state, items, now)?;
        self.changed();
        Some(id)
    }

    pub fn expand_stack(&mut self, id: &str) -> bool {
        let now = self.now();
        let done = stacking::expand_stack(&mut self.state, id, now);
        if done {
            self.changed();
        }
        done
    }

    pub fn collapse_stack(&mut self, id: &str) -> bool {
        let now = self.now();
        let done = stacking::collapse_stack(&mut self.state, id, now);
        if done {
            self.changed();
        }
        done
    }

    pub fn toggle_stack(&mut self, id: &str) -> bool {
        let now = self.now();
        let done = stacking::toggle_stack(&mut self.state, id, now);
        if done {
            self.changed();
        }
        done
    }

    pub fn ungroup_stack(&mut self, id: &str) -> bool {
        let now = self.now();
        let done = stacking::ungroup_stack(&mut self.state, id, now);
        if done {
            self.changed();
        }
        done
    }

    pub fn move_stack(&mut self, id: &str, dx: f64, dy: f64) -> bool {
        let now = self.now();
        let done = stacking::move_stack(&mut self.state, id, Vec2::new(dx, dy), now);
        if done {
            self.changed();
        }
        done
    }

    // --- Selection ---

    pub fn selection(&self) -> &[ItemRef] {
        &self.selection
    }

    /// Replace the selection. Duplicates are dropped, order is kept.
    pub fn select(&mut self, items: impl IntoIterator<Item = ItemRef>) {
        let mut seen = HashSet::new();
        self.selection = items
            .into_iter()
            .filter(|item| seen.insert(item.clone()))
            .collect();
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    fn is_live(&self, item: &ItemRef) -> bool {
        match item.kind {
            ItemKind::Node => self.state.node(&item.id).is_some(),
            ItemKind::TextBox => self.state.text_box(&item.id).is_some(),
            ItemKind::Comment => self.state.comment(&item.id).is_some(),
        }
    }

    // --- History ---

    /// Snapshot the document before a discrete mutation.
    pub fn push_history(&mut self) {
        self.history.push(&self.state);
    }

    /// Snapshot once at the start of a continuous gesture (drag, resize).
    pub fn begin_gesture(&mut self) {
        self.history.begin_gesture(&self.state);
    }

    pub fn commit_gesture(&mut self) {
        self.history.commit_gesture();
    }

    pub fn undo(&mut self) -> bool {
        let restored = self.history.undo(&mut self.state);
        if restored {
            self.after_restore();
        }
        restored
    }

    pub fn redo(&mut self) -> bool {
        let restored = self.history.redo(&mut self.state);
        if restored {
            self.after_restore();
        }
        restored
    }

    fn after_restore(&mut self) {
        self.selection.clear();
        self.state.ensure_default_layer();
        self.recompute();
        self.emit(EngineEvent::HistoryRestored);
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // --- Derived values ---

    pub fn energy_mode(&self) -> EnergyMode {
        self.energy_mode
    }

    pub fn set_energy_mode(&mut self, mode: EnergyMode) {
        if self.energy_mode != mode {
            self.energy_mode = mode;
            self.recompute();
        }
    }

    /// Toggle the monitoring view, which stops finished tasks feeding energy.
    pub fn set_monitoring(&mut self, enabled: bool) {
        self.set_energy_mode(EnergyMode {
            block_done_tasks: enabled,
        });
    }

    /// Effective energy of every live node.
    pub fn effective_energy(&self) -> &EnergyMap {
        &self.energy
    }

    pub fn node_energy(&self, id: &str) -> Option<f64> {
        self.energy.get(id).copied()
    }

    /// Effective progress of every live node, including derived child progress.
    pub fn effective_progress(&self) -> &EnergyMap {
        &self.progress
    }

    // --- Remote ---

    /// Merge a remote document into the local one.
    ///
    /// Stacks left with fewer than two members by the merge are dissolved
    /// here; local history is kept as is.
    pub fn apply_remote(&mut self, remote: &SessionState) {
        let mut merged = merge_session_state(&self.state, remote);
        stacking::prune_stacks(&mut merged, self.now());
        self.state = merged;
        let live: Vec<ItemRef> = self
            .selection
            .iter()
            .filter(|item| self.is_live(item))
            .cloned()
            .collect();
        self.selection = live;
        self.recompute();
        self.emit(EngineEvent::RemoteMerged);
    }

    /// Normalize an untrusted remote payload and merge it.
    pub fn merge_remote_value(&mut self, raw: &Value) {
        let remote = normalize_session_state(raw);
        self.apply_remote(&remote);
    }
}
