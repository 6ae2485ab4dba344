//! Snapshot-based undo/redo.

use crate::entities::{Drawing, Edge, Layer, Node, StackGroup, TextBox};
use crate::session::SessionState;
use crate::tombstones::Tombstones;
use std::collections::VecDeque;

/// Maximum number of undo states to keep.
pub const MAX_UNDO_HISTORY: usize = 60;

/// A snapshot of document state for undo/redo.
///
/// Comments are not part of history, and neither are their tombstones: a
/// restore keeps the live comment tombstones so a deleted comment stays deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub drawings: Vec<Drawing>,
    pub text_boxes: Vec<TextBox>,
    pub stacks: Vec<StackGroup>,
    pub layers: Vec<Layer>,
    pub tombstones: Tombstones,
}

impl DocumentSnapshot {
    pub fn capture(state: &SessionState) -> Self {
        Self {
            nodes: state.nodes.clone(),
            edges: state.edges.clone(),
            drawings: state.drawings.clone(),
            text_boxes: state.text_boxes.clone(),
            stacks: state.stacks.clone(),
            layers: state.layers.clone(),
            tombstones: state.tombstones.clone(),
        }
    }

    fn restore(self, state: &mut SessionState) {
        state.nodes = self.nodes;
        state.edges = self.edges;
        state.drawings = self.drawings;
        state.text_boxes = self.text_boxes;
        state.stacks = self.stacks;
        state.layers = self.layers;
        let comments = std::mem::take(&mut state.tombstones.comments);
        state.tombstones = self.tombstones;
        state.tombstones.comments = comments;
    }
}

/// Linear undo/redo over whole-document snapshots.
#[derive(Debug, Clone)]
pub struct HistoryManager {
    undo_stack: VecDeque<DocumentSnapshot>,
    redo_stack: Vec<DocumentSnapshot>,
    capacity: usize,
    /// Whether the current gesture already pushed its snapshot.
    gesture_open: bool,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryManager {
    pub fn new() -> Self {
        Self::with_capacity(MAX_UNDO_HISTORY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            capacity: capacity.max(1),
            gesture_open: false,
        }
    }

    /// Push current state to undo stack (call before making changes).
    pub fn push(&mut self, state: &SessionState) {
        self.undo_stack.push_back(DocumentSnapshot::capture(state));
        self.redo_stack.clear();
        while self.undo_stack.len() > self.capacity {
            self.undo_stack.pop_front();
        }
    }

    /// Undo the last change.
    /// Returns true if undo was performed, false if nothing to undo.
    pub fn undo(&mut self, state: &mut SessionState) -> bool {
        let Some(snapshot) = self.undo_stack.pop_back() else {
            return false;
        };
        self.redo_stack.push(DocumentSnapshot::capture(state));
        snapshot.restore(state);
        self.gesture_open = false;
        log::debug!("undo: {} left, {} redoable", self.undo_stack.len(), self.redo_stack.len());
        true
    }

    /// Redo the last undone change.
    /// Returns true if redo was performed, false if nothing to redo.
    pub fn redo(&mut self, state: &mut SessionState) -> bool {
        let Some(snapshot) = self.redo_stack.pop() else {
            return false;
        };
        self.undo_stack.push_back(DocumentSnapshot::capture(state));
        snapshot.restore(state);
        self.gesture_open = false;
        true
    }

    /// Open a gesture, pushing one snapshot for the whole gesture.
    /// Returns true if a snapshot was pushed.
    pub fn begin_gesture(&mut self, state: &SessionState) -> bool {
        if self.gesture_open {
            return false;
        }
        self.push(state);
        self.gesture_open = true;
        true
    }

    /// Close the current gesture; the next one pushes a fresh snapshot.
    pub fn commit_gesture(&mut self) {
        self.gesture_open = false;
    }

    pub fn in_gesture(&self) -> bool {
        self.gesture_open
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{EntityKind, Node};

    fn with_node(state: &mut SessionState, id: &str) {
        state.nodes.push(Node::task(id, 0.0, 0.0).with_id(id));
    }

    #[test]
    fn test_undo_empty_stack() {
        let mut history = HistoryManager::new();
        let mut state = SessionState::new();
        assert!(!history.can_undo());
        assert!(!history.undo(&mut state));
        assert!(!history.can_redo());
        assert!(!history.redo(&mut state));
        assert_eq!(state, SessionState::new());
    }

    #[test]
    fn test_undo_redo_roundtrip() {
        let mut history = HistoryManager::new();
        let mut state = SessionState::new();
        let s0 = state.clone();

        history.push(&state);
        with_node(&mut state, "a");
        let s1 = state.clone();

        assert!(history.undo(&mut state));
        assert_eq!(state, s0);
        assert!(history.redo(&mut state));
        assert_eq!(state, s1);
    }

    #[test]
    fn test_push_clears_redo() {
        let mut history = HistoryManager::new();
        let mut state = SessionState::new();
        history.push(&state);
        with_node(&mut state, "a");
        history.undo(&mut state);
        assert!(history.can_redo());

        history.push(&state);
        with_node(&mut state, "b");
        assert!(!history.can_redo());
    }

    #[test]
    fn test_capacity_discards_oldest() {
        let mut history = HistoryManager::with_capacity(3);
        let mut state = SessionState::new();
        for i in 0..5 {
            history.push(&state);
            with_node(&mut state, &format!("n{i}"));
        }
        assert_eq!(history.undo_len(), 3);
        while history.undo(&mut state) {}
        // The two oldest snapshots are gone, so n0 and n1 remain.
        assert_eq!(state.nodes.len(), 2);
    }

    #[test]
    fn test_default_capacity() {
        let mut history = HistoryManager::new();
        let state = SessionState::new();
        for _ in 0..(MAX_UNDO_HISTORY + 10) {
            history.push(&state);
        }
        assert_eq!(history.undo_len(), MAX_UNDO_HISTORY);
    }

    #[test]
    fn test_gesture_pushes_once() {
        let mut history = HistoryManager::new();
        let mut state = SessionState::new();

        assert!(history.begin_gesture(&state));
        assert!(history.in_gesture());
        with_node(&mut state, "a");
        assert!(!history.begin_gesture(&state));
        with_node(&mut state, "b");
        history.commit_gesture();
        assert!(!history.in_gesture());
        assert_eq!(history.undo_len(), 1);

        assert!(history.begin_gesture(&state));
        history.commit_gesture();
        assert_eq!(history.undo_len(), 2);
    }

    #[test]
    fn test_comments_are_not_restored() {
        let mut history = HistoryManager::new();
        let mut state = SessionState::new();
        history.push(&state);
        state.comments.push(crate::entities::Comment::new(
            crate::entities::CommentTarget::canvas(),
            "hello",
        ));
        history.undo(&mut state);
        assert_eq!(state.comments.len(), 1);
    }

    #[test]
    fn test_comment_tombstones_survive_restore() {
        let mut history = HistoryManager::new();
        let mut state = SessionState::new();
        history.push(&state);
        with_node(&mut state, "a");
        state.tombstones.record(EntityKind::Comment, "c1", 50, 10);

        history.undo(&mut state);
        assert!(state.node("a").is_none());
        assert_eq!(state.tombstones.get(EntityKind::Comment, "c1"), Some(50));

        history.redo(&mut state);
        assert!(state.node("a").is_some());
        assert_eq!(state.tombstones.get(EntityKind::Comment, "c1"), Some(50));
    }
}
