//! Client side of room collaboration.
//!
//! The manager does no I/O. It queues outgoing protocol messages for the
//! transport to send and applies incoming ones to an [`EngineState`].

use crate::store::EngineState;
use crate::sync::{ClientMessage, ServerMessage, SyncError, SyncEvent};

/// Tracks room membership and the outgoing message queue.
#[derive(Debug, Default)]
pub struct CollaborationManager {
    /// Current room ID (if joined).
    current_room: Option<String>,
    /// Peers in the room, including this one.
    peer_count: usize,
    /// Pending outgoing messages (JSON strings).
    outgoing: Vec<String>,
}

impl CollaborationManager {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Room/Connection Management ---

    /// Get the current room ID.
    pub fn current_room(&self) -> Option<&str> {
        self.current_room.as_deref()
    }

    /// Check if we're in a room.
    pub fn is_in_room(&self) -> bool {
        self.current_room.is_some()
    }

    pub fn peer_count(&self) -> usize {
        self.peer_count
    }

    fn queue(&mut self, msg: &ClientMessage) -> Result<(), SyncError> {
        self.outgoing.push(msg.to_json()?);
        Ok(())
    }

    /// Request to join a room. Queues the join message.
    pub fn join_room(&mut self, room: &str) -> Result<(), SyncError> {
        self.queue(&ClientMessage::Join {
            room: room.to_string(),
        })
    }

    /// Request to leave the current room. Queues the leave message.
    pub fn leave_room(&mut self) -> Result<(), SyncError> {
        if self.current_room.take().is_some() {
            self.peer_count = 0;
            self.queue(&ClientMessage::Leave)?;
        }
        Ok(())
    }

    /// Take pending outgoing messages (drains the queue).
    pub fn take_outgoing(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outgoing)
    }

    /// Check if there are pending outgoing messages.
    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    // --- Sync Broadcast ---

    /// Queue the engine's current document for the room.
    /// Returns false when not in a room.
    pub fn queue_sync(&mut self, engine: &EngineState) -> Result<bool, SyncError> {
        if self.current_room.is_none() {
            return Ok(false);
        }
        self.queue(&ClientMessage::Sync {
            snapshot: engine.state().to_value(),
        })?;
        Ok(true)
    }

    // --- Incoming Message Handling ---

    /// Handle an incoming server message, merging any snapshot it carries.
    ///
    /// After joining, the merged local document is queued back to the room so
    /// that offline edits reach the other peers. Snapshots arriving outside a
    /// room are ignored.
    pub fn handle_message(
        &mut self,
        engine: &mut EngineState,
        json: &str,
    ) -> Result<Option<SyncEvent>, SyncError> {
        let event = match ServerMessage::from_json(json)? {
            ServerMessage::Joined {
                room,
                peer_count,
                snapshot,
            } => {
                self.current_room = Some(room.clone());
                self.peer_count = peer_count;
                if let Some(snapshot) = snapshot {
                    engine.merge_remote_value(&snapshot);
                }
                self.queue_sync(engine)?;
                log::info!("joined room {room} with {peer_count} peers");
                Some(SyncEvent::JoinedRoom { room, peer_count })
            }
            ServerMessage::PeerJoined { peer_id } => {
                self.peer_count += 1;
                Some(SyncEvent::PeerJoined { peer_id })
            }
            ServerMessage::PeerLeft { peer_id } => {
                self.peer_count = self.peer_count.saturating_sub(1);
                Some(SyncEvent::PeerLeft { peer_id })
            }
            ServerMessage::Sync { from, snapshot } => {
                if self.current_room.is_none() {
                    log::debug!("ignoring sync from {from} outside a room");
                    return Ok(None);
                }
                engine.merge_remote_value(&snapshot);
                Some(SyncEvent::SyncReceived { from })
            }
            ServerMessage::Error { message } => {
                log::warn!("relay error: {message}");
                Some(SyncEvent::Error { message })
            }
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entities::{EntityKind, Node};
    use crate::session::SessionState;
    use crate::store::EngineEvent;

    fn engine() -> EngineState {
        EngineState::with_clock(ManualClock::new(1_000))
    }

    fn remote_with_node(id: &str) -> SessionState {
        let mut remote = SessionState::new();
        let mut node = Node::task("remote", 0.0, 0.0).with_id(id);
        node.created_at = 500;
        node.updated_at = 500;
        remote.nodes.push(node);
        remote
    }

    #[test]
    fn test_not_in_room_by_default() {
        let mut manager = CollaborationManager::new();
        assert!(!manager.is_in_room());
        assert!(!manager.queue_sync(&engine()).unwrap());
        manager.leave_room().unwrap();
        assert!(!manager.has_outgoing());
    }

    #[test]
    fn test_join_queues_message() {
        let mut manager = CollaborationManager::new();
        manager.join_room("design").unwrap();
        let out = manager.take_outgoing();
        assert_eq!(out, vec![r#"{"type":"join","room":"design"}"#.to_string()]);
        assert!(!manager.has_outgoing());
    }

    #[test]
    fn test_joined_merges_and_replies_with_snapshot() {
        let mut manager = CollaborationManager::new();
        let mut engine = engine();
        engine.add_node(Node::task("local", 0.0, 0.0).with_id("local"));

        let joined = ServerMessage::Joined {
            room: "design".into(),
            peer_count: 3,
            snapshot: Some(remote_with_node("r1").to_value()),
        };
        let event = manager.handle_message(&mut engine, &joined.to_json().unwrap()).unwrap();

        assert_eq!(event, Some(SyncEvent::JoinedRoom { room: "design".into(), peer_count: 3 }));
        assert_eq!(manager.current_room(), Some("design"));
        assert!(engine.state().node("r1").is_some());
        assert!(engine.state().node("local").is_some());

        let out = manager.take_outgoing();
        assert_eq!(out.len(), 1);
        let ClientMessage::Sync { snapshot } = ClientMessage::from_json(&out[0]).unwrap() else {
            panic!("expected a sync message");
        };
        assert_eq!(SessionState::from_json(&snapshot.to_string()).unwrap(), engine.snapshot());
    }

    #[test]
    fn test_sync_merges_remote_tombstones() {
        let mut manager = CollaborationManager::new();
        let mut engine = engine();
        let id = engine.add_node(Node::task("doomed", 0.0, 0.0));
        let joined = ServerMessage::Joined { room: "r".into(), peer_count: 1, snapshot: None };
        manager.handle_message(&mut engine, &joined.to_json().unwrap()).unwrap();
        engine.poll_events();

        let mut remote = SessionState::new();
        remote.tombstones.record(EntityKind::Node, &id, 2_000, 1_000);
        let sync = ServerMessage::Sync { from: "peer-2".into(), snapshot: remote.to_value() };
        let event = manager.handle_message(&mut engine, &sync.to_json().unwrap()).unwrap();

        assert_eq!(event, Some(SyncEvent::SyncReceived { from: "peer-2".into() }));
        assert!(engine.state().node(&id).is_none());
        assert_eq!(engine.poll_events(), vec![EngineEvent::RemoteMerged]);
    }

    #[test]
    fn test_sync_outside_room_is_ignored() {
        let mut manager = CollaborationManager::new();
        let mut engine = engine();
        let sync = ServerMessage::Sync { from: "p".into(), snapshot: remote_with_node("r1").to_value() };
        let event = manager.handle_message(&mut engine, &sync.to_json().unwrap()).unwrap();
        assert_eq!(event, None);
        assert!(engine.state().nodes.is_empty());
    }

    #[test]
    fn test_peer_count_tracking() {
        let mut manager = CollaborationManager::new();
        let mut engine = engine();
        let joined = ServerMessage::Joined { room: "r".into(), peer_count: 1, snapshot: None };
        manager.handle_message(&mut engine, &joined.to_json().unwrap()).unwrap();
        manager
            .handle_message(&mut engine, r#"{"type":"peer_joined","peer_id":"b"}"#)
            .unwrap();
        assert_eq!(manager.peer_count(), 2);
        manager
            .handle_message(&mut engine, r#"{"type":"peer_left","peer_id":"b"}"#)
            .unwrap();
        assert_eq!(manager.peer_count(), 1);

        manager.take_outgoing();
        manager.leave_room().unwrap();
        assert!(!manager.is_in_room());
        assert_eq!(manager.take_outgoing(), vec![r#"{"type":"leave"}"#.to_string()]);
    }

    #[test]
    fn test_malformed_message_is_an_error() {
        let mut manager = CollaborationManager::new();
        let mut engine = engine();
        let result = manager.handle_message(&mut engine, "<html>");
        assert!(matches!(result, Err(SyncError::Decode(_))));
    }
}
