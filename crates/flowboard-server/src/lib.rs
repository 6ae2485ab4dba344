//! Flowboard WebSocket Relay Server
//!
//! Keeps one merged session document per room. Every `sync` a peer sends is
//! normalized and merged into the room document, and the merged result is
//! broadcast to the other peers. Peers joining a room receive its document.
//!
//! ## Protocol
//!
//! Messages are JSON with the following format:
//! ```json
//! { "type": "join", "room": "room-id" }
//! { "type": "sync", "snapshot": { "nodes": [], "edges": [], "tombstones": {} } }
//! { "type": "leave" }
//! ```

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use dashmap::DashMap;
use flowboard_core::{
    ClientMessage, FileStorage, ServerMessage, SessionState, Storage, StorageError,
    merge_session_state, normalize_session_state,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::{collections::HashSet, net::SocketAddr, path::PathBuf, sync::Arc};
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;
const DEFAULT_ADDR: &str = "0.0.0.0:3030";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid FLOWBOARD_ADDR {0:?}: {1}")]
    InvalidAddr(String, std::net::AddrParseError),
}

/// Server configuration, read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Listen address (`FLOWBOARD_ADDR`, default `0.0.0.0:3030`).
    pub addr: SocketAddr,
    /// Where room documents are persisted (`FLOWBOARD_DATA_DIR`). Rooms are
    /// memory-only when unset.
    pub data_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(
            std::env::var("FLOWBOARD_ADDR").ok(),
            std::env::var("FLOWBOARD_DATA_DIR").ok(),
        )
    }

    pub fn from_vars(addr: Option<String>, data_dir: Option<String>) -> Result<Self, ConfigError> {
        let addr = addr.unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr = addr
            .parse()
            .map_err(|e| ConfigError::InvalidAddr(addr.clone(), e))?;
        let data_dir = data_dir.filter(|dir| !dir.is_empty()).map(PathBuf::from);
        Ok(Self { addr, data_dir })
    }

    /// Open the configured room storage, if any.
    pub fn storage(&self) -> Result<Option<Arc<dyn Storage>>, StorageError> {
        match &self.data_dir {
            Some(dir) => Ok(Some(Arc::new(FileStorage::new(dir.clone())?))),
            None => Ok(None),
        }
    }
}

/// Room state
struct Room {
    /// Broadcast channel for this room
    tx: broadcast::Sender<(String, ServerMessage)>,
    /// Connected peer IDs
    peers: HashSet<String>,
    /// Merged document of everything synced into the room
    document: SessionState,
    /// Held while the room is being saved
    persist_lock: Arc<Mutex<()>>,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            peers: HashSet::new(),
            document: SessionState::new(),
            persist_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// What a peer gets back from joining a room.
pub struct Joined {
    pub rx: broadcast::Receiver<(String, ServerMessage)>,
    pub peer_count: usize,
    /// The room document, unless the room is still empty.
    pub snapshot: Option<Value>,
}

/// Shared application state
pub struct AppState {
    /// Active rooms
    rooms: DashMap<String, Room>,
    storage: Option<Arc<dyn Storage>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(None)
    }
}

impl AppState {
    pub fn new(storage: Option<Arc<dyn Storage>>) -> Self {
        Self {
            rooms: DashMap::new(),
            storage,
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn peer_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |room| room.peers.len())
    }

    /// Current merged document of a live room.
    pub fn room_document(&self, room_id: &str) -> Option<SessionState> {
        self.rooms.get(room_id).map(|room| room.document.clone())
    }

    async fn load_persisted(&self, room_id: &str) -> Option<SessionState> {
        let storage = self.storage.as_ref()?;
        match storage.load(room_id).await {
            Ok(document) => Some(document),
            Err(StorageError::NotFound(_)) => None,
            Err(e) => {
                warn!("Failed to load room {}: {}", room_id, e);
                None
            }
        }
    }

    /// Add peer to room, creating the room (from storage if persisted).
    pub async fn join_room(&self, room_id: &str, peer_id: &str) -> Joined {
        let persisted = if self.rooms.contains_key(room_id) {
            None
        } else {
            self.load_persisted(room_id).await
        };

        let mut room = self.rooms.entry(room_id.to_string()).or_insert_with(Room::new);
        if let Some(persisted) = persisted {
            room.document = merge_session_state(&room.document, &persisted);
        }
        room.peers.insert(peer_id.to_string());
        let snapshot = (room.document != SessionState::new()).then(|| room.document.to_value());
        Joined {
            rx: room.tx.subscribe(),
            peer_count: room.peers.len(),
            snapshot,
        }
    }

    /// Remove peer from room. The last peer out persists and drops the room.
    ///
    /// The room stays in memory until its document is saved, so a peer that
    /// joins meanwhile gets the live document instead of a stale file. It is
    /// only dropped if nobody joined and nothing changed during the save.
    pub async fn leave_room(&self, room_id: &str, peer_id: &str) {
        let lock = {
            let Some(mut room) = self.rooms.get_mut(room_id) else {
                return;
            };
            room.peers.remove(peer_id);
            if !room.peers.is_empty() {
                return;
            }
            room.persist_lock.clone()
        };
        let _saving = lock.lock().await;

        let Some(document) = self
            .rooms
            .get(room_id)
            .filter(|room| room.peers.is_empty())
            .map(|room| room.document.clone())
        else {
            return;
        };
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.save(room_id, &document).await {
                warn!("Failed to persist room {}: {}", room_id, e);
            }
        }
        let closed = self
            .rooms
            .remove_if(room_id, |_, room| room.peers.is_empty() && room.document == document);
        if closed.is_some() {
            debug!("Room {} is empty, closing it", room_id);
        }
    }

    /// Merge a peer's snapshot into the room. Returns the merged document.
    pub fn merge_sync(&self, room_id: &str, raw: &Value) -> Option<Value> {
        let mut room = self.rooms.get_mut(room_id)?;
        let remote = normalize_session_state(raw);
        room.document = merge_session_state(&room.document, &remote);
        Some(room.document.to_value())
    }

    /// Broadcast message to room
    pub fn broadcast(&self, room_id: &str, from: &str, msg: ServerMessage) {
        if let Some(room) = self.rooms.get(room_id) {
            let _ = room.tx.send((from.to_string(), msg));
        }
    }
}

/// Build the router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Index page
async fn index() -> &'static str {
    "Flowboard Relay Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Send one message. Returns false once the socket is gone.
async fn send_message(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    match msg.to_json() {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode message: {}", e);
            true
        }
    }
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let peer_id = Uuid::new_v4().to_string();
    info!("New connection: {}", peer_id);

    let (mut sender, mut receiver) = socket.split();
    let mut current_room: Option<String> = None;
    let mut room_rx: Option<broadcast::Receiver<(String, ServerMessage)>> = None;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", peer_id, e);
                        break;
                    }
                };

                match ClientMessage::from_json(&text) {
                    Ok(ClientMessage::Join { room }) => {
                        if let Some(old_room) = current_room.take() {
                            room_rx = None;
                            state.broadcast(&old_room, &peer_id, ServerMessage::PeerLeft { peer_id: peer_id.clone() });
                            state.leave_room(&old_room, &peer_id).await;
                        }

                        let joined = state.join_room(&room, &peer_id).await;
                        room_rx = Some(joined.rx);
                        current_room = Some(room.clone());

                        let reply = ServerMessage::Joined {
                            room: room.clone(),
                            peer_count: joined.peer_count,
                            snapshot: joined.snapshot,
                        };
                        if !send_message(&mut sender, &reply).await {
                            break;
                        }
                        state.broadcast(&room, &peer_id, ServerMessage::PeerJoined { peer_id: peer_id.clone() });
                        info!("Peer {} joined room {}", peer_id, room);
                    }
                    Ok(ClientMessage::Leave) => {
                        if let Some(room) = current_room.take() {
                            room_rx = None;
                            state.broadcast(&room, &peer_id, ServerMessage::PeerLeft { peer_id: peer_id.clone() });
                            state.leave_room(&room, &peer_id).await;
                            info!("Peer {} left room {}", peer_id, room);
                        }
                    }
                    Ok(ClientMessage::Sync { snapshot }) => {
                        let Some(room) = &current_room else {
                            let err = ServerMessage::Error { message: "Join a room before syncing".to_string() };
                            if !send_message(&mut sender, &err).await {
                                break;
                            }
                            continue;
                        };
                        if let Some(merged) = state.merge_sync(room, &snapshot) {
                            state.broadcast(room, &peer_id, ServerMessage::Sync { from: peer_id.clone(), snapshot: merged });
                        }
                    }
                    Err(e) => {
                        warn!("Invalid message from {}: {}", peer_id, e);
                        let err = ServerMessage::Error { message: format!("Invalid message: {}", e) };
                        if !send_message(&mut sender, &err).await {
                            break;
                        }
                    }
                }
            }

            msg = async {
                match &mut room_rx {
                    Some(rx) => rx.recv().await.ok(),
                    None => std::future::pending::<Option<(String, ServerMessage)>>().await,
                }
            } => {
                if let Some((from, server_msg)) = msg {
                    // Don't echo back to sender
                    if from != peer_id && !send_message(&mut sender, &server_msg).await {
                        break;
                    }
                }
            }
        }
    }

    if let Some(room) = current_room {
        state.broadcast(&room, &peer_id, ServerMessage::PeerLeft { peer_id: peer_id.clone() });
        state.leave_room(&room, &peer_id).await;
    }
    info!("Connection closed: {}", peer_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowboard_core::storage::BoxFuture;
    use flowboard_core::{EntityKind, MemoryStorage, Node, StorageResult};
    use tokio::sync::Notify;

    /// Memory storage whose saves wait for the test to release them.
    #[derive(Default)]
    struct GatedStorage {
        inner: MemoryStorage,
        started: Notify,
        release: Notify,
    }

    impl Storage for GatedStorage {
        fn save(&self, id: &str, document: &SessionState) -> BoxFuture<'_, StorageResult<()>> {
            let id = id.to_string();
            let document = document.clone();
            Box::pin(async move {
                self.started.notify_one();
                self.release.notified().await;
                self.inner.save(&id, &document).await
            })
        }

        fn load(&self, id: &str) -> BoxFuture<'_, StorageResult<SessionState>> {
            self.inner.load(id)
        }

        fn delete(&self, id: &str) -> BoxFuture<'_, StorageResult<()>> {
            self.inner.delete(id)
        }

        fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
            self.inner.list()
        }

        fn exists(&self, id: &str) -> BoxFuture<'_, StorageResult<bool>> {
            self.inner.exists(id)
        }
    }

    fn document_with(id: &str, updated_at: i64) -> SessionState {
        let mut state = SessionState::new();
        let mut node = Node::task(id, 0.0, 0.0).with_id(id);
        node.created_at = updated_at;
        node.updated_at = updated_at;
        state.nodes.push(node);
        state
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_vars(None, None).unwrap();
        assert_eq!(config.addr, DEFAULT_ADDR.parse::<SocketAddr>().unwrap());
        assert_eq!(config.data_dir, None);

        let config = Config::from_vars(Some("127.0.0.1:9000".into()), Some("/tmp/rooms".into())).unwrap();
        assert_eq!(config.addr.port(), 9000);
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/rooms")));

        assert!(Config::from_vars(None, Some(String::new())).unwrap().data_dir.is_none());
        assert!(matches!(
            Config::from_vars(Some("nope".into()), None),
            Err(ConfigError::InvalidAddr(..))
        ));
    }

    #[tokio::test]
    async fn test_join_and_leave() {
        let state = AppState::default();
        let joined = state.join_room("r", "a").await;
        assert_eq!(joined.peer_count, 1);
        assert!(joined.snapshot.is_none());
        assert_eq!(state.join_room("r", "b").await.peer_count, 2);

        state.leave_room("r", "a").await;
        assert_eq!(state.peer_count("r"), 1);
        state.leave_room("r", "b").await;
        assert_eq!(state.room_count(), 0);
    }

    #[tokio::test]
    async fn test_sync_merges_into_room() {
        let state = AppState::default();
        state.join_room("r", "a").await;

        let first = document_with("n1", 10);
        state.merge_sync("r", &first.to_value()).unwrap();
        let mut second = document_with("n2", 20);
        second.tombstones.record(EntityKind::Node, "n1", 30, 10);
        let merged = state.merge_sync("r", &second.to_value()).unwrap();

        let merged = normalize_session_state(&merged);
        assert!(merged.node("n1").is_none());
        assert!(merged.node("n2").is_some());
        assert_eq!(state.room_document("r"), Some(merged));

        let late = state.join_room("r", "b").await;
        assert!(late.snapshot.is_some());
    }

    #[tokio::test]
    async fn test_sync_to_unknown_room_is_ignored() {
        let state = AppState::default();
        assert!(state.merge_sync("missing", &serde_json::json!({})).is_none());
        assert_eq!(state.room_count(), 0);
    }

    #[tokio::test]
    async fn test_room_persists_when_last_peer_leaves() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let state = AppState::new(Some(storage.clone()));
        state.join_room("r", "a").await;
        state.merge_sync("r", &document_with("n1", 10).to_value());
        state.leave_room("r", "a").await;

        assert!(storage.exists("r").await.unwrap());
        let rejoined = state.join_room("r", "b").await;
        let snapshot = normalize_session_state(&rejoined.snapshot.unwrap());
        assert!(snapshot.node("n1").is_some());
    }

    #[tokio::test]
    async fn test_join_during_save_keeps_live_room() {
        let storage = Arc::new(GatedStorage::default());
        let state = Arc::new(AppState::new(Some(storage.clone())));
        state.join_room("r", "a").await;
        state.merge_sync("r", &document_with("n1", 10).to_value());

        let leaving = tokio::spawn({
            let state = state.clone();
            async move { state.leave_room("r", "a").await }
        });
        storage.started.notified().await;

        let joined = state.join_room("r", "b").await;
        assert!(normalize_session_state(&joined.snapshot.unwrap()).node("n1").is_some());
        state.merge_sync("r", &document_with("n2", 20).to_value());
        storage.release.notify_one();
        leaving.await.unwrap();

        assert_eq!(state.room_count(), 1);
        assert_eq!(state.peer_count("r"), 1);
        let saved = storage.inner.load("r").await.unwrap();
        assert!(saved.node("n2").is_none());

        storage.release.notify_one();
        state.leave_room("r", "b").await;
        assert_eq!(state.room_count(), 0);
        assert!(storage.inner.load("r").await.unwrap().node("n2").is_some());
    }
}
