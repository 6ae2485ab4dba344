use flowboard_core::{
    ClientMessage, CollaborationManager, EngineState, EntityKind, FileStorage, ManualClock, Node,
    ServerMessage, SessionState, Storage, normalize_session_state,
};
use flowboard_server::{AppState, app};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server(state: Arc<AppState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    client
}

async fn send_raw(client: &mut Client, json: String) {
    client.send(Message::text(json)).await.unwrap();
}

async fn send(client: &mut Client, msg: &ClientMessage) {
    send_raw(client, msg.to_json().unwrap()).await;
}

async fn recv_raw(client: &mut Client) -> String {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for the relay")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = msg {
            return text.to_string();
        }
    }
}

async fn recv(client: &mut Client) -> ServerMessage {
    ServerMessage::from_json(&recv_raw(client).await).unwrap()
}

async fn join(client: &mut Client, room: &str) -> ServerMessage {
    send(client, &ClientMessage::Join { room: room.to_string() }).await;
    recv(client).await
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

fn document_with_node(id: &str) -> SessionState {
    let mut state = SessionState::new();
    let mut node = Node::task("shared", 10.0, 10.0).with_id(id);
    node.created_at = 100;
    node.updated_at = 100;
    state.nodes.push(node);
    state
}

#[tokio::test]
async fn test_relay_merges_and_broadcasts() {
    let state = Arc::new(AppState::default());
    let addr = spawn_server(state.clone()).await;

    let mut alice = connect(addr).await;
    let ServerMessage::Joined { peer_count, snapshot, .. } = join(&mut alice, "board").await else {
        panic!("expected joined");
    };
    assert_eq!(peer_count, 1);
    assert!(snapshot.is_none());

    send(&mut alice, &ClientMessage::Sync { snapshot: document_with_node("n1").to_value() }).await;
    wait_for(|| state.room_document("board").is_some_and(|doc| doc.node("n1").is_some())).await;

    let mut bob = connect(addr).await;
    let ServerMessage::Joined { peer_count, snapshot, .. } = join(&mut bob, "board").await else {
        panic!("expected joined");
    };
    assert_eq!(peer_count, 2);
    assert!(normalize_session_state(&snapshot.unwrap()).node("n1").is_some());
    assert!(matches!(recv(&mut alice).await, ServerMessage::PeerJoined { .. }));

    let mut deletion = SessionState::new();
    deletion.tombstones.record(EntityKind::Node, "n1", 500, 100);
    send(&mut bob, &ClientMessage::Sync { snapshot: deletion.to_value() }).await;

    let ServerMessage::Sync { snapshot, .. } = recv(&mut alice).await else {
        panic!("expected sync");
    };
    let merged = normalize_session_state(&snapshot);
    assert!(merged.node("n1").is_none());
    assert_eq!(merged.tombstones.get(EntityKind::Node, "n1"), Some(500));

    bob.close(None).await.unwrap();
    assert!(matches!(recv(&mut alice).await, ServerMessage::PeerLeft { .. }));
}

#[tokio::test]
async fn test_relay_drives_collaboration_manager() {
    let state = Arc::new(AppState::default());
    let addr = spawn_server(state.clone()).await;

    let mut seed = connect(addr).await;
    join(&mut seed, "team").await;
    send(&mut seed, &ClientMessage::Sync { snapshot: document_with_node("remote").to_value() }).await;
    wait_for(|| state.room_document("team").is_some_and(|doc| doc.node("remote").is_some())).await;

    let mut engine = EngineState::with_clock(ManualClock::new(1_000));
    let local = engine.add_node(Node::task("offline edit", 0.0, 0.0));
    let mut manager = CollaborationManager::new();
    let mut client = connect(addr).await;

    manager.join_room("team").unwrap();
    for msg in manager.take_outgoing() {
        send_raw(&mut client, msg).await;
    }
    let reply = recv_raw(&mut client).await;
    manager.handle_message(&mut engine, &reply).unwrap();
    assert!(engine.state().node("remote").is_some());

    // The merged document goes back to the room.
    for msg in manager.take_outgoing() {
        send_raw(&mut client, msg).await;
    }
    wait_for(|| state.room_document("team").is_some_and(|doc| doc.node(&local).is_some())).await;
    assert!(matches!(recv(&mut seed).await, ServerMessage::PeerJoined { .. }));
    let ServerMessage::Sync { snapshot, .. } = recv(&mut seed).await else {
        panic!("expected sync");
    };
    assert!(normalize_session_state(&snapshot).node(&local).is_some());
}

#[tokio::test]
async fn test_relay_rejects_bad_messages() {
    let addr = spawn_server(Arc::new(AppState::default())).await;
    let mut client = connect(addr).await;

    send_raw(&mut client, "not json".to_string()).await;
    assert!(matches!(recv(&mut client).await, ServerMessage::Error { .. }));

    send(&mut client, &ClientMessage::Sync { snapshot: serde_json::json!({}) }).await;
    assert!(matches!(recv(&mut client).await, ServerMessage::Error { .. }));
}

#[tokio::test]
async fn test_relay_persists_rooms() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()).unwrap());
    let state = Arc::new(AppState::new(Some(storage.clone())));
    let addr = spawn_server(state.clone()).await;

    let mut first = connect(addr).await;
    join(&mut first, "kept").await;
    send(&mut first, &ClientMessage::Sync { snapshot: document_with_node("n1").to_value() }).await;
    wait_for(|| state.room_document("kept").is_some_and(|doc| doc.node("n1").is_some())).await;
    first.close(None).await.unwrap();

    wait_for(|| state.room_count() == 0 && dir.path().join("kept.json").exists()).await;
    assert!(storage.exists("kept").await.unwrap());

    let mut second = connect(addr).await;
    let ServerMessage::Joined { snapshot, .. } = join(&mut second, "kept").await else {
        panic!("expected joined");
    };
    assert!(normalize_session_state(&snapshot.unwrap()).node("n1").is_some());
}
