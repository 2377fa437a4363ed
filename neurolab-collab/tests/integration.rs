//! Integration tests for end-to-end relay behavior.
//!
//! These tests start a real server on an ephemeral port and connect real
//! clients, verifying joins, fan-out, catch-up and disconnect handling.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use neurolab_collab::agent::ReconciliationAgent;
use neurolab_collab::client::RelayClient;
use neurolab_collab::lifecycle::JoinNotice;
use neurolab_collab::protocol::{ClientEvent, LifeState, PeerId, RoomKey, ServerEvent, WireFormat, WireMessage};
use neurolab_collab::server::{RelayServer, ServerConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(200);

/// Start a server on a free port, return it with its URL.
async fn start_test_server(config: ServerConfig) -> (Arc<RelayServer>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = Arc::new(RelayServer::new(config));
    let serving = server.clone();
    tokio::spawn(async move {
        let _ = serving.serve(listener).await;
    });
    (server, format!("ws://127.0.0.1:{port}"))
}

async fn start_default_server() -> (Arc<RelayServer>, String) {
    start_test_server(ServerConfig::default()).await
}

struct TestPeer {
    client: RelayClient,
    events: mpsc::Receiver<ServerEvent>,
    id: PeerId,
}

impl TestPeer {
    async fn connect(url: &str) -> Self {
        Self::connect_with(RelayClient::new(url)).await
    }

    async fn connect_with(mut client: RelayClient) -> Self {
        let mut events = client.take_event_rx().unwrap();
        client.connect().await.unwrap();
        let id = match next_event(&mut events).await {
            ServerEvent::Connected { peer_id } => peer_id,
            other => panic!("expected connected, got {other:?}"),
        };
        assert_eq!(client.peer_id().await, Some(id));
        Self { client, events, id }
    }

    async fn next(&mut self) -> ServerEvent {
        next_event(&mut self.events).await
    }

    /// Discard everything that arrives until the connection goes quiet.
    async fn drain(&mut self) -> Vec<ServerEvent> {
        let mut seen = Vec::new();
        while let Ok(Some(event)) = timeout(QUIET, self.events.recv()).await {
            seen.push(event);
        }
        seen
    }

    async fn expect_silence(&mut self) {
        if let Ok(Some(event)) = timeout(QUIET, self.events.recv()).await {
            panic!("expected silence, got {event:?}");
        }
    }
}

async fn next_event(events: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream ended")
}

/// Joins are not acknowledged, so poll the registry until one lands.
async fn wait_for_member(server: &RelayServer, room: &str, peer: PeerId) {
    let room = RoomKey::new(room);
    for _ in 0..200 {
        if server.registry().contains(&room, peer).await {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("{peer} never joined {room:?}");
}

async fn join(server: &RelayServer, peer: &TestPeer, room: &str) {
    peer.client.join(room).await.unwrap();
    wait_for_member(server, room, peer.id).await;
}

type RawSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn raw_connect(url: &str) -> (RawSocket, PeerId) {
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    match next_raw(&mut ws).await {
        ServerEvent::Connected { peer_id } => (ws, peer_id),
        other => panic!("expected connected, got {other:?}"),
    }
}

async fn next_raw(ws: &mut RawSocket) -> ServerEvent {
    loop {
        let frame = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .unwrap();
        match frame {
            Message::Text(text) => return ServerEvent::from_json(text.as_str()).unwrap(),
            Message::Binary(data) => return ServerEvent::from_binary(&data).unwrap(),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_connected_frame_assigns_distinct_ids() {
    let (_server, url) = start_default_server().await;

    let a = TestPeer::connect(&url).await;
    let b = TestPeer::connect(&url).await;

    assert_ne!(a.id, b.id);
}

#[tokio::test]
async fn test_late_joiner_catches_up_from_existing_member() {
    let (server, url) = start_default_server().await;

    let mut a = TestPeer::connect(&url).await;
    let mut agent_a = ReconciliationAgent::new(a.id, "7");
    join(&server, &a, "7").await;

    // A edits alone; nobody receives it and the server keeps no copy.
    let edit = agent_a.add_layer().unwrap();
    a.client.send(&edit).await.unwrap();
    assert_eq!(agent_a.architecture(), &[2, 4, 4, 4, 1]);

    let mut b = TestPeer::connect(&url).await;
    let mut agent_b = ReconciliationAgent::new(b.id, "7");
    b.client.join("7").await.unwrap();

    // A hears about B and re-announces its state.
    let joined = a.next().await;
    assert_eq!(joined, ServerEvent::PeerJoined { peer_id: b.id });
    let replies = agent_a.apply(&joined);
    a.client.send_all(&replies).await.unwrap();

    // B never asked; the architecture arrives anyway.
    let mut caught_up = false;
    for _ in 0..replies.len() {
        let event = b.next().await;
        if matches!(event, ServerEvent::SyncArchitecture { from, .. } if from == a.id) {
            caught_up = true;
        }
        assert!(agent_b.apply(&event).is_empty());
    }

    assert!(caught_up);
    assert_eq!(agent_b.artifact(), agent_a.artifact());
    assert!(agent_b.leaderboard().contains(&a.id));
}

#[tokio::test]
async fn test_room_keys_normalized_across_clients() {
    let (server, url) = start_default_server().await;

    let (mut a, a_id) = raw_connect(&url).await;
    let (mut b, b_id) = raw_connect(&url).await;

    a.send(Message::text(r#"{"join_room":{"room":" 101 "}}"#)).await.unwrap();
    wait_for_member(&server, "101", a_id).await;
    b.send(Message::text(r#"{"join_room":{"room":101}}"#)).await.unwrap();
    wait_for_member(&server, "101", b_id).await;

    assert_eq!(server.registry().room_count().await, 1);
    assert_eq!(next_raw(&mut a).await, ServerEvent::PeerJoined { peer_id: b_id });

    b.send(Message::text(r#"{"sync_training_start":{"room":"101"}}"#)).await.unwrap();
    assert_eq!(next_raw(&mut a).await, ServerEvent::SyncTrainingStart { from: b_id });
}

#[tokio::test]
async fn test_sync_excludes_sender_and_reaches_each_member_once() {
    let (server, url) = start_default_server().await;

    let mut a = TestPeer::connect(&url).await;
    let mut b = TestPeer::connect(&url).await;
    let mut c = TestPeer::connect(&url).await;
    let mut outsider = TestPeer::connect(&url).await;
    join(&server, &a, "7").await;
    join(&server, &b, "7").await;
    join(&server, &c, "7").await;
    join(&server, &outsider, "8").await;
    a.drain().await;
    b.drain().await;
    c.drain().await;

    a.client.send(&ClientEvent::SyncTrainingStart { room: RoomKey::new("7") }).await.unwrap();

    let expected = ServerEvent::SyncTrainingStart { from: a.id };
    assert_eq!(b.next().await, expected);
    assert_eq!(c.next().await, expected);
    b.expect_silence().await;
    c.expect_silence().await;
    a.expect_silence().await;
    outsider.expect_silence().await;
}

#[tokio::test]
async fn test_score_broadcast_includes_sender() {
    let (server, url) = start_default_server().await;

    let mut a = TestPeer::connect(&url).await;
    let mut b = TestPeer::connect(&url).await;
    join(&server, &a, "7").await;
    join(&server, &b, "7").await;
    a.drain().await;

    let mut agent_a = ReconciliationAgent::new(a.id, "7");
    a.client.send(&agent_a.report_score(0.25)).await.unwrap();

    let expected = ServerEvent::BroadcastScore { peer_id: a.id, score: 0.25 };
    assert_eq!(a.next().await, expected);
    assert_eq!(b.next().await, expected);
}

#[tokio::test]
async fn test_disconnect_notifies_and_cleans_registry() {
    let (server, url) = start_default_server().await;

    let mut a = TestPeer::connect(&url).await;
    let mut b = TestPeer::connect(&url).await;
    join(&server, &a, "7").await;
    join(&server, &b, "7").await;
    a.drain().await;

    let mut agent_a = ReconciliationAgent::new(a.id, "7");
    agent_a.apply(&ServerEvent::BroadcastScore { peer_id: b.id, score: 0.4 });

    b.client.close().await.unwrap();

    let left = a.next().await;
    assert_eq!(left, ServerEvent::PeerLeft { peer_id: b.id });
    agent_a.apply(&left);
    assert!(!agent_a.leaderboard().contains(&b.id));

    assert!(server.registry().rooms_of(b.id).await.is_empty());
    assert_eq!(server.registry().member_ids(&RoomKey::new("7"), None).await, vec![a.id]);

    // The last member leaving removes the room.
    a.client.close().await.unwrap();
    for _ in 0..200 {
        if server.registry().room_count().await == 0 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.registry().room_count().await, 0);
    assert!(timeout(WAIT, b.events.recv()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_chat_is_stamped_and_echoed() {
    let (server, url) = start_default_server().await;

    let mut a = TestPeer::connect(&url).await;
    let mut b = TestPeer::connect(&url).await;
    join(&server, &a, "7").await;
    join(&server, &b, "7").await;
    a.drain().await;

    let a_id = a.id;
    let agent_a = ReconciliationAgent::new(a_id, "7");
    a.client.send(&agent_a.say("gl hf").unwrap()).await.unwrap();

    for peer in [&mut a, &mut b] {
        match peer.next().await {
            ServerEvent::ReceiveMessage { from, text, timestamp } => {
                assert_eq!(from, a_id);
                assert_eq!(text, "gl hf");
                assert_eq!(timestamp.len(), 8);
                assert_eq!(timestamp.as_bytes()[2], b':');
                assert_eq!(timestamp.as_bytes()[5], b':');
            }
            other => panic!("expected chat, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_targeted_attack_resolves_on_victim() {
    let (server, url) = start_default_server().await;

    let mut a = TestPeer::connect(&url).await;
    let mut b = TestPeer::connect(&url).await;
    join(&server, &a, "arena").await;
    join(&server, &b, "arena").await;
    a.drain().await;

    let mut agent_a = ReconciliationAgent::new(a.id, "arena");
    let mut agent_b = ReconciliationAgent::new(b.id, "arena");

    a.client.send(&agent_a.attack(70, Some(b.id)).unwrap()).await.unwrap();

    let hit = b.next().await;
    assert_eq!(hit, ServerEvent::ReceiveAttack { from: a.id, damage: 70, target: Some(b.id) });
    let replies = agent_b.apply(&hit);
    assert_eq!(agent_b.combat().shield(), 0);
    assert_eq!(agent_b.combat().health(), 80);
    b.client.send_all(&replies).await.unwrap();

    // The victim publishes its own status; A only records it.
    let status = a.next().await;
    agent_a.apply(&status);
    let standing = agent_a.leaderboard().get(&b.id).unwrap();
    let reported = standing.status.as_ref().unwrap();
    assert_eq!(reported.health, 80);
    assert_eq!(reported.state, LifeState::Alive);
    assert_eq!(agent_a.combat().health(), 100);
}

#[tokio::test]
async fn test_malformed_frames_do_not_end_session() {
    let (server, url) = start_default_server().await;

    let (mut a, a_id) = raw_connect(&url).await;
    a.send(Message::text("definitely not json")).await.unwrap();
    a.send(Message::text(r#"{"launch_rockets":{"room":"7"}}"#)).await.unwrap();
    a.send(Message::binary(vec![0xff, 0x00, 0x13])).await.unwrap();
    a.send(Message::text(r#"{"join_room":{"room":"7"}}"#)).await.unwrap();

    wait_for_member(&server, "7", a_id).await;
    let stats = server.stats().await;
    assert_eq!(stats.malformed_frames, 3);
    assert_eq!(stats.active_connections, 1);
}

#[tokio::test]
async fn test_relay_without_membership_and_to_empty_room() {
    let (server, url) = start_default_server().await;

    let mut a = TestPeer::connect(&url).await;
    let mut b = TestPeer::connect(&url).await;
    join(&server, &b, "7").await;

    // Nobody in "ghost": silently dropped.
    a.client.send(&ClientEvent::SyncTrainingStart { room: RoomKey::new("ghost") }).await.unwrap();
    // A never joined "7" but may still address it.
    a.client.send(&ClientEvent::SyncTrainingStart { room: RoomKey::new("7") }).await.unwrap();

    assert_eq!(b.next().await, ServerEvent::SyncTrainingStart { from: a.id });
    a.expect_silence().await;
    assert_eq!(server.registry().room_count().await, 1);
}

#[tokio::test]
async fn test_binary_and_json_clients_interoperate() {
    let (server, url) = start_default_server().await;

    let mut a = TestPeer::connect_with(RelayClient::new(&url).with_format(WireFormat::Binary)).await;
    let mut b = TestPeer::connect(&url).await;
    join(&server, &a, "7").await;
    join(&server, &b, "7").await;

    // A's notification travels back in binary.
    assert_eq!(a.next().await, ServerEvent::PeerJoined { peer_id: b.id });

    let architecture = vec![3, 6, 2];
    a.client
        .send(&ClientEvent::SyncArchitecture { room: RoomKey::new("7"), architecture: architecture.clone() })
        .await
        .unwrap();
    assert_eq!(b.next().await, ServerEvent::SyncArchitecture { from: a.id, architecture });
}

#[tokio::test]
async fn test_join_notice_everyone_welcomes_joiner() {
    let config = ServerConfig { join_notice: JoinNotice::Everyone, ..ServerConfig::default() };
    let (server, url) = start_test_server(config).await;

    let mut a = TestPeer::connect(&url).await;
    join(&server, &a, "7").await;

    let welcome = a.next().await;
    assert_eq!(welcome, ServerEvent::PeerJoined { peer_id: a.id });

    // The joiner's agent ignores its own arrival.
    let mut agent_a = ReconciliationAgent::new(a.id, "7");
    assert!(agent_a.apply(&welcome).is_empty());
}

#[tokio::test]
async fn test_refresh_request_on_join() {
    let config = ServerConfig { request_state_refresh: true, ..ServerConfig::default() };
    let (server, url) = start_test_server(config).await;

    let mut a = TestPeer::connect(&url).await;
    let mut b = TestPeer::connect(&url).await;
    join(&server, &a, "7").await;
    join(&server, &b, "7").await;

    assert_eq!(a.next().await, ServerEvent::PeerJoined { peer_id: b.id });
    assert_eq!(a.next().await, ServerEvent::RequestStateRefresh { requested_by: b.id });
    b.expect_silence().await;
}

#[tokio::test]
async fn test_server_stats_track_connections() {
    let (server, url) = start_default_server().await;

    let a = TestPeer::connect(&url).await;
    let mut b = TestPeer::connect(&url).await;
    join(&server, &a, "7").await;
    join(&server, &b, "8").await;

    let stats = server.stats().await;
    assert_eq!(stats.total_connections, 2);
    assert_eq!(stats.active_connections, 2);
    assert_eq!(stats.active_rooms, 2);
    assert!(stats.total_frames >= 2);

    b.client.close().await.unwrap();
    assert!(timeout(WAIT, b.events.recv()).await.unwrap().is_none());
    for _ in 0..200 {
        if server.stats().await.active_connections == 1 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    let stats = server.stats().await;
    assert_eq!(stats.active_connections, 1);
    assert_eq!(stats.active_rooms, 1);
}
