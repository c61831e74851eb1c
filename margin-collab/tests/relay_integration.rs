//! End-to-end tests over a real relay and real WebSocket clients.
//!
//! These start an actual server, connect actual clients, and verify the
//! full pipeline: submit → wire → fan-out → remote merge → views.

use margin_collab::client::{ClientEvent, ConnectionState, WireClient};
use margin_collab::element::{Bounds, Color, ElementBody, PageMetrics};
use margin_collab::protocol::{CursorPos, ReplicaInfo};
use margin_collab::relay::{RelayConfig, RelayServer};
use margin_collab::session::{EditorSession, SessionConfig};
use margin_collab::version::SequentialIds;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a relay on a free port, return the port.
async fn start_test_relay() -> u16 {
    let port = free_port().await;
    let config = RelayConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        max_peers_per_room: 10,
        fanout_capacity: 64,
        replay_capacity: 128,
    };
    let relay = RelayServer::new(config);
    tokio::spawn(async move {
        relay.run().await.unwrap();
    });
    // Give the relay time to bind.
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

fn pages() -> PageMetrics {
    PageMetrics::uniform(2, 612.0, 792.0)
}

fn text_body(text: &str) -> ElementBody {
    ElementBody::Text {
        text: text.into(),
        font_size: 12.0,
        color: Color::BLACK,
    }
}

fn bounds() -> Bounds {
    Bounds::new(10.0, 10.0, 50.0, 20.0)
}

/// A session wired to a connected client.
async fn join(
    port: u16,
    room: Uuid,
    replica: u128,
    name: &str,
) -> (EditorSession, WireClient, mpsc::Receiver<ClientEvent>) {
    let info = ReplicaInfo::with_id(Uuid::from_u128(replica), name);
    let mut client = WireClient::new(info, room, format!("ws://127.0.0.1:{port}"));
    let events = client.take_event_rx().unwrap();

    let config = SessionConfig {
        replica_id: Uuid::from_u128(replica),
        replica_name: name.to_string(),
        ..SessionConfig::default()
    };
    let session = EditorSession::new(
        config,
        pages(),
        Box::new(SequentialIds::starting_at(replica << 64)),
        Box::new(client.transport()),
    );

    client.connect().await.unwrap();
    (session, client, events)
}

/// Feed client events into the session until `quiet` elapses with nothing
/// arriving, then pump the remote queue.
async fn sync(
    events: &mut mpsc::Receiver<ClientEvent>,
    session: &mut EditorSession,
    quiet: Duration,
) {
    loop {
        match timeout(quiet, events.recv()).await {
            Ok(Some(ClientEvent::Remote(op))) => session.enqueue_remote(op),
            Ok(Some(ClientEvent::PeerJoined(info))) => session.peer_joined(&info),
            Ok(Some(ClientEvent::PeerLeft(id))) => session.peer_left(&id),
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => break,
        }
    }
    session.pump();
}

#[tokio::test]
async fn test_relay_accepts_connections() {
    let port = start_test_relay().await;
    let url = format!("ws://127.0.0.1:{port}");
    assert!(tokio_tungstenite::connect_async(&url).await.is_ok());
}

#[tokio::test]
async fn test_client_connects() {
    let port = start_test_relay().await;
    let room = Uuid::new_v4();
    let (_session, client, mut events) = join(port, room, 1, "Alice").await;

    assert_eq!(client.connection_state(), ConnectionState::Connected);
    match timeout(Duration::from_secs(2), events.recv()).await {
        Ok(Some(ClientEvent::Connected)) => {}
        other => panic!("expected Connected event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ops_flow_between_clients() {
    let port = start_test_relay().await;
    let room = Uuid::new_v4();

    let (mut alice, _alice_client, mut alice_events) = join(port, room, 1, "Alice").await;
    let (mut bob, _bob_client, mut bob_events) = join(port, room, 2, "Bob").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let id = alice.submit_add(0, bounds(), text_body("hello bob")).unwrap();

    sync(&mut bob_events, &mut bob, Duration::from_millis(300)).await;
    sync(&mut alice_events, &mut alice, Duration::from_millis(100)).await;

    assert_eq!(
        bob.views().by_id(&id).map(|e| e.body.as_text().unwrap().to_string()),
        Some("hello bob".to_string())
    );
    assert_eq!(alice.digest(), bob.digest());
}

#[tokio::test]
async fn test_replay_window_for_late_joiner() {
    let port = start_test_relay().await;
    let room = Uuid::new_v4();

    let (mut alice, _alice_client, _alice_events) = join(port, room, 1, "Alice").await;
    let a = alice.submit_add(0, bounds(), text_body("first")).unwrap();
    let b = alice.submit_add(1, bounds(), text_body("second")).unwrap();

    // Let the relay record the ops before Bob joins.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let (mut bob, _bob_client, mut bob_events) = join(port, room, 2, "Bob").await;
    sync(&mut bob_events, &mut bob, Duration::from_millis(300)).await;

    assert!(bob.views().by_id(&a).is_some(), "late joiner missing replayed op");
    assert!(bob.views().by_id(&b).is_some(), "late joiner missing replayed op");
    assert_eq!(bob.element_count(), 2);
}

#[tokio::test]
async fn test_peer_announcements_reach_presence() {
    let port = start_test_relay().await;
    let room = Uuid::new_v4();

    let (mut alice, _alice_client, mut alice_events) = join(port, room, 1, "Alice").await;
    let (_bob, _bob_client, _bob_events) = join(port, room, 2, "Bob").await;

    sync(&mut alice_events, &mut alice, Duration::from_millis(300)).await;

    let collaborators = alice.presence();
    assert_eq!(collaborators.len(), 1);
    assert_eq!(collaborators[0].name, "Bob");
}

#[tokio::test]
async fn test_cursor_flows_between_clients() {
    let port = start_test_relay().await;
    let room = Uuid::new_v4();

    let (mut alice, _alice_client, _alice_events) = join(port, room, 1, "Alice").await;
    let (mut bob, _bob_client, mut bob_events) = join(port, room, 2, "Bob").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(alice.submit_cursor(CursorPos::new(42.0, 7.0, 1)));

    sync(&mut bob_events, &mut bob, Duration::from_millis(300)).await;

    let collaborators = bob.presence();
    let alice_presence = collaborators
        .iter()
        .find(|c| c.replica_id == Uuid::from_u128(1))
        .expect("alice missing from presence");
    let cursor = alice_presence.cursor.expect("no cursor recorded");
    assert_eq!(cursor.x, 42.0);
    assert_eq!(cursor.page_index, 1);
}

#[tokio::test]
async fn test_offline_edits_replay_on_connect() {
    let port = start_test_relay().await;
    let room = Uuid::new_v4();

    // Alice composes edits before her client ever connects.
    let info = ReplicaInfo::with_id(Uuid::from_u128(1), "Alice");
    let mut alice_client = WireClient::new(info, room, format!("ws://127.0.0.1:{port}"));
    let config = SessionConfig {
        replica_id: Uuid::from_u128(1),
        replica_name: "Alice".into(),
        ..SessionConfig::default()
    };
    let mut alice = EditorSession::new(
        config,
        pages(),
        Box::new(SequentialIds::starting_at(1 << 16)),
        Box::new(alice_client.transport()),
    );

    let id = alice.submit_add(0, bounds(), text_body("offline edit")).unwrap();
    assert_eq!(alice_client.offline_len(), 1);

    // Bob is already online.
    let (mut bob, _bob_client, mut bob_events) = join(port, room, 2, "Bob").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Alice connects; her queued edit replays to the room.
    alice_client.connect().await.unwrap();
    sync(&mut bob_events, &mut bob, Duration::from_millis(300)).await;

    assert_eq!(alice_client.offline_len(), 0);
    assert!(bob.views().by_id(&id).is_some(), "offline edit never arrived");
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let port = start_test_relay().await;
    let room1 = Uuid::new_v4();
    let room2 = Uuid::new_v4();

    let (mut alice, _alice_client, _alice_events) = join(port, room1, 1, "Alice").await;
    let (mut bob, _bob_client, mut bob_events) = join(port, room2, 2, "Bob").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    alice.submit_add(0, bounds(), text_body("room1 only")).unwrap();

    sync(&mut bob_events, &mut bob, Duration::from_millis(300)).await;
    assert_eq!(bob.element_count(), 0, "operation leaked across rooms");
}
