//! Integration tests for the WebSocket relay.
//!
//! These tests start a real relay and connect real clients, verifying
//! that both ports behave over the network as they do in-process.

use sketchroom_collab::client::RelayClient;
use sketchroom_collab::ports::{PersistencePort, StrokeFeed, TransportPort};
use sketchroom_collab::protocol::StrokeEvent;
use sketchroom_collab::server::{RelayConfig, RelayServer};
use sketchroom_collab::{LocalHub, RemoteInsert, StrokeLog};
use sketchroom_core::{NewStroke, Point, RoomId, Stroke, StrokeRecord, Tool};
use tokio::time::{timeout, Duration};

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a relay over `hub` on a free port, return the URL.
async fn start_test_relay(hub: LocalHub) -> String {
    let port = free_port().await;
    let server = RelayServer::new(RelayConfig::for_testing(port), hub);
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    // Give the relay time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    format!("ws://127.0.0.1:{port}")
}

fn pen(user: &str, points: &[(f32, f32)]) -> NewStroke {
    NewStroke {
        user_id: user.into(),
        user_name: user.into(),
        user_color: "#0000ff".into(),
        points: points.iter().map(|&(x, y)| Point::new(x, y)).collect(),
        color: "#ff0000".into(),
        size: 4.0,
        tool: Tool::Pen,
    }
}

async fn next_event(feed: &mut StrokeFeed) -> StrokeEvent {
    timeout(Duration::from_secs(2), feed.recv())
        .await
        .expect("timed out waiting for stroke event")
        .expect("feed closed")
}

#[tokio::test]
async fn test_client_connects() {
    let url = start_test_relay(LocalHub::in_memory()).await;
    assert!(RelayClient::connect(&url).await.is_ok());
}

#[tokio::test]
async fn test_insert_reaches_other_subscriber() {
    let url = start_test_relay(LocalHub::in_memory()).await;
    let room = RoomId::new("R1");
    let alice = RelayClient::connect(&url).await.unwrap();
    let bob = RelayClient::connect(&url).await.unwrap();

    let mut bob_feed = bob.subscribe_strokes(&room).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stored = alice
        .insert_stroke(&room, pen("alice", &[(0.0, 0.0), (10.0, 10.0), (20.0, 5.0)]))
        .await
        .unwrap();

    match next_event(&mut bob_feed).await {
        StrokeEvent::Insert(record) => {
            let stroke = Stroke::try_from(record).unwrap();
            assert_eq!(stroke, stored);
            assert_eq!(stroke.color, "#ff0000");
        }
        other => panic!("expected insert, got {other:?}"),
    }
}

#[tokio::test]
async fn test_load_returns_strokes_in_creation_order() {
    let hub = LocalHub::in_memory();
    let url = start_test_relay(hub.clone()).await;
    let room = RoomId::new("R1");
    let first = hub.insert(&room, pen("u1", &[(0.0, 0.0), (1.0, 1.0)])).unwrap();
    let second = hub.insert(&room, pen("u2", &[(2.0, 2.0), (3.0, 3.0)])).unwrap();

    let client = RelayClient::connect(&url).await.unwrap();
    let loaded = client.load_strokes(&room).await.unwrap();
    assert_eq!(loaded, vec![first, second]);
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_rejected_insert_surfaces_as_error() {
    let url = start_test_relay(LocalHub::in_memory()).await;
    let client = RelayClient::connect(&url).await.unwrap();
    let result = client
        .insert_stroke(&RoomId::new("R1"), pen("u1", &[(1.0, 1.0)]))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_clear_broadcasts_delete_to_room_only() {
    let url = start_test_relay(LocalHub::in_memory()).await;
    let r1 = RoomId::new("R1");
    let r2 = RoomId::new("R2");
    let client = RelayClient::connect(&url).await.unwrap();
    let watcher = RelayClient::connect(&url).await.unwrap();

    let mut feed1 = watcher.subscribe_strokes(&r1).await.unwrap();
    let mut feed2 = watcher.subscribe_strokes(&r2).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.insert_stroke(&r1, pen("u1", &[(0.0, 0.0), (5.0, 5.0)])).await.unwrap();
    assert!(matches!(next_event(&mut feed1).await, StrokeEvent::Insert(_)));

    assert_eq!(client.clear_room(&r1).await.unwrap(), 1);
    assert_eq!(next_event(&mut feed1).await, StrokeEvent::Delete { room_id: r1.clone() });
    assert!(client.load_strokes(&r1).await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(feed2.try_next(), None);
}

#[tokio::test]
async fn test_dropping_last_feed_unsubscribes_on_relay() {
    let hub = LocalHub::in_memory();
    let url = start_test_relay(hub.clone()).await;
    let room = RoomId::new("R1");
    let client = RelayClient::connect(&url).await.unwrap();

    let a = client.subscribe_strokes(&room).await.unwrap();
    let b = client.subscribe_strokes(&room).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    // Both local feeds share one relay subscription.
    assert_eq!(hub.subscriber_count(&room), 1);

    drop(a);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hub.subscriber_count(&room), 1);

    drop(b);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hub.subscriber_count(&room), 0);
    assert_eq!(client.room_count(), 0);
    assert_eq!(hub.room_count(), 0);
}

#[tokio::test]
async fn test_rooms_released_after_relay_disconnect() {
    let hub = LocalHub::in_memory();
    let url = start_test_relay(hub.clone()).await;
    let client = RelayClient::connect(&url).await.unwrap();
    let mut feeds = Vec::new();
    for i in 0..5 {
        let room = RoomId::new(format!("room-{i}"));
        feeds.push(client.subscribe_strokes(&room).await.unwrap());
        feeds.push(client.subscribe_strokes(&room).await.unwrap());
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hub.room_count(), 5);
    assert_eq!(client.room_count(), 5);

    drop(feeds);
    drop(client);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(hub.room_count(), 0);
}

#[tokio::test]
async fn test_json_rows_relayed_and_validated() {
    let hub = LocalHub::in_memory();
    let url = start_test_relay(hub.clone()).await;
    let room = RoomId::new("R1");
    let client = RelayClient::connect(&url).await.unwrap();
    let mut feed = client.subscribe_strokes(&room).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let good = serde_json::json!({
        "id": "row-1", "room_id": "R1", "user_id": "u2", "user_name": "Bo",
        "user_color": "#00aa00", "points": [{"x": 0, "y": 0}, {"x": 10, "y": 10}],
        "color": "#123456", "size": 3, "tool": "marker", "created_at": 7
    });
    let broken = serde_json::json!({
        "id": "row-2", "room_id": "R1", "user_id": "u2",
        "points": [{"x": 0, "y": 0}, {"x": 10, "y": 10}], "color": "#123456", "size": -1
    });
    for row in [good, broken] {
        let record = StrokeRecord::from_json(&row.to_string()).unwrap();
        hub.publish(&room, StrokeEvent::Insert(record));
    }

    let mut log = StrokeLog::new("u1");
    for _ in 0..2 {
        let StrokeEvent::Insert(record) = next_event(&mut feed).await else {
            panic!("expected insert");
        };
        let outcome = log.apply_remote_insert(record);
        assert!(matches!(outcome, RemoteInsert::Appended | RemoteInsert::Rejected(_)));
    }
    assert_eq!(log.len(), 1);
    let stroke = &log.strokes()[0];
    assert_eq!(stroke.id, "row-1");
    assert_eq!(stroke.tool, Tool::Other("marker".into()));
    assert_eq!(stroke.points[1], Point::new(10.0, 10.0));
}
