//! End-to-end relay tests
//!
//! These boot the real axum application on an ephemeral port and drive it
//! with the real `SocketClient`, covering the presence-count invariants,
//! message relay semantics, and privileged notification broadcast.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use academy_realtime_service::client::{BackoffConfig, ClientConfig, SocketClient};
use academy_realtime_service::config::{
    ApiConfig, RelayConfig, ServerConfig, Settings, WebSocketConfig,
};
use academy_realtime_service::relay::{ChatMessage, ChatPayload, Notification, NotificationKind, RoomData};
use academy_realtime_service::server::{create_app, AppState};

const ADMIN_KEY: &str = "test-admin-key";

struct TestServer {
    ws_url: String,
    state: AppState,
}

async fn spawn_server() -> TestServer {
    let settings = Settings {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: vec![],
        },
        api: ApiConfig {
            key: Some(ADMIN_KEY.to_string()),
        },
        websocket: WebSocketConfig::default(),
        relay: RelayConfig::default(),
    };

    let state = AppState::new(settings);
    let app = create_app(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        ws_url: format!("ws://{}/ws", addr),
        state,
    }
}

fn test_client(url: &str) -> SocketClient {
    SocketClient::new(ClientConfig {
        url: url.to_string(),
        reconnect: false,
        backoff: BackoffConfig::default(),
    })
}

fn room_data_stream(client: &SocketClient) -> mpsc::UnboundedReceiver<RoomData> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.subscribe_to_room_data(move |data| {
        let _ = tx.send(data);
    });
    rx
}

fn message_stream(client: &SocketClient) -> mpsc::UnboundedReceiver<ChatMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.subscribe_to_messages(move |message| {
        let _ = tx.send(message);
    });
    rx
}

fn notification_stream(client: &SocketClient) -> mpsc::UnboundedReceiver<Notification> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.subscribe_to_notifications(move |notification| {
        let _ = tx.send(notification);
    });
    rx
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Wait for a room_data event for a specific room, skipping events for other
/// rooms that may interleave.
async fn recv_room_data(rx: &mut mpsc::UnboundedReceiver<RoomData>, room: &str) -> RoomData {
    loop {
        let data = recv(rx).await;
        if data.room == room {
            return data;
        }
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

fn chat(room: &str, text: &str, sender_id: &str) -> ChatPayload {
    ChatPayload {
        room: room.to_string(),
        text: text.to_string(),
        sender_id: sender_id.to_string(),
        sender_name: "Test User".to_string(),
        sender_avatar: "https://cdn.example/avatar.png".to_string(),
    }
}

#[tokio::test]
async fn test_global_chat_scenario() {
    let server = spawn_server().await;

    let x = test_client(&server.ws_url);
    let y = test_client(&server.ws_url);
    let mut x_rooms = room_data_stream(&x);
    let mut y_rooms = room_data_stream(&y);
    let mut x_messages = message_stream(&x);
    let mut y_messages = message_stream(&y);

    x.connect().await.unwrap();
    x.join_room("global_chat").await;
    let data = recv_room_data(&mut x_rooms, "global_chat").await;
    assert_eq!(data.online_count, 1);

    y.connect().await.unwrap();
    y.join_room("global_chat").await;

    // Both members observe the updated count
    let data = recv_room_data(&mut x_rooms, "global_chat").await;
    assert_eq!(data.online_count, 2);
    let data = recv_room_data(&mut y_rooms, "global_chat").await;
    assert_eq!(data.online_count, 2);

    // X sends; both X (echo) and Y receive with a server-assigned timestamp
    let before = chrono::Utc::now();
    x.send_message(chat("global_chat", "hi", "u1")).await;

    let echoed = recv(&mut x_messages).await;
    assert_eq!(echoed.text, "hi");
    assert_eq!(echoed.sender_id, "u1");
    assert!(echoed.created_at >= before - chrono::Duration::seconds(1));

    let relayed = recv(&mut y_messages).await;
    assert_eq!(relayed.text, "hi");
    assert_eq!(relayed.room, "global_chat");

    // Y disconnects; X observes the decremented count
    y.disconnect().await;
    let data = recv_room_data(&mut x_rooms, "global_chat").await;
    assert_eq!(data.online_count, 1);
}

#[tokio::test]
async fn test_disconnect_vacates_every_joined_room() {
    let server = spawn_server().await;

    let x = test_client(&server.ws_url);
    let y = test_client(&server.ws_url);
    let mut x_rooms = room_data_stream(&x);

    x.connect().await.unwrap();
    x.join_room("room_a").await;
    recv_room_data(&mut x_rooms, "room_a").await;

    y.connect().await.unwrap();
    y.join_room("room_a").await;
    y.join_room("room_b").await;

    let data = recv_room_data(&mut x_rooms, "room_a").await;
    assert_eq!(data.online_count, 2);
    wait_until(|| server.state.registry.room_count("room_b") == 1).await;

    // No explicit leave_room: closing the transport must clean up both rooms
    y.disconnect().await;

    let data = recv_room_data(&mut x_rooms, "room_a").await;
    assert_eq!(data.online_count, 1);
    wait_until(|| server.state.registry.room_count("room_b") == 0).await;
}

#[tokio::test]
async fn test_messages_stay_inside_their_room() {
    let server = spawn_server().await;

    let x = test_client(&server.ws_url);
    let outsider = test_client(&server.ws_url);
    let mut x_messages = message_stream(&x);
    let mut outsider_messages = message_stream(&outsider);

    x.connect().await.unwrap();
    x.join_room("global_chat").await;
    outsider.connect().await.unwrap();
    outsider.join_room("course_view_7").await;

    wait_until(|| server.state.registry.room_count("global_chat") == 1).await;
    wait_until(|| server.state.registry.room_count("course_view_7") == 1).await;

    x.send_message(chat("global_chat", "members only", "u1")).await;

    let echoed = recv(&mut x_messages).await;
    assert_eq!(echoed.text, "members only");

    // The non-member must see nothing
    sleep(Duration::from_millis(200)).await;
    assert!(outsider_messages.try_recv().is_err());
}

#[tokio::test]
async fn test_rejoin_does_not_inflate_count() {
    let server = spawn_server().await;

    let x = test_client(&server.ws_url);
    let y = test_client(&server.ws_url);
    let mut x_rooms = room_data_stream(&x);
    let mut y_rooms = room_data_stream(&y);

    x.connect().await.unwrap();
    x.join_room("global_chat").await;
    let data = recv_room_data(&mut x_rooms, "global_chat").await;
    assert_eq!(data.online_count, 1);

    // Re-join: the hub resends the current snapshot without incrementing
    x.join_room("global_chat").await;
    let data = recv_room_data(&mut x_rooms, "global_chat").await;
    assert_eq!(data.online_count, 1);

    y.connect().await.unwrap();
    y.join_room("global_chat").await;
    let data = recv_room_data(&mut y_rooms, "global_chat").await;
    assert_eq!(data.online_count, 2);
}

#[tokio::test]
async fn test_leave_unjoined_room_is_noop() {
    let server = spawn_server().await;

    let x = test_client(&server.ws_url);
    let mut x_rooms = room_data_stream(&x);
    let mut x_messages = message_stream(&x);

    x.connect().await.unwrap();
    x.join_room("global_chat").await;
    recv_room_data(&mut x_rooms, "global_chat").await;

    x.leave_room("never_joined").await;

    // The relay must still be healthy and the joined room unaffected
    x.send_message(chat("global_chat", "still here", "u1")).await;
    let message = recv(&mut x_messages).await;
    assert_eq!(message.text, "still here");

    assert_eq!(server.state.registry.room_count("never_joined"), 0);
    assert_eq!(server.state.registry.room_count("global_chat"), 1);
}

#[tokio::test]
async fn test_admin_notification_requires_privilege() {
    let server = spawn_server().await;

    let regular = test_client(&server.ws_url);
    let privileged = test_client(&format!("{}?key={}", server.ws_url, ADMIN_KEY));
    let roomless = test_client(&server.ws_url);

    let mut regular_notifications = notification_stream(&regular);
    let mut roomless_notifications = notification_stream(&roomless);

    regular.connect().await.unwrap();
    privileged.connect().await.unwrap();
    roomless.connect().await.unwrap();
    wait_until(|| server.state.registry.stats().total_connections == 3).await;

    // Unprivileged broadcast is refused
    regular
        .send_admin_notification(Notification::new(
            "Not allowed",
            "should be dropped",
            NotificationKind::Info,
        ))
        .await;
    sleep(Duration::from_millis(200)).await;
    assert!(roomless_notifications.try_recv().is_err());

    // Privileged broadcast reaches every connection, rooms or not
    privileged
        .send_admin_notification(Notification::new(
            "Maintenance",
            "Back in five minutes",
            NotificationKind::Warning,
        ))
        .await;

    let received = recv(&mut regular_notifications).await;
    assert_eq!(received.title, "Maintenance");
    assert_eq!(received.kind, NotificationKind::Warning);

    let received = recv(&mut roomless_notifications).await;
    assert_eq!(received.message, "Back in five minutes");
}

#[tokio::test]
async fn test_client_reconnects_after_transport_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));

    // Minimal handshake-only server: drops the first connection immediately
    // to force the client's reconnect path
    let accepted_clone = accepted.clone();
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let count = accepted_clone.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                drop(ws);
            } else {
                // Keep the second connection open
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        }
    });

    let client = SocketClient::new(ClientConfig {
        url: format!("ws://{}/ws", addr),
        reconnect: true,
        backoff: BackoffConfig {
            initial_delay_ms: 10,
            max_delay_ms: 100,
            multiplier: 2.0,
            jitter_factor: 0.0,
        },
    });
    client.connect().await.unwrap();

    wait_until(|| accepted.load(Ordering::SeqCst) >= 2).await;
    client.disconnect().await;
}
