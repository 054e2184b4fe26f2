use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async, tungstenite, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

use crate::relay::{ChatMessage, ChatPayload, Notification, RoomData};
use crate::websocket::{ClientMessage, ServerMessage};

use super::backoff::{BackoffConfig, ExponentialBackoff};
use super::subscribers::{SubscriberSet, SubscriptionId};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Time allowed for the pump to close the socket during `disconnect`
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hub endpoint, e.g. `ws://127.0.0.1:8081/ws`
    pub url: String,
    /// Reconnect automatically when an established connection drops
    pub reconnect: bool,
    pub backoff: BackoffConfig,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8081/ws".to_string(),
            reconnect: true,
            backoff: BackoffConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket transport error: {0}")]
    Transport(#[from] tungstenite::Error),
}

struct ActiveConnection {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    pump: JoinHandle<()>,
}

/// Owns at most one WebSocket connection to the relay hub and fans inbound
/// events out to locally registered subscribers.
///
/// Outbound operations are fire-and-forget: they do not wait for the hub and
/// are dropped (with a log line) when no connection exists. The UI renders
/// chat solely from the relayed echo; there is no optimistic local copy.
pub struct SocketClient {
    config: ClientConfig,
    subscribers: Arc<SubscriberSet>,
    inner: Mutex<Option<ActiveConnection>>,
}

impl SocketClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            subscribers: Arc::new(SubscriberSet::new()),
            inner: Mutex::new(None),
        }
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self::new(ClientConfig::new(url))
    }

    /// Establish the connection. Idempotent: if a live connection exists this
    /// returns immediately. The initial handshake failure is surfaced to the
    /// caller; later drops are handled by the reconnect loop.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut guard = self.inner.lock().await;
        if let Some(conn) = guard.as_ref() {
            if !conn.pump.is_finished() {
                return Ok(());
            }
        }

        let (stream, _) = connect_async(self.config.url.as_str()).await?;
        tracing::info!(url = %self.config.url, "Connected to relay hub");

        let (outbound, commands) = mpsc::unbounded_channel();
        let pump = tokio::spawn(run_pump(
            stream,
            commands,
            self.config.clone(),
            self.subscribers.clone(),
        ));
        *guard = Some(ActiveConnection { outbound, pump });

        Ok(())
    }

    /// Tear down the transport and clear local subscribers so a subsequent
    /// `connect` starts fresh.
    pub async fn disconnect(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(mut conn) = guard.take() {
            // Closing the command channel tells the pump to close the socket
            drop(conn.outbound);
            if tokio::time::timeout(DISCONNECT_GRACE, &mut conn.pump)
                .await
                .is_err()
            {
                conn.pump.abort();
            }
            tracing::info!("Disconnected from relay hub");
        }
        self.subscribers.clear();
    }

    pub async fn join_room(&self, room: impl Into<String>) {
        self.send(ClientMessage::JoinRoom(room.into())).await;
    }

    pub async fn leave_room(&self, room: impl Into<String>) {
        self.send(ClientMessage::LeaveRoom(room.into())).await;
    }

    pub async fn send_message(&self, payload: ChatPayload) {
        self.send(ClientMessage::SendMessage(payload)).await;
    }

    /// Raise a platform-wide notification. The hub honors this only when the
    /// connection presented the admin key at upgrade time.
    pub async fn send_admin_notification(&self, notification: Notification) {
        self.send(ClientMessage::AdminNotification(notification))
            .await;
    }

    pub fn subscribe_to_messages(
        &self,
        callback: impl Fn(ChatMessage) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.subscribers.add_message_subscriber(callback)
    }

    pub fn subscribe_to_room_data(
        &self,
        callback: impl Fn(RoomData) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.subscribers.add_room_data_subscriber(callback)
    }

    pub fn subscribe_to_notifications(
        &self,
        callback: impl Fn(Notification) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.subscribers.add_notification_subscriber(callback)
    }

    /// Remove a previously registered callback
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }

    async fn send(&self, message: ClientMessage) {
        let guard = self.inner.lock().await;
        match guard.as_ref() {
            Some(conn) => {
                if conn.outbound.send(message).is_err() {
                    tracing::warn!("Connection task is gone; dropping outbound message");
                }
            }
            None => {
                tracing::debug!("Not connected; dropping outbound message");
            }
        }
    }
}

enum PumpExit {
    /// The client closed the connection (command channel dropped)
    ClientClosed,
    /// The transport dropped or the server closed the connection
    ConnectionLost,
}

/// Single task owning the socket: serializes outbound commands, dispatches
/// inbound frames to subscribers (one at a time, in arrival order), and
/// reconnects with backoff when an established connection drops.
async fn run_pump(
    stream: WsStream,
    mut commands: mpsc::UnboundedReceiver<ClientMessage>,
    config: ClientConfig,
    subscribers: Arc<SubscriberSet>,
) {
    let mut backoff = ExponentialBackoff::with_config(config.backoff.clone());
    let mut stream = stream;

    loop {
        match pump(stream, &mut commands, &subscribers).await {
            PumpExit::ClientClosed => return,
            PumpExit::ConnectionLost => {}
        }

        if !config.reconnect {
            tracing::warn!("Connection lost and reconnect is disabled");
            return;
        }

        stream = loop {
            if commands.is_closed() {
                // Client disconnected while we were down; stop retrying
                return;
            }

            let delay = backoff.next_delay();
            tracing::info!(
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to relay hub"
            );
            tokio::time::sleep(delay).await;

            match connect_async(config.url.as_str()).await {
                Ok((stream, _)) => {
                    backoff.reset();
                    tracing::info!(url = %config.url, "Reconnected to relay hub");
                    break stream;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Reconnect attempt failed");
                }
            }
        };
    }
}

async fn pump(
    stream: WsStream,
    commands: &mut mpsc::UnboundedReceiver<ClientMessage>,
    subscribers: &SubscriberSet,
) -> PumpExit {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(t) => t,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize outbound message");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        return PumpExit::ConnectionLost;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return PumpExit::ClientClosed;
                }
            },
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(message) => {
                            if handle_server_frame(message, &mut sink, subscribers)
                                .await
                                .is_err()
                            {
                                return PumpExit::ConnectionLost;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to parse server frame");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => return PumpExit::ConnectionLost,
                Some(Ok(_)) => {
                    // Binary and control frames carry no relay events
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    return PumpExit::ConnectionLost;
                }
            }
        }
    }
}

async fn handle_server_frame(
    message: ServerMessage,
    sink: &mut WsSink,
    subscribers: &SubscriberSet,
) -> Result<(), tungstenite::Error> {
    match message {
        ServerMessage::ReceiveMessage(message) => {
            subscribers.dispatch_message(message);
        }
        ServerMessage::RoomData(data) => {
            subscribers.dispatch_room_data(data);
        }
        ServerMessage::Notification(notification) => {
            subscribers.dispatch_notification(notification);
        }
        ServerMessage::Heartbeat => {
            // Answer so the hub's stale sweep sees us as alive
            if let Ok(text) = serde_json::to_string(&ClientMessage::Ping) {
                sink.send(Message::Text(text.into())).await?;
            }
        }
        ServerMessage::Pong => {}
        ServerMessage::Shutdown {
            reason,
            reconnect_after_seconds,
        } => {
            tracing::info!(
                reason = %reason,
                reconnect_after_seconds = ?reconnect_after_seconds,
                "Hub is shutting down"
            );
        }
        ServerMessage::Error { code, message } => {
            tracing::warn!(code = %code, message = %message, "Hub reported an error");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::default();
        assert!(config.reconnect);
        assert_eq!(config.url, "ws://127.0.0.1:8081/ws");
    }

    #[tokio::test]
    async fn test_operations_before_connect_are_dropped() {
        let client = SocketClient::with_url("ws://127.0.0.1:1/ws");
        // Must not panic or block; matches the original guard that silently
        // ignores operations issued before connect()
        client.join_room("global_chat").await;
        client.leave_room("global_chat").await;
        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_failure_is_surfaced() {
        // Nothing listens on this port
        let client = SocketClient::with_url("ws://127.0.0.1:9/ws");
        assert!(client.connect().await.is_err());
    }
}
