use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::metrics::ConnectionMetrics;
use crate::presence::ConnectionHandle;
use crate::server::AppState;

use super::message::{ClientMessage, OutboundMessage, ServerMessage};

const CHANNEL_BUFFER_SIZE: usize = 32;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Admin key granting the privileged-broadcast capability.
    /// Connections without it are regular and cannot raise notifications.
    pub key: Option<String>,
}

/// WebSocket upgrade handler
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query),
    fields(has_key = query.key.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    // Identity is supplied by the platform and trusted; the only capability
    // verified here is the admin key for privileged broadcasts.
    let privileged = match (&state.settings.api.key, &query.key) {
        (Some(expected), Some(presented)) => expected == presented,
        _ => false,
    };

    if query.key.is_some() && !privileged {
        tracing::warn!("WebSocket upgrade presented an invalid admin key");
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, privileged))
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state),
    fields(privileged = privileged, otel.kind = "server")
)]
async fn handle_socket(socket: WebSocket, state: AppState, privileged: bool) {
    let connection_start = std::time::Instant::now();

    // Create channel for sending messages to this connection
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(CHANNEL_BUFFER_SIZE);

    // Register connection with limit checking
    let handle = match state.registry.register(privileged, tx) {
        Ok(h) => h,
        Err(e) => {
            tracing::warn!(error = %e, "Connection rejected");
            // Send error and close
            let (mut ws_sender, _) = socket.split();
            let error_msg = ServerMessage::error("CONNECTION_LIMIT", e.to_string());
            if let Ok(json) = serde_json::to_string(&error_msg) {
                let _ = ws_sender.send(Message::Text(json.into())).await;
            }
            let _ = ws_sender.close().await;
            return;
        }
    };
    let connection_id = handle.id;

    ConnectionMetrics::record_opened();

    tracing::info!(
        connection_id = %connection_id,
        privileged = privileged,
        "WebSocket connection established"
    );

    // Split socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for sending messages from channel to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    continue;
                }
            };

            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Task for receiving messages from WebSocket
    let state_clone = state.clone();
    let handle_clone = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &state_clone, &handle_clone).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    // Wait for either task to complete, or for service shutdown
    let mut shutdown_rx = state.shutdown_tx.subscribe();
    tokio::select! {
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
        }
        _ = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
        }
        _ = shutdown_rx.recv() => {
            tracing::debug!(connection_id = %connection_id, "Closing connection for shutdown");
        }
    }
    send_task.abort();
    recv_task.abort();

    // Unregister, vacating all joined rooms and rebroadcasting their counts
    state.relay.disconnect(connection_id).await;

    let duration = connection_start.elapsed().as_secs_f64();
    ConnectionMetrics::record_closed(duration);

    tracing::info!(
        connection_id = %connection_id,
        duration_secs = duration,
        "WebSocket connection closed"
    );
}

/// Process a received WebSocket message
/// Returns false if the connection should be closed
async fn process_message(
    msg: Message,
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
) -> bool {
    match msg {
        Message::Text(text) => {
            handle.update_activity();

            // Parse client message
            let client_msg: ClientMessage = match serde_json::from_str(&text) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse client message");
                    let _ = handle
                        .send(ServerMessage::error("INVALID_MESSAGE", e.to_string()))
                        .await;
                    return true;
                }
            };

            // Handle the message
            handle_client_message(client_msg, state, handle).await;
            true
        }
        Message::Binary(_) => {
            // Binary messages not supported
            let _ = handle
                .send(ServerMessage::error(
                    "UNSUPPORTED_FORMAT",
                    "Binary messages are not supported",
                ))
                .await;
            true
        }
        Message::Ping(_) => {
            handle.update_activity();
            // Axum handles pong automatically, but we update activity
            true
        }
        Message::Pong(_) => {
            handle.update_activity();
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}

/// Handle a parsed client message
#[tracing::instrument(
    name = "ws.message",
    skip(state, handle, msg),
    fields(connection_id = %handle.id)
)]
async fn handle_client_message(
    msg: ClientMessage,
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
) {
    match msg {
        ClientMessage::JoinRoom(room) => {
            if !is_valid_room_name(&room) {
                tracing::warn!(connection_id = %handle.id, room = %room, "Invalid room name");
                let _ = handle
                    .send(ServerMessage::error(
                        "INVALID_ROOM",
                        format!("Invalid room name: {}", room),
                    ))
                    .await;
                return;
            }

            if let Err(e) = state.relay.join_room(handle.id, &room).await {
                tracing::warn!(
                    connection_id = %handle.id,
                    room = %room,
                    error = %e,
                    "Failed to join room"
                );
                let _ = handle
                    .send(ServerMessage::error("ROOM_LIMIT_EXCEEDED", e.to_string()))
                    .await;
            }
        }
        ClientMessage::LeaveRoom(room) => {
            // Leaving a room never joined is a no-op inside the relay
            state.relay.leave_room(handle.id, &room).await;
        }
        ClientMessage::SendMessage(payload) => {
            if !is_valid_room_name(&payload.room) {
                let _ = handle
                    .send(ServerMessage::error(
                        "INVALID_ROOM",
                        format!("Invalid room name: {}", payload.room),
                    ))
                    .await;
                return;
            }

            let max_bytes = state.settings.relay.max_message_bytes;
            if payload.text.len() > max_bytes {
                let _ = handle
                    .send(ServerMessage::error(
                        "MESSAGE_TOO_LARGE",
                        format!("Message exceeds {} bytes", max_bytes),
                    ))
                    .await;
                return;
            }

            state.relay.relay_chat(payload).await;
        }
        ClientMessage::AdminNotification(notification) => {
            if !handle.privileged {
                tracing::warn!(
                    connection_id = %handle.id,
                    "Rejected admin notification from unprivileged connection"
                );
                let _ = handle
                    .send(ServerMessage::error(
                        "FORBIDDEN",
                        "Broadcasting notifications requires the admin key",
                    ))
                    .await;
                return;
            }

            state.relay.broadcast_notification(notification).await;
        }
        ClientMessage::Ping => {
            let _ = handle.send(ServerMessage::Pong).await;
        }
    }
}

/// Validate room name
fn is_valid_room_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 64 {
        return false;
    }

    // Only allow alphanumeric, dash, underscore, and dot
    name.chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
}
