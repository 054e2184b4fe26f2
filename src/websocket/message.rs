use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::relay::{ChatMessage, ChatPayload, Notification, RoomData};

/// Messages sent from client to hub
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room, e.g. `global_chat` or `course_view_101`
    JoinRoom(String),
    /// Leave a room; never an error, even if the room was not joined
    LeaveRoom(String),
    /// Relay a chat message to a room
    SendMessage(ChatPayload),
    /// Broadcast a notification to all clients (privileged connections only)
    AdminNotification(Notification),
    /// Client liveness; also sent in response to a server heartbeat
    Ping,
}

/// Messages sent from hub to client. Uses the same `{type, payload}`
/// envelope as client frames; the notification payload carries its own
/// `type` field (the severity), which must not collide with the envelope tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Presence update for one room, sent to all its members
    RoomData(RoomData),
    /// Relayed chat message, sent to all room members including the sender
    ReceiveMessage(ChatMessage),
    /// Notification broadcast to every connected client
    Notification(Notification),
    Pong,
    Heartbeat,
    /// Sent during graceful shutdown before the server closes connections
    Shutdown {
        reason: String,
        #[serde(
            rename = "reconnectAfterSeconds",
            skip_serializing_if = "Option::is_none"
        )]
        reconnect_after_seconds: Option<u64>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn room_data(room: impl Into<String>, online_count: usize) -> Self {
        Self::RoomData(RoomData {
            room: room.into(),
            online_count,
        })
    }

    pub fn receive_message(message: ChatMessage) -> Self {
        Self::ReceiveMessage(message)
    }

    pub fn notification(notification: Notification) -> Self {
        Self::Notification(notification)
    }

    pub fn shutdown(reason: impl Into<String>, reconnect_after_seconds: Option<u64>) -> Self {
        Self::Shutdown {
            reason: reason.into(),
            reconnect_after_seconds,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Outbound frame handed to a connection's writer task. Fan-out paths
/// serialize once and share the result across all target connections.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Raw(ServerMessage),
    Preserialized(Arc<str>),
}

impl OutboundMessage {
    pub fn preserialized(message: &ServerMessage) -> serde_json::Result<Self> {
        Ok(Self::Preserialized(serde_json::to_string(message)?.into()))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        match self {
            Self::Raw(message) => serde_json::to_string(message),
            Self::Preserialized(json) => Ok(json.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_room_wire_shape() {
        let msg = ClientMessage::JoinRoom("global_chat".to_string());
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": "join_room", "payload": "global_chat"}));
    }

    #[test]
    fn test_send_message_parses_camel_case_payload() {
        let frame = json!({
            "type": "send_message",
            "payload": {
                "room": "global_chat",
                "text": "hi",
                "senderId": "u1",
                "senderName": "Nova",
                "senderAvatar": "a.png"
            }
        });
        let msg: ClientMessage = serde_json::from_value(frame).unwrap();
        match msg {
            ClientMessage::SendMessage(payload) => {
                assert_eq!(payload.room, "global_chat");
                assert_eq!(payload.sender_id, "u1");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_room_data_wire_shape() {
        let msg = ServerMessage::room_data("global_chat", 2);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "room_data", "payload": {"room": "global_chat", "onlineCount": 2}})
        );
    }

    #[test]
    fn test_notification_severity_does_not_collide_with_envelope_tag() {
        let msg = ServerMessage::notification(crate::relay::Notification::new(
            "Maintenance",
            "Back soon",
            crate::relay::NotificationKind::Warning,
        ));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "notification");
        assert_eq!(value["payload"]["type"], "warning");

        let parsed: ServerMessage = serde_json::from_value(value).unwrap();
        assert!(matches!(parsed, ServerMessage::Notification(_)));
    }

    #[test]
    fn test_ping_and_pong_are_bare_frames() {
        let ping: ClientMessage = serde_json::from_value(json!({"type": "ping"})).unwrap();
        assert!(matches!(ping, ClientMessage::Ping));

        let pong = serde_json::to_value(&ServerMessage::Pong).unwrap();
        assert_eq!(pong, json!({"type": "pong"}));
    }

    #[test]
    fn test_preserialized_matches_raw() {
        let msg = ServerMessage::error("INVALID_ROOM", "room name must not be empty");
        let raw = OutboundMessage::Raw(msg.clone()).to_json().unwrap();
        let pre = OutboundMessage::preserialized(&msg).unwrap().to_json().unwrap();
        assert_eq!(raw, pre);
    }
}
