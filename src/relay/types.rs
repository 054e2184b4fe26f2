//! In-flight relay types: chat messages, notifications, presence snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chat message as submitted by a client. The sender identity is supplied by
/// the client's identity provider and is not verified here; the hub trusts
/// the caller per the platform's trust model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub room: String,
    pub text: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_avatar: String,
}

/// Chat message as relayed to room members. Identical to the submitted
/// payload plus a server-assigned timestamp. Immutable once broadcast; the
/// hub does not retain it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub room: String,
    pub text: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_avatar: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Stamp a submitted payload with the server-side creation time.
    pub fn stamp(payload: ChatPayload) -> Self {
        Self {
            room: payload.room,
            text: payload.text,
            sender_id: payload.sender_id,
            sender_name: payload.sender_name,
            sender_avatar: payload.sender_avatar,
            created_at: Utc::now(),
        }
    }
}

/// Severity of a broadcast notification, shown as toast styling client-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    #[default]
    Info,
    Success,
    Warning,
}

/// Platform-wide notification, broadcast to every connection regardless of
/// room membership. Not persisted; display expiry is the client UI's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
}

impl Notification {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        kind: NotificationKind,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            kind,
        }
    }
}

/// Presence snapshot for one room, broadcast to members on every membership
/// change affecting the room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomData {
    pub room: String,
    #[serde(rename = "onlineCount")]
    pub online_count: usize,
}
