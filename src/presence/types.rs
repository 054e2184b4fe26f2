//! Connection handle and related types

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::websocket::{OutboundMessage, ServerMessage};

/// Handle for a single WebSocket connection
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: Uuid,
    /// Whether this connection presented the admin key at upgrade time.
    /// Only privileged connections may broadcast notifications.
    pub privileged: bool,
    pub sender: mpsc::Sender<OutboundMessage>,
    pub connected_at: DateTime<Utc>,
    /// Last activity timestamp (Unix seconds) - using AtomicI64 for lock-free updates
    last_activity: AtomicI64,
    /// Rooms this connection is currently joined to. Drained on disconnect so
    /// every joined room is left exactly once.
    pub rooms: RwLock<HashSet<String>>,
}

impl ConnectionHandle {
    pub fn new(privileged: bool, sender: mpsc::Sender<OutboundMessage>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            privileged,
            sender,
            connected_at: now,
            last_activity: AtomicI64::new(now.timestamp()),
            rooms: RwLock::new(HashSet::new()),
        }
    }

    pub fn update_activity(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_activity.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    /// Send a ServerMessage (will be serialized when sent to WebSocket)
    pub async fn send(
        &self,
        message: ServerMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.sender.send(OutboundMessage::Raw(message)).await
    }

    /// Send a pre-serialized message (for efficient multi-send scenarios)
    pub async fn send_preserialized(
        &self,
        message: OutboundMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.sender.send(message).await
    }

    /// Get current joined-room count
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

/// Error returned when registry limits are exceeded
#[derive(Debug, Clone)]
pub enum PresenceError {
    ConnectionLimitExceeded { current: usize, max: usize },
    RoomLimitExceeded { room: String, current: usize, max: usize },
}

impl std::fmt::Display for PresenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLimitExceeded { current, max } => {
                write!(f, "Total connection limit exceeded ({}/{})", current, max)
            }
            Self::RoomLimitExceeded { room, current, max } => {
                write!(
                    f,
                    "Room limit exceeded joining {} ({}/{})",
                    room, current, max
                )
            }
        }
    }
}

impl std::error::Error for PresenceError {}

/// Limits enforced by the presence registry
#[derive(Debug, Clone, Copy)]
pub struct RelayLimits {
    pub max_connections: usize,
    pub max_rooms_per_connection: usize,
}

impl Default for RelayLimits {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            max_rooms_per_connection: 50,
        }
    }
}

impl From<&RelayConfig> for RelayLimits {
    fn from(config: &RelayConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            max_rooms_per_connection: config.max_rooms_per_connection,
        }
    }
}
