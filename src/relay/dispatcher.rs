use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use crate::metrics::{RelayMetrics, RoomMetrics};
use crate::presence::{ConnectionHandle, PresenceError, PresenceRegistry};
use crate::websocket::{OutboundMessage, ServerMessage};

use super::types::{ChatMessage, ChatPayload, Notification};

/// Maximum number of concurrent message sends
const MAX_CONCURRENT_SENDS: usize = 100;

/// Threshold for using pre-serialization (saves serialization overhead for larger sends)
const PRESERIALIZATION_THRESHOLD: usize = 4;

/// Result of a relay or broadcast attempt
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    /// Number of connections the message was delivered to
    pub delivered_to: usize,
    /// Number of connections that failed to receive
    pub failed: usize,
    /// Whether any delivery was successful
    pub success: bool,
}

impl DeliveryResult {
    fn new(delivered: usize, failed: usize) -> Self {
        Self {
            delivered_to: delivered,
            failed,
            success: delivered > 0,
        }
    }
}

/// Statistics for the relay dispatcher
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Total room joins processed
    pub joins: AtomicU64,
    /// Total room leaves processed (explicit and disconnect cleanup)
    pub leaves: AtomicU64,
    /// Total disconnect cleanups
    pub disconnects: AtomicU64,
    /// Total chat messages relayed
    pub messages_relayed: AtomicU64,
    /// Total notifications broadcast
    pub notifications_broadcast: AtomicU64,
    /// Total deliveries that failed (connection gone)
    pub deliveries_failed: AtomicU64,
}

impl RelayStats {
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            joins: self.joins.load(Ordering::Relaxed),
            leaves: self.leaves.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            messages_relayed: self.messages_relayed.load(Ordering::Relaxed),
            notifications_broadcast: self.notifications_broadcast.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of relay statistics
#[derive(Debug, Clone, Serialize)]
pub struct RelayStatsSnapshot {
    pub joins: u64,
    pub leaves: u64,
    pub disconnects: u64,
    pub messages_relayed: u64,
    pub notifications_broadcast: u64,
    pub deliveries_failed: u64,
}

/// Relays presence updates, chat messages, and notifications to connections.
///
/// All registry mutation flows through here so every membership change is
/// followed by a `room_data` rebroadcast to the affected room.
pub struct RelayDispatcher {
    registry: Arc<PresenceRegistry>,
    stats: RelayStats,
}

impl RelayDispatcher {
    pub fn new(registry: Arc<PresenceRegistry>) -> Self {
        Self {
            registry,
            stats: RelayStats::default(),
        }
    }

    /// Get dispatcher statistics
    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    /// Join a connection to a room and rebroadcast the room's presence.
    ///
    /// Join is idempotent per connection: a re-join leaves the count alone
    /// and resends the current snapshot to the requesting connection only.
    #[tracing::instrument(name = "relay.join_room", skip(self))]
    pub async fn join_room(&self, connection_id: Uuid, room: &str) -> Result<(), PresenceError> {
        let Some(outcome) = self.registry.join(connection_id, room).await? else {
            // Connection disconnected while the join was in flight
            return Ok(());
        };

        if outcome.newly_joined {
            self.stats.joins.fetch_add(1, Ordering::Relaxed);
            RoomMetrics::record_join();

            tracing::info!(
                connection_id = %connection_id,
                room = %room,
                online_count = outcome.online_count,
                "Joined room"
            );

            self.broadcast_room_data(room, outcome.online_count).await;
        } else if let Some(handle) = self.registry.get_connection(connection_id) {
            // Already a member: answer with the current snapshot
            let _ = handle
                .send(ServerMessage::room_data(room, outcome.online_count))
                .await;
        }

        Ok(())
    }

    /// Leave a room and rebroadcast its presence. Leaving a room the
    /// connection never joined is a no-op.
    #[tracing::instrument(name = "relay.leave_room", skip(self))]
    pub async fn leave_room(&self, connection_id: Uuid, room: &str) {
        let Some(online_count) = self.registry.leave(connection_id, room).await else {
            return;
        };

        self.stats.leaves.fetch_add(1, Ordering::Relaxed);
        RoomMetrics::record_leave();

        tracing::info!(
            connection_id = %connection_id,
            room = %room,
            online_count = online_count,
            "Left room"
        );

        self.broadcast_room_data(room, online_count).await;
    }

    /// Remove a connection, leaving every room it had joined, and rebroadcast
    /// presence for each. Safe to call for connections already gone.
    #[tracing::instrument(name = "relay.disconnect", skip(self))]
    pub async fn disconnect(&self, connection_id: Uuid) {
        let vacated = self.registry.unregister(connection_id).await;
        if vacated.is_empty() {
            return;
        }

        self.stats.disconnects.fetch_add(1, Ordering::Relaxed);
        self.stats
            .leaves
            .fetch_add(vacated.len() as u64, Ordering::Relaxed);

        for data in vacated {
            RoomMetrics::record_leave();
            self.broadcast_room_data(&data.room, data.online_count).await;
        }
    }

    /// Stamp a chat message with the server time and relay it to every
    /// member of its room, including the sender (clients render only the
    /// echo; there is no optimistic local copy to de-duplicate against).
    #[tracing::instrument(
        name = "relay.chat",
        skip(self, payload),
        fields(room = %payload.room, sender_id = %payload.sender_id)
    )]
    pub async fn relay_chat(&self, payload: ChatPayload) -> DeliveryResult {
        let message = ChatMessage::stamp(payload);
        let members = self.registry.room_members(&message.room);
        let room = message.room.clone();
        let frame = ServerMessage::receive_message(message);

        let (delivered, failed) = self.send_to_connections(&members, &frame).await;

        self.stats.messages_relayed.fetch_add(1, Ordering::Relaxed);
        self.stats
            .deliveries_failed
            .fetch_add(failed as u64, Ordering::Relaxed);
        RelayMetrics::record_message_relayed();
        RelayMetrics::record_failed(failed as u64);

        tracing::debug!(
            room = %room,
            delivered = delivered,
            failed = failed,
            "Relayed chat message"
        );

        DeliveryResult::new(delivered, failed)
    }

    /// Broadcast a notification to every connected client regardless of room
    #[tracing::instrument(name = "relay.broadcast_notification", skip(self, notification))]
    pub async fn broadcast_notification(&self, notification: Notification) -> DeliveryResult {
        let connections = self.registry.get_all_connections();
        let frame = ServerMessage::notification(notification);

        let (delivered, failed) = self.send_to_connections(&connections, &frame).await;

        self.stats
            .notifications_broadcast
            .fetch_add(1, Ordering::Relaxed);
        self.stats
            .deliveries_failed
            .fetch_add(failed as u64, Ordering::Relaxed);
        RelayMetrics::record_notification_broadcast();
        RelayMetrics::record_failed(failed as u64);

        tracing::debug!(
            delivered = delivered,
            failed = failed,
            "Broadcast notification to all connections"
        );

        DeliveryResult::new(delivered, failed)
    }

    /// Send the current presence snapshot of a room to all its members
    async fn broadcast_room_data(&self, room: &str, online_count: usize) {
        let members = self.registry.room_members(room);
        if members.is_empty() {
            return;
        }

        let frame = ServerMessage::room_data(room, online_count);
        let (_, failed) = self.send_to_connections(&members, &frame).await;
        if failed > 0 {
            self.stats
                .deliveries_failed
                .fetch_add(failed as u64, Ordering::Relaxed);
            RelayMetrics::record_failed(failed as u64);
        }
    }

    /// Send a message to a list of connections concurrently.
    /// Uses bounded parallelism and pre-serializes once for larger sends.
    /// Connections whose channel is gone are skipped silently.
    async fn send_to_connections(
        &self,
        connections: &[Arc<ConnectionHandle>],
        message: &ServerMessage,
    ) -> (usize, usize) {
        if connections.is_empty() {
            return (0, 0);
        }

        // Small sends: sequential, no pre-serialization
        if connections.len() < PRESERIALIZATION_THRESHOLD {
            let mut delivered = 0;
            let mut failed = 0;
            for conn in connections {
                match conn.send(message.clone()).await {
                    Ok(_) => delivered += 1,
                    Err(_) => failed += 1,
                }
            }
            return (delivered, failed);
        }

        // Larger sends: serialize once and share across all connections
        let outbound = match OutboundMessage::preserialized(message) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!(error = %e, "Failed to pre-serialize message, falling back");
                OutboundMessage::Raw(message.clone())
            }
        };

        let mut futures = FuturesUnordered::new();
        let mut delivered = 0;
        let mut failed = 0;
        let mut pending = 0;

        for conn in connections {
            let conn = conn.clone();
            let msg = outbound.clone();
            futures.push(async move { conn.send_preserialized(msg).await.is_ok() });
            pending += 1;

            // Process completed futures when we hit the concurrency limit
            while pending >= MAX_CONCURRENT_SENDS {
                match futures.next().await {
                    Some(true) => {
                        pending -= 1;
                        delivered += 1;
                    }
                    Some(false) => {
                        pending -= 1;
                        failed += 1;
                    }
                    None => break,
                }
            }
        }

        while let Some(ok) = futures.next().await {
            if ok {
                delivered += 1;
            } else {
                failed += 1;
            }
        }

        (delivered, failed)
    }
}
