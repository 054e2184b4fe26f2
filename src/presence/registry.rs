use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::metrics::RoomMetrics;
use crate::relay::RoomData;
use crate::websocket::OutboundMessage;

use super::stats::PresenceStats;
use super::types::{ConnectionHandle, PresenceError, RelayLimits};

/// Result of a join operation
#[derive(Debug, Clone, Copy)]
pub struct JoinOutcome {
    /// False when the connection was already a member (idempotent re-join)
    pub newly_joined: bool,
    /// Member count after the operation
    pub online_count: usize,
}

/// Authoritative mapping of connections to rooms.
///
/// Room counts are derived from live membership sets, so they cannot go
/// negative and always equal the number of registered connections joined to
/// the room. Join is a set insertion: re-joining an already-joined room does
/// not change the count.
pub struct PresenceRegistry {
    /// connection_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
    /// room name -> Set<connection_id>
    room_index: DashMap<String, HashSet<Uuid>>,
    limits: RelayLimits,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::with_limits(RelayLimits::default())
    }

    pub fn with_limits(limits: RelayLimits) -> Self {
        Self {
            connections: DashMap::new(),
            room_index: DashMap::new(),
            limits,
        }
    }

    /// Register a new connection with an empty joined-room set.
    /// No side effects are visible to other clients.
    pub fn register(
        &self,
        privileged: bool,
        sender: mpsc::Sender<OutboundMessage>,
    ) -> Result<Arc<ConnectionHandle>, PresenceError> {
        let current = self.connections.len();
        if current >= self.limits.max_connections {
            return Err(PresenceError::ConnectionLimitExceeded {
                current,
                max: self.limits.max_connections,
            });
        }

        let handle = Arc::new(ConnectionHandle::new(privileged, sender));
        self.connections.insert(handle.id, handle.clone());

        tracing::info!(
            connection_id = %handle.id,
            privileged = privileged,
            "Connection registered"
        );

        Ok(handle)
    }

    /// Remove a connection and vacate every room it had joined.
    ///
    /// The connection record is removed before room cleanup, so no relay
    /// started after this point can target it. Returns the post-decrement
    /// presence snapshot for each vacated room, for rebroadcast.
    pub async fn unregister(&self, connection_id: Uuid) -> Vec<RoomData> {
        let Some((_, handle)) = self.connections.remove(&connection_id) else {
            return Vec::new();
        };

        // Holding the write lock here serializes against an in-flight join on
        // the same connection: the join finishes updating the room index
        // before the drain below observes the set.
        let mut rooms = handle.rooms.write().await;
        let mut vacated = Vec::with_capacity(rooms.len());
        for room in rooms.drain() {
            let online_count = self.remove_membership(&room, connection_id);
            vacated.push(RoomData { room, online_count });
        }
        drop(rooms);

        RoomMetrics::set_active_rooms(self.room_index.len());

        tracing::info!(
            connection_id = %connection_id,
            vacated_rooms = vacated.len(),
            "Connection unregistered"
        );

        vacated
    }

    /// Join a connection to a room (idempotent set insertion).
    ///
    /// Returns `None` when the connection is no longer registered.
    pub async fn join(
        &self,
        connection_id: Uuid,
        room: &str,
    ) -> Result<Option<JoinOutcome>, PresenceError> {
        let Some(handle) = self.connections.get(&connection_id).map(|h| h.clone()) else {
            return Ok(None);
        };

        let mut rooms = handle.rooms.write().await;

        // Disconnect may have raced us between the lookup above and taking
        // the lock; it drains the set under this lock, so if the record is
        // gone we must not touch the room index.
        if !self.connections.contains_key(&connection_id) {
            return Ok(None);
        }

        if rooms.contains(room) {
            let online_count = self.room_count(room);
            return Ok(Some(JoinOutcome {
                newly_joined: false,
                online_count,
            }));
        }

        if rooms.len() >= self.limits.max_rooms_per_connection {
            return Err(PresenceError::RoomLimitExceeded {
                room: room.to_string(),
                current: rooms.len(),
                max: self.limits.max_rooms_per_connection,
            });
        }

        rooms.insert(room.to_string());
        let online_count = {
            let mut members = self.room_index.entry(room.to_string()).or_default();
            members.insert(connection_id);
            members.len()
        };
        drop(rooms);

        RoomMetrics::set_active_rooms(self.room_index.len());

        tracing::debug!(connection_id = %connection_id, room = %room, "Joined room");

        Ok(Some(JoinOutcome {
            newly_joined: true,
            online_count,
        }))
    }

    /// Leave a room. Returns the updated member count, or `None` when the
    /// connection was not a member (no-op, per the leave contract).
    pub async fn leave(&self, connection_id: Uuid, room: &str) -> Option<usize> {
        let handle = self.connections.get(&connection_id).map(|h| h.clone())?;

        let mut rooms = handle.rooms.write().await;
        if !rooms.remove(room) {
            return None;
        }
        let online_count = self.remove_membership(room, connection_id);
        drop(rooms);

        RoomMetrics::set_active_rooms(self.room_index.len());

        tracing::debug!(connection_id = %connection_id, room = %room, "Left room");

        Some(online_count)
    }

    /// Drop one connection from a room's member set, removing the room entry
    /// when it empties. Returns the remaining member count.
    fn remove_membership(&self, room: &str, connection_id: Uuid) -> usize {
        let count = match self.room_index.get_mut(room) {
            Some(mut members) => {
                members.remove(&connection_id);
                members.len()
            }
            None => 0,
        };
        if count == 0 {
            self.room_index.remove_if(room, |_, members| members.is_empty());
        }
        count
    }

    /// Current member count for a room (0 when absent)
    pub fn room_count(&self, room: &str) -> usize {
        self.room_index.get(room).map(|m| m.len()).unwrap_or(0)
    }

    /// Get all live connections joined to a room
    pub fn room_members(&self, room: &str) -> Vec<Arc<ConnectionHandle>> {
        let member_ids: Vec<Uuid> = match self.room_index.get(room) {
            Some(members) => members.iter().copied().collect(),
            None => return Vec::new(),
        };

        member_ids
            .iter()
            .filter_map(|id| self.connections.get(id).map(|h| h.clone()))
            .collect()
    }

    /// Get all connections
    pub fn get_all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    /// Get connection by ID
    pub fn get_connection(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    /// Get statistics
    pub fn stats(&self) -> PresenceStats {
        let mut rooms = std::collections::HashMap::new();
        for entry in self.room_index.iter() {
            rooms.insert(entry.key().clone(), entry.value().len());
        }

        PresenceStats {
            total_connections: self.connections.len(),
            active_rooms: rooms.len(),
            rooms,
        }
    }

    /// Find connections that have been inactive for longer than the timeout
    pub fn find_stale_connections(&self, timeout_secs: u64) -> Vec<Uuid> {
        let now = chrono::Utc::now();
        let timeout = chrono::Duration::seconds(timeout_secs as i64);

        self.connections
            .iter()
            .filter(|entry| now.signed_duration_since(entry.value().last_activity()) > timeout)
            .map(|entry| *entry.key())
            .collect()
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn registry() -> PresenceRegistry {
        PresenceRegistry::new()
    }

    fn connect(registry: &PresenceRegistry) -> Arc<ConnectionHandle> {
        let (tx, _rx) = mpsc::channel(8);
        registry.register(false, tx).unwrap()
    }

    #[tokio::test]
    async fn test_count_tracks_joins_and_leaves() {
        let registry = registry();
        let a = connect(&registry);
        let b = connect(&registry);

        let outcome = registry.join(a.id, "global_chat").await.unwrap().unwrap();
        assert!(outcome.newly_joined);
        assert_eq!(outcome.online_count, 1);

        let outcome = registry.join(b.id, "global_chat").await.unwrap().unwrap();
        assert_eq!(outcome.online_count, 2);

        assert_eq!(registry.leave(a.id, "global_chat").await, Some(1));
        assert_eq!(registry.leave(b.id, "global_chat").await, Some(0));
        assert_eq!(registry.room_count("global_chat"), 0);
    }

    #[tokio::test]
    async fn test_rejoin_does_not_inflate_count() {
        let registry = registry();
        let a = connect(&registry);

        registry.join(a.id, "global_chat").await.unwrap();
        let outcome = registry.join(a.id, "global_chat").await.unwrap().unwrap();

        assert!(!outcome.newly_joined);
        assert_eq!(outcome.online_count, 1);
        assert_eq!(registry.room_count("global_chat"), 1);

        // A single leave fully removes the membership
        assert_eq!(registry.leave(a.id, "global_chat").await, Some(0));
        assert_eq!(registry.room_count("global_chat"), 0);
    }

    #[tokio::test]
    async fn test_leave_unjoined_room_is_noop() {
        let registry = registry();
        let a = connect(&registry);

        assert_eq!(registry.leave(a.id, "never_joined").await, None);
        assert_eq!(registry.room_count("never_joined"), 0);
    }

    #[tokio::test]
    async fn test_unregister_vacates_every_joined_room() {
        let registry = registry();
        let a = connect(&registry);
        let b = connect(&registry);

        registry.join(a.id, "room_a").await.unwrap();
        registry.join(a.id, "room_b").await.unwrap();
        registry.join(b.id, "room_a").await.unwrap();

        let mut vacated = registry.unregister(a.id).await;
        vacated.sort_by(|x, y| x.room.cmp(&y.room));

        assert_eq!(vacated.len(), 2);
        assert_eq!(vacated[0].room, "room_a");
        assert_eq!(vacated[0].online_count, 1);
        assert_eq!(vacated[1].room, "room_b");
        assert_eq!(vacated[1].online_count, 0);

        assert_eq!(registry.room_count("room_a"), 1);
        assert_eq!(registry.room_count("room_b"), 0);
    }

    #[tokio::test]
    async fn test_unregister_twice_is_noop() {
        let registry = registry();
        let a = connect(&registry);
        registry.join(a.id, "room_a").await.unwrap();

        assert_eq!(registry.unregister(a.id).await.len(), 1);
        assert!(registry.unregister(a.id).await.is_empty());
        assert_eq!(registry.room_count("room_a"), 0);
    }

    #[tokio::test]
    async fn test_join_after_unregister_is_ignored() {
        let registry = registry();
        let a = connect(&registry);
        registry.unregister(a.id).await;

        assert!(registry.join(a.id, "room_a").await.unwrap().is_none());
        assert_eq!(registry.room_count("room_a"), 0);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let registry = PresenceRegistry::with_limits(RelayLimits {
            max_connections: 1,
            max_rooms_per_connection: 50,
        });

        let (tx, _rx) = mpsc::channel(8);
        registry.register(false, tx).unwrap();

        let (tx, _rx) = mpsc::channel(8);
        let err = registry.register(false, tx).unwrap_err();
        assert!(matches!(err, PresenceError::ConnectionLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn test_room_limit_per_connection() {
        let registry = PresenceRegistry::with_limits(RelayLimits {
            max_connections: 10,
            max_rooms_per_connection: 2,
        });
        let a = connect(&registry);

        registry.join(a.id, "r1").await.unwrap();
        registry.join(a.id, "r2").await.unwrap();
        let err = registry.join(a.id, "r3").await.unwrap_err();
        assert!(matches!(err, PresenceError::RoomLimitExceeded { .. }));

        // Re-joining an already-joined room is still allowed at the limit
        assert!(registry.join(a.id, "r1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_room_members_excludes_other_rooms() {
        let registry = registry();
        let a = connect(&registry);
        let b = connect(&registry);

        registry.join(a.id, "room_a").await.unwrap();
        registry.join(b.id, "room_b").await.unwrap();

        let members = registry.room_members("room_a");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, a.id);
    }

    #[tokio::test]
    async fn test_stats_reports_rooms_and_connections() {
        let registry = registry();
        let a = connect(&registry);
        let b = connect(&registry);

        registry.join(a.id, "global_chat").await.unwrap();
        registry.join(b.id, "global_chat").await.unwrap();
        registry.join(b.id, "course_view_7").await.unwrap();

        let stats = registry.stats();
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.active_rooms, 2);
        assert_eq!(stats.rooms.get("global_chat"), Some(&2));
        assert_eq!(stats.rooms.get("course_view_7"), Some(&1));
    }
}
