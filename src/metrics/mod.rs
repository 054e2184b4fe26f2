//! Prometheus metrics for the realtime relay service.
//!
//! Covers the signals that matter for a presence relay:
//! - Connection metrics (active connections, open/close counters, duration)
//! - Room metrics (active rooms, joins, leaves)
//! - Relay metrics (messages relayed, notifications broadcast, failed deliveries)

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Encoder, Histogram, IntCounter,
    IntGauge, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "academy_relay";

lazy_static! {
    /// Number of currently active WebSocket connections
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of currently active WebSocket connections"
    ).unwrap();

    /// Total WebSocket connections opened
    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    /// Total WebSocket connections closed
    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    /// WebSocket connection lifetime in seconds
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection lifetime in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0, 14400.0]
    ).unwrap();

    /// Number of rooms with at least one member
    pub static ref ROOMS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_rooms_active", METRIC_PREFIX),
        "Number of rooms with at least one member"
    ).unwrap();

    /// Total room joins
    pub static ref ROOM_JOINS: IntCounter = register_int_counter!(
        format!("{}_room_joins_total", METRIC_PREFIX),
        "Total room joins"
    ).unwrap();

    /// Total room leaves (explicit leaves and disconnect cleanup)
    pub static ref ROOM_LEAVES: IntCounter = register_int_counter!(
        format!("{}_room_leaves_total", METRIC_PREFIX),
        "Total room leaves, including disconnect cleanup"
    ).unwrap();

    /// Total chat messages relayed to rooms
    pub static ref MESSAGES_RELAYED: IntCounter = register_int_counter!(
        format!("{}_messages_relayed_total", METRIC_PREFIX),
        "Total chat messages relayed to rooms"
    ).unwrap();

    /// Total notifications broadcast to all clients
    pub static ref NOTIFICATIONS_BROADCAST: IntCounter = register_int_counter!(
        format!("{}_notifications_broadcast_total", METRIC_PREFIX),
        "Total notifications broadcast to all clients"
    ).unwrap();

    /// Total deliveries that failed because the target channel was closed or full
    pub static ref DELIVERIES_FAILED: IntCounter = register_int_counter!(
        format!("{}_deliveries_failed_total", METRIC_PREFIX),
        "Total deliveries skipped because the target connection was gone"
    ).unwrap();
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper for recording connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        WS_CONNECTIONS_OPENED.inc();
        CONNECTIONS_ACTIVE.inc();
    }

    pub fn record_closed(duration_secs: f64) {
        WS_CONNECTIONS_CLOSED.inc();
        CONNECTIONS_ACTIVE.dec();
        WS_CONNECTION_DURATION.observe(duration_secs);
    }
}

/// Helper for recording room membership metrics
pub struct RoomMetrics;

impl RoomMetrics {
    pub fn record_join() {
        ROOM_JOINS.inc();
    }

    pub fn record_leave() {
        ROOM_LEAVES.inc();
    }

    pub fn set_active_rooms(count: usize) {
        ROOMS_ACTIVE.set(count as i64);
    }
}

/// Helper for recording relay delivery metrics
pub struct RelayMetrics;

impl RelayMetrics {
    pub fn record_message_relayed() {
        MESSAGES_RELAYED.inc();
    }

    pub fn record_notification_broadcast() {
        NOTIFICATIONS_BROADCAST.inc();
    }

    pub fn record_failed(count: u64) {
        DELIVERIES_FAILED.inc_by(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics_contains_prefix() {
        ConnectionMetrics::record_opened();
        let text = encode_metrics().expect("metrics should encode");
        assert!(text.contains("academy_relay_ws_connections_opened_total"));
    }
}
