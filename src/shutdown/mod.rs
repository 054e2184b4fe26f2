//! Graceful shutdown handling for the relay service.
//!
//! Coordinated shutdown:
//! 1. Notifies all connected clients about the impending shutdown
//! 2. Signals background tasks and open WebSocket loops to stop
//! 3. Waits (bounded) for connections to close

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::presence::PresenceRegistry;
use crate::websocket::ServerMessage;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for clients to be notified (default: 5 seconds)
    pub client_notification_timeout: Duration,
    /// Time to wait for connections to close (default: 10 seconds)
    pub drain_timeout: Duration,
    /// Suggested reconnect delay to send to clients (default: 5 seconds)
    pub reconnect_after_seconds: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            client_notification_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(10),
            reconnect_after_seconds: 5,
        }
    }
}

/// Handles graceful shutdown of the relay service
pub struct GracefulShutdown {
    registry: Arc<PresenceRegistry>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    /// Create a new graceful shutdown handler
    pub fn new(registry: Arc<PresenceRegistry>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self {
            registry,
            shutdown_tx,
            config: ShutdownConfig::default(),
        }
    }

    /// Create with custom configuration
    pub fn with_config(
        registry: Arc<PresenceRegistry>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            registry,
            shutdown_tx,
            config,
        }
    }

    /// Execute graceful shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(total_connections = self.registry.stats().total_connections)
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult::default();

        // Phase 1: Notify all connected clients
        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Notifying clients");
        result.clients_notified = self.notify_clients(reason).await;

        // Phase 2: Signal background tasks and open connection loops to stop
        tracing::info!("Phase 2: Signaling background tasks to stop");
        let _ = self.shutdown_tx.send(());

        // Phase 3: Wait briefly for connections to close
        tracing::info!("Phase 3: Waiting for connections to close");
        result.connections_closed = self.wait_for_connections_to_close().await;

        result.duration = start.elapsed();
        result.success = true;

        tracing::info!(
            clients_notified = result.clients_notified,
            connections_closed = result.connections_closed,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }

    /// Notify all connected clients about shutdown
    async fn notify_clients(&self, reason: &str) -> usize {
        let connections = self.registry.get_all_connections();
        let total = connections.len();

        if total == 0 {
            return 0;
        }

        tracing::info!(
            total_connections = total,
            "Sending shutdown notifications to clients"
        );

        let message = ServerMessage::shutdown(reason, Some(self.config.reconnect_after_seconds));
        let mut futures = FuturesUnordered::new();
        let mut notified = 0;

        for conn in connections {
            let msg = message.clone();
            futures.push(async move {
                match timeout(Duration::from_secs(2), conn.send(msg)).await {
                    Ok(Ok(_)) => true,
                    Ok(Err(e)) => {
                        tracing::debug!(
                            connection_id = %conn.id,
                            error = %e,
                            "Failed to send shutdown notification"
                        );
                        false
                    }
                    Err(_) => {
                        tracing::debug!(
                            connection_id = %conn.id,
                            "Timeout sending shutdown notification"
                        );
                        false
                    }
                }
            });
        }

        // Process all notifications with overall timeout
        let notify_future = async {
            while let Some(success) = futures.next().await {
                if success {
                    notified += 1;
                }
            }
        };

        let _ = timeout(self.config.client_notification_timeout, notify_future).await;

        tracing::info!(notified = notified, total = total, "Shutdown notifications sent");

        notified
    }

    /// Wait for connections to close gracefully
    async fn wait_for_connections_to_close(&self) -> usize {
        let initial = self.registry.stats().total_connections;
        if initial == 0 {
            return 0;
        }

        let wait_future = async {
            loop {
                tokio::time::sleep(Duration::from_millis(100)).await;
                if self.registry.stats().total_connections == 0 {
                    break;
                }
            }
        };

        let _ = timeout(self.config.drain_timeout, wait_future).await;

        let final_count = self.registry.stats().total_connections;
        let total_closed = initial - final_count;

        if final_count > 0 {
            tracing::warn!(
                remaining_connections = final_count,
                "Some connections did not close gracefully"
            );
        }

        total_closed
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Whether shutdown completed successfully
    pub success: bool,
    /// Number of clients that were notified
    pub clients_notified: usize,
    /// Number of connections that closed gracefully
    pub connections_closed: usize,
    /// Total time taken for shutdown
    pub duration: Duration,
}
