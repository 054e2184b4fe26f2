use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::config::Settings;
use crate::presence::{PresenceRegistry, RelayLimits};
use crate::relay::RelayDispatcher;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<PresenceRegistry>,
    pub relay: Arc<RelayDispatcher>,
    /// Signals background tasks and open connections during shutdown
    pub shutdown_tx: broadcast::Sender<()>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let registry = Arc::new(PresenceRegistry::with_limits(RelayLimits::from(
            &settings.relay,
        )));
        let relay = Arc::new(RelayDispatcher::new(registry.clone()));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            settings: Arc::new(settings),
            registry,
            relay,
            shutdown_tx,
            start_time: Instant::now(),
        }
    }
}
