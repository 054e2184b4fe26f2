//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::presence::PresenceStats;
use crate::relay::RelayStatsSnapshot;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub connections: ConnectionHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct ConnectionHealthResponse {
    pub total: usize,
    pub active_rooms: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub presence: PresenceStats,
    pub relay: RelayStatsSnapshot,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let presence = state.registry.stats();

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        connections: ConnectionHealthResponse {
            total: presence.total_connections,
            active_rooms: presence.active_rooms,
        },
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        presence: state.registry.stats(),
        relay: state.relay.stats(),
    })
}
