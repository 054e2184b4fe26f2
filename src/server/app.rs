use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::api::{api_routes, broadcast_notification};
use crate::websocket::ws_handler;

use super::middleware::api_key_auth;
use super::AppState;

pub fn create_app(state: AppState) -> Router {
    let cors = build_cors(&state.settings.server.cors_origins);

    // Privileged out-of-band trigger, guarded by the admin key
    let admin_routes = Router::new()
        .route("/notifications/broadcast", post(broadcast_notification))
        .route_layer(middleware::from_fn_with_state(state.clone(), api_key_auth));

    Router::new()
        // WebSocket endpoint
        .route("/ws", get(ws_handler))
        // Health, stats, and metrics
        .merge(api_routes())
        .nest("/api/v1", admin_routes)
        // Add middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Add state
        .with_state(state)
}

fn build_cors(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods(Any)
        .allow_headers(Any)
}
