//! Prometheus scrape endpoint.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use crate::metrics::encode_metrics;

pub async fn metrics() -> Response {
    match encode_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}
