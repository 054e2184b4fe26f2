//! Out-of-band notification trigger for the admin console.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::relay::{Notification, NotificationKind};
use crate::server::AppState;

/// Request to broadcast a notification to all connected clients
#[derive(Debug, Deserialize)]
pub struct BroadcastNotificationRequest {
    pub title: String,
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
}

/// Response for notification broadcast operations
#[derive(Debug, Serialize)]
pub struct BroadcastNotificationResponse {
    /// Whether the operation was successful
    pub success: bool,
    /// Number of connections the notification was delivered to
    pub delivered_to: usize,
    /// Number of failed deliveries
    pub failed: usize,
    /// Timestamp of the operation
    pub timestamp: DateTime<Utc>,
}

/// Broadcast a notification to all connected clients, regardless of rooms.
/// Guarded by the API-key middleware; delivery is best-effort, no retry.
pub async fn broadcast_notification(
    State(state): State<AppState>,
    Json(request): Json<BroadcastNotificationRequest>,
) -> Result<Json<BroadcastNotificationResponse>> {
    if request.title.trim().is_empty() {
        return Err(AppError::Validation("title must not be empty".to_string()));
    }
    if request.message.trim().is_empty() {
        return Err(AppError::Validation("message must not be empty".to_string()));
    }

    let notification = Notification::new(request.title, request.message, request.kind);
    let result = state.relay.broadcast_notification(notification).await;

    tracing::info!(
        delivered_to = result.delivered_to,
        failed = result.failed,
        "Broadcast notification via HTTP trigger"
    );

    Ok(Json(BroadcastNotificationResponse {
        success: true,
        delivered_to: result.delivered_to,
        failed: result.failed,
        timestamp: Utc::now(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_kind_defaults_to_info() {
        let request: BroadcastNotificationRequest = serde_json::from_value(serde_json::json!({
            "title": "Maintenance",
            "message": "Back soon"
        }))
        .unwrap();
        assert_eq!(request.kind, NotificationKind::Info);
    }
}
