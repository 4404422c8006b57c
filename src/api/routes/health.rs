//! Health check endpoint

use axum::{Json, extract::State};

use crate::api::{
    state::ApiState,
    types::{HealthResponse, HealthState, StorageHealth},
};

/// GET /api/v1/health
///
/// Reports storage health when persistence is enabled; a failing backend
/// degrades the status but never fails the request
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let storage = match state.monitor.storage() {
        Some(storage) => Some(match storage.health_check().await {
            Ok(health) => StorageHealth {
                healthy: health.healthy,
                message: health.message,
            },
            Err(e) => StorageHealth {
                healthy: false,
                message: format!("{e:#}"),
            },
        }),
        None => None,
    };

    let status = match &storage {
        Some(StorageHealth { healthy: false, .. }) => HealthState::Degraded,
        _ => HealthState::Ok,
    };

    Json(HealthResponse {
        status,
        timestamp: chrono::Utc::now().to_rfc3339(),
        storage,
        subscribers: state.monitor.broadcaster().subscriber_count(),
    })
}
