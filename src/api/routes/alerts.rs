//! Alert endpoints

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::InstanceId;
use crate::alerts::{Alert, AlertId};
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{AcknowledgeRequest, AlertsResponse, ManualAlertRequest, ResolveRequest},
};

/// GET /api/v1/alerts
///
/// Open alerts (active and acknowledged)
pub async fn list_alerts(State(state): State<ApiState>) -> Json<AlertsResponse> {
    Json(state.monitor.active_alerts().into())
}

/// GET /api/v1/instances/{id}/alerts
///
/// Every alert of the instance still held in memory, resolved ones included
pub async fn list_instance_alerts(
    State(state): State<ApiState>,
    Path(id): Path<InstanceId>,
) -> ApiResult<Json<AlertsResponse>> {
    Ok(Json(state.monitor.alerts_for_instance(id)?.into()))
}

/// POST /api/v1/alerts
pub async fn raise_alert(
    State(state): State<ApiState>,
    Json(request): Json<ManualAlertRequest>,
) -> ApiResult<(StatusCode, Json<Alert>)> {
    if request.name.trim().is_empty() {
        return Err(ApiError::InvalidRequest("alert name must not be empty".to_string()));
    }

    let alert = state.monitor.raise_manual_alert(
        request.instance_id,
        request.name,
        request.severity,
        request.title,
        request.message,
    )?;

    Ok((StatusCode::CREATED, Json(alert)))
}

/// POST /api/v1/alerts/{id}/acknowledge
pub async fn acknowledge_alert(
    State(state): State<ApiState>,
    Path(id): Path<AlertId>,
    Json(request): Json<AcknowledgeRequest>,
) -> ApiResult<Json<Alert>> {
    Ok(Json(state.monitor.acknowledge_alert(
        id,
        &request.by,
        request.comment,
    )?))
}

/// POST /api/v1/alerts/{id}/resolve
pub async fn resolve_alert(
    State(state): State<ApiState>,
    Path(id): Path<AlertId>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<Json<Alert>> {
    Ok(Json(state.monitor.resolve_alert(id, &request.by)?))
}
