//! Instance endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use crate::InstanceId;
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{InstancesResponse, SnapshotHistoryResponse},
};
use crate::monitor::InstanceView;

/// Query parameters for the snapshot history
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Max results (default: 100)
    limit: Option<usize>,
}

const DEFAULT_HISTORY_LIMIT: usize = 100;
const MAX_HISTORY_LIMIT: usize = 10_000;

/// GET /api/v1/instances
///
/// All monitored instances, ordered by id, with their latest snapshot
pub async fn list_instances(State(state): State<ApiState>) -> ApiResult<Json<InstancesResponse>> {
    let instances = state
        .monitor
        .instances()
        .into_iter()
        .map(|instance| state.monitor.current_snapshot(instance.id))
        .collect::<Result<Vec<InstanceView>, _>>()?;

    Ok(Json(InstancesResponse {
        count: instances.len(),
        instances,
    }))
}

/// GET /api/v1/instances/{id}/snapshot
///
/// Answers with the last known snapshot even when the instance is offline;
/// `stale` tells whether it can be trusted
pub async fn get_snapshot(
    State(state): State<ApiState>,
    Path(id): Path<InstanceId>,
) -> ApiResult<Json<InstanceView>> {
    Ok(Json(state.monitor.current_snapshot(id)?))
}

/// GET /api/v1/instances/{id}/history?limit=N
pub async fn get_history(
    State(state): State<ApiState>,
    Path(id): Path<InstanceId>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<SnapshotHistoryResponse>> {
    if !state.monitor.registry().contains(id) {
        return Err(ApiError::NotFound(format!("instance {id} not found")));
    }

    let storage = state
        .monitor
        .storage()
        .ok_or_else(|| ApiError::Unavailable("storage is disabled".to_string()))?;

    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    if limit == 0 || limit > MAX_HISTORY_LIMIT {
        return Err(ApiError::InvalidRequest(format!(
            "limit must be between 1 and {MAX_HISTORY_LIMIT}"
        )));
    }

    let snapshots = storage.latest_snapshots(id, limit).await?;

    Ok(Json(SnapshotHistoryResponse {
        instance_id: id,
        count: snapshots.len(),
        snapshots,
    }))
}
