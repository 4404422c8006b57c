//! Dashboard summary endpoint

use axum::{Json, extract::State};

use crate::api::state::ApiState;
use crate::monitor::Summary;

/// GET /api/v1/summary
pub async fn get_summary(State(state): State<ApiState>) -> Json<Summary> {
    Json(state.monitor.summary())
}
