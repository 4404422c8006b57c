//! API error types and conversions

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::MonitorError;

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    /// Invalid request parameters
    InvalidRequest(String),

    /// Resource not found
    NotFound(String),

    /// The request conflicts with the current alert state
    Conflict(String),

    /// Requested feature is not configured (e.g. no storage)
    Unavailable(String),

    /// Internal server error
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        let message = err.to_string();
        match err {
            MonitorError::AlertNotFound(_) | MonitorError::InstanceNotFound(_) => {
                ApiError::NotFound(message)
            }
            MonitorError::InvalidTransition { .. } | MonitorError::DuplicateAlert { .. } => {
                ApiError::Conflict(message)
            }
            MonitorError::Configuration(_) => ApiError::InvalidRequest(message),
            MonitorError::Unreachable { .. }
            | MonitorError::DeliveryFailure { .. }
            | MonitorError::Cancelled => ApiError::Internal(message),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(format!("{err:#}"))
    }
}
