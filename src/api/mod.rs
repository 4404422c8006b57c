//! REST API and WebSocket server for the monitoring hub
//!
//! The API is a thin layer over the [`Monitor`](crate::monitor::Monitor)
//! command surface and its event feed.
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Health check including storage status
//! - `GET /api/v1/summary` - Dashboard counters
//! - `GET /api/v1/instances` - Monitored instances with their latest snapshot
//! - `GET /api/v1/instances/{id}/snapshot` - Current snapshot of one instance
//! - `GET /api/v1/instances/{id}/history` - Persisted snapshots, newest first
//! - `GET /api/v1/instances/{id}/alerts` - Alert history of one instance
//! - `GET /api/v1/alerts` - Open alerts
//! - `POST /api/v1/alerts` - Raise a manual alert
//! - `POST /api/v1/alerts/{id}/acknowledge` - Acknowledge an alert
//! - `POST /api/v1/alerts/{id}/resolve` - Resolve an alert
//! - `WS /api/v1/stream?instances=5,7` - Live monitor events

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod state;
#[cfg(feature = "api")]
pub mod types;
#[cfg(feature = "api")]
pub mod websocket;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use state::ApiState;
#[cfg(feature = "api")]
pub use types::{
    AcknowledgeRequest, AlertsResponse, HealthResponse, InstancesResponse, ManualAlertRequest,
    ResolveRequest, SnapshotHistoryResponse,
};

#[cfg(feature = "api")]
use axum::{
    Router,
    routing::{get, post},
};
use std::net::{Ipv4Addr, SocketAddr};
#[cfg(feature = "api")]
use tracing::info;

/// API server configuration
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Enable CORS for dashboard
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            enable_cors: default_enable_cors(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8080))
}

fn default_enable_cors() -> bool {
    true
}

/// Build the router with all routes
#[cfg(feature = "api")]
pub fn router(config: &ApiConfig, state: ApiState) -> Router {
    use tower::ServiceBuilder;
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/summary", get(routes::summary::get_summary))
        .route("/api/v1/instances", get(routes::instances::list_instances))
        .route(
            "/api/v1/instances/:id/snapshot",
            get(routes::instances::get_snapshot),
        )
        .route(
            "/api/v1/instances/:id/history",
            get(routes::instances::get_history),
        )
        .route(
            "/api/v1/instances/:id/alerts",
            get(routes::alerts::list_instance_alerts),
        )
        .route(
            "/api/v1/alerts",
            get(routes::alerts::list_alerts).post(routes::alerts::raise_alert),
        )
        .route(
            "/api/v1/alerts/:id/acknowledge",
            post(routes::alerts::acknowledge_alert),
        )
        .route(
            "/api/v1/alerts/:id/resolve",
            post(routes::alerts::resolve_alert),
        )
        .route("/api/v1/stream", get(websocket::websocket_handler))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
#[cfg(feature = "api")]
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(&config, state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
