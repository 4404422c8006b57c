//! WebSocket handler for live monitor events
//!
//! Every connection is one broadcaster subscription. The client picks the
//! instances it cares about with `?instances=5,7`; without the parameter it
//! receives events of every instance. Instance-less events (cycle reports)
//! are always delivered.

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::InstanceId;
use crate::alerts::Alert;
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
};
use crate::broadcast::Interest;
use crate::monitor::Summary;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Comma separated instance ids
    instances: Option<String>,
}

/// First message sent on every connection
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename = "hello")]
struct Hello {
    summary: Summary,
    alerts: Vec<Alert>,
}

fn parse_interest(raw: Option<&str>) -> ApiResult<Interest> {
    let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
        return Ok(Interest::All);
    };

    let ids = raw
        .split(',')
        .map(|id| id.trim().parse::<InstanceId>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ApiError::InvalidRequest(format!("invalid instance list {raw:?}: {e}")))?;

    Ok(Interest::instances(ids))
}

/// WebSocket upgrade handler
///
/// GET /api/v1/stream
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Response> {
    let interest = parse_interest(query.instances.as_deref())?;
    Ok(ws.on_upgrade(|socket| handle_websocket(socket, state, interest)))
}

async fn handle_websocket(socket: WebSocket, state: ApiState, interest: Interest) {
    let monitor = state.monitor;
    let subscription = monitor.subscribe("websocket", interest.clone());
    let token = subscription.token;
    let mut events = subscription.receiver;

    info!("WebSocket client connected (subscription {token})");

    let (mut sender, mut receiver) = socket.split();

    let hello = Hello {
        summary: monitor.summary(),
        alerts: monitor
            .active_alerts()
            .into_iter()
            .filter(|alert| interest.matches(Some(alert.instance_id)))
            .collect(),
    };

    let greeted = match serde_json::to_string(&hello) {
        Ok(text) => sender.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            warn!("failed to encode initial state: {e}");
            false
        }
    };

    if greeted {
        let mut send_task = tokio::spawn(async move {
            // ends when the broadcaster drops the subscription
            while let Some(event) = events.recv().await {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("failed to encode event: {e}");
                        continue;
                    }
                };

                if sender.send(Message::Text(text)).await.is_err() {
                    debug!("WebSocket send failed, client disconnected");
                    break;
                }
            }
        });

        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(msg)) = receiver.next().await {
                if let Message::Close(_) = msg {
                    break;
                }
            }
        });

        tokio::select! {
            _ = (&mut send_task) => {
                recv_task.abort();
            }
            _ = (&mut recv_task) => {
                send_task.abort();
            }
        }
    }

    monitor.unsubscribe(token);
    info!("WebSocket client disconnected (subscription {token})");
}
