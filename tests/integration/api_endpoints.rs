//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - All REST endpoints return correct responses
//! - Alert commands map lifecycle errors to 404/409
//! - Offline instances are served as stale data
//! - WebSocket streaming honours the instance filter

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use fleetwatch::{
    actors::storage::StorageHandle,
    api::{ApiConfig, ApiState, spawn_api_server},
    cancel::CancelScope,
    monitor::Monitor,
    scheduler::{JobKind, run_cycle},
    storage::MemoryBackend,
};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;

use crate::helpers::*;

// Helper to create test API server
async fn spawn_test_api(monitor: Arc<Monitor>) -> SocketAddr {
    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(), // Random port
        enable_cors: true,
    };

    spawn_api_server(config, ApiState::new(monitor)).await.unwrap()
}

async fn next_json<S>(socket: &mut S) -> Value
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let message = socket.next().await.unwrap().unwrap();
    serde_json::from_str(&message.into_text().unwrap()).unwrap()
}

async fn fleet() -> (Arc<Monitor>, Arc<ScriptedSource>) {
    let source = ScriptedSource::new();
    source.set(1, cpu(96.0));
    source.set(2, cpu(15.0));
    let storage = StorageHandle::spawn(Arc::new(MemoryBackend::new()));
    let monitor = start(builder(source.clone(), &[1, 2, 3]).storage(storage, None)).await;
    (monitor, source)
}

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let (monitor, _) = fleet().await;
    let addr = spawn_test_api(monitor).await;

    let response = reqwest::get(format!("http://{addr}/api/v1/health"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = response.json().await.unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["timestamp"].is_string());
    assert_eq!(json["storage"]["healthy"], true);
}

#[tokio::test]
async fn test_instances_and_summary() {
    let (monitor, _) = fleet().await;
    run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;
    let addr = spawn_test_api(monitor).await;
    let client = reqwest::Client::new();

    let json: Value = client
        .get(format!("http://{addr}/api/v1/summary"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["total_instances"], 3);
    assert_eq!(json["online_instances"], 2);
    assert_eq!(json["critical_alerts"], 1);

    let json: Value = client
        .get(format!("http://{addr}/api/v1/instances"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["count"], 3);
    assert_eq!(json["instances"][0]["instance"]["id"], 1);
    assert_eq!(json["instances"][0]["snapshot"]["cpu_percent"], 96.0);
    assert_eq!(json["instances"][0]["stale"], false);

    // never reached: no snapshot, reported as stale rather than an error
    let response = client
        .get(format!("http://{addr}/api/v1/instances/3/snapshot"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["stale"], true);
    assert!(json["snapshot"].is_null());

    let response = client
        .get(format!("http://{addr}/api/v1/instances/42/snapshot"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json: Value = client
        .get(format!("http://{addr}/api/v1/instances/1/history?limit=5"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["instance_id"], 1);
    assert_eq!(json["count"], 1);
}

#[tokio::test]
async fn test_alert_lifecycle_over_http() {
    let (monitor, _) = fleet().await;
    run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;
    let addr = spawn_test_api(monitor).await;
    let client = reqwest::Client::new();

    let json: Value = client
        .get(format!("http://{addr}/api/v1/alerts"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["count"], 1);
    let alert_id = json["alerts"][0]["id"].as_u64().unwrap();
    assert_eq!(json["alerts"][0]["severity"], "Critical");

    let acknowledge = json!({ "by": "dba", "comment": "investigating" });
    let response = client
        .post(format!("http://{addr}/api/v1/alerts/{alert_id}/acknowledge"))
        .json(&acknowledge)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["status"], "Acknowledged");
    assert_eq!(json["acknowledge_comment"], "investigating");

    // second acknowledge is a conflict
    let response = client
        .post(format!("http://{addr}/api/v1/alerts/{alert_id}/acknowledge"))
        .json(&acknowledge)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json: Value = response.json().await.unwrap();
    assert!(json["error"].as_str().unwrap().contains("acknowledge"));

    let response = client
        .post(format!("http://{addr}/api/v1/alerts/{alert_id}/resolve"))
        .json(&json!({ "by": "dba" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .post(format!("http://{addr}/api/v1/alerts/999/resolve"))
        .json(&json!({ "by": "dba" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_manual_alert_endpoint() {
    let (monitor, _) = fleet().await;
    let addr = spawn_test_api(monitor).await;
    let client = reqwest::Client::new();

    let body = json!({
        "instance_id": 2,
        "name": "maintenance",
        "severity": "Warning",
        "title": "Maintenance window",
        "message": "Patching until 22:00",
    });

    let response = client
        .post(format!("http://{addr}/api/v1/alerts"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["alert_type"]["kind"], "manual");
    assert_eq!(json["alert_type"]["name"], "maintenance");

    let response = client
        .post(format!("http://{addr}/api/v1/alerts"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let mut unknown = body.clone();
    unknown["instance_id"] = json!(77);
    let response = client
        .post(format!("http://{addr}/api/v1/alerts"))
        .json(&unknown)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json: Value = client
        .get(format!("http://{addr}/api/v1/instances/2/alerts"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["count"], 1);
}

#[tokio::test]
async fn test_websocket_stream_filters_instances() {
    let (monitor, _) = fleet().await;
    let addr = spawn_test_api(monitor.clone()).await;

    let (mut socket, _) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/api/v1/stream?instances=2"))
            .await
            .unwrap();

    let hello = next_json(&mut socket).await;
    assert_eq!(hello["type"], "hello");
    assert_eq!(hello["summary"]["total_instances"], 3);

    run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;

    // instance 1 raised an alert, but only events of instance 2 and the
    // cycle report are streamed
    let mut types = Vec::new();
    loop {
        let event = next_json(&mut socket).await;
        let kind = event["type"].as_str().unwrap().to_string();
        if let Some(id) = event["instance_id"].as_u64() {
            assert_eq!(id, 2);
        }
        types.push(kind.clone());
        if kind == "cycle_completed" {
            break;
        }
    }
    assert_eq!(types, vec!["instance_status", "snapshot_update", "cycle_completed"]);
}

#[tokio::test]
async fn test_websocket_rejects_invalid_filter() {
    let (monitor, _) = fleet().await;
    let addr = spawn_test_api(monitor).await;

    let result =
        tokio_tungstenite::connect_async(format!("ws://{addr}/api/v1/stream?instances=a,b")).await;
    assert!(result.is_err());
}
