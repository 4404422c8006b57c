//! Integration tests for storage persistence
//!
//! These tests verify that:
//! - Snapshots and alert changes reach the backend through the storage actor
//! - Alerts survive a restart and keep deduplicating
//! - Retention cleanup removes old data but keeps open alerts
//! - A monitor built from a config file persists what it collects

use std::sync::Arc;
use std::time::Duration;

use fleetwatch::{
    actors::storage::StorageHandle,
    alerts::{AlertStatus, Severity},
    cancel::CancelScope,
    config::read_config_file,
    monitor::Monitor,
    scheduler::{JobKind, run_cycle},
    storage::{MemoryBackend, StorageBackend},
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use crate::helpers::*;

#[tokio::test]
async fn test_pipeline_feeds_backend() {
    let backend = Arc::new(MemoryBackend::new());
    let storage = StorageHandle::spawn(backend.clone());

    let source = ScriptedSource::new();
    source.set(1, cpu(95.0));
    let monitor = start(builder(source, &[1]).storage(storage, None)).await;

    run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;
    tokio::time::sleep(Duration::from_millis(2)).await;
    run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;

    let alert = monitor.active_alerts().remove(0);
    monitor.acknowledge_alert(alert.id, "dba", None).unwrap();

    let storage = monitor.storage().unwrap();
    storage.flush().await.unwrap();

    let snapshots = backend.latest_snapshots(1, 10).await.unwrap();
    assert_eq!(snapshots.len(), 2);
    assert!(snapshots[0].timestamp >= snapshots[1].timestamp);

    let alerts = backend.load_alerts(Some(1)).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].status, AlertStatus::Acknowledged);
    assert_eq!(alerts[0].acknowledged_by.as_deref(), Some("dba"));

    let stats = storage.get_stats().await.unwrap();
    assert_eq!(stats.snapshots_written, 2);
    assert_eq!(stats.dropped_records, 0);

    monitor.shutdown().await;
}

#[tokio::test]
async fn test_retention_keeps_open_alerts() {
    let backend = Arc::new(MemoryBackend::new());
    let storage = StorageHandle::spawn(backend.clone());

    let source = ScriptedSource::new();
    source.set(1, cpu(95.0));
    source.set(2, cpu(95.0));
    let monitor = start(
        builder(source.clone(), &[1, 2]).storage(storage, Some(Duration::ZERO)),
    )
    .await;

    run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;
    source.set(1, cpu(10.0));
    run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;

    tokio::time::sleep(Duration::from_millis(10)).await;

    let report = monitor.apply_retention().await.unwrap();
    assert_eq!(report.snapshots_deleted, 4);
    assert_eq!(report.alerts_deleted, 1);

    let remaining = backend.load_alerts(None).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].instance_id, 2);

    // resolved alerts are purged from memory as well
    assert!(monitor.alerts_for_instance(1).unwrap().is_empty());
    assert_eq!(monitor.alerts_for_instance(2).unwrap().len(), 1);

    monitor.shutdown().await;
}

#[cfg(feature = "storage-sqlite")]
#[tokio::test]
async fn test_alerts_survive_restart() {
    use fleetwatch::storage::sqlite::SqliteBackend;

    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("fleetwatch.db");

    let source = ScriptedSource::new();
    source.set(1, cpu(93.0));

    let first_id = {
        let backend = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
        let monitor = start(
            builder(source.clone(), &[1]).storage(StorageHandle::spawn(backend), None),
        )
        .await;

        run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;
        let id = monitor.active_alerts()[0].id;

        // shutdown flushes buffered records before closing the pool
        monitor.shutdown().await;
        id
    };

    let backend = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
    let history = backend.load_alerts(None).await.unwrap();
    assert_eq!(history.len(), 1);

    let monitor = start(
        builder(source.clone(), &[1])
            .storage(StorageHandle::spawn(backend.clone()), None)
            .restore_alerts(history),
    )
    .await;

    // the restored alert is still open, so the breach raises nothing new
    run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;
    assert_eq!(monitor.active_alerts().len(), 1);
    assert_eq!(monitor.active_alerts()[0].id, first_id);

    let manual = monitor
        .raise_manual_alert(1, "failover", Severity::Warning, "Failover", "Planned failover")
        .unwrap();
    assert!(manual.id > first_id);

    monitor.storage().unwrap().flush().await.unwrap();
    assert_eq!(backend.latest_snapshots(1, 10).await.unwrap().len(), 2);

    monitor.shutdown().await;
}

#[tokio::test]
async fn test_monitor_from_config_file() {
    let agent = mock_agent(&cpu(50.0)).await;

    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.json");
    let address = agent_address(&agent);
    let (host, port) = address.split_once(':').unwrap();
    std::fs::write(
        &config_path,
        format!(
            r#"{{
                "instances": [ {{ "id": 3, "name": "billing", "host": "{host}", "port": {port} }} ],
                "storage": {{ "backend": "memory", "snapshots_per_instance": 5 }}
            }}"#
        ),
    )
    .unwrap();

    let config = read_config_file(config_path.to_str().unwrap()).unwrap();
    let monitor = Arc::new(Monitor::from_config(&config).await.unwrap());
    assert_eq!(monitor.instances().len(), 1);
    assert_eq!(monitor.instances()[0].name, "billing");

    for _ in 0..7 {
        run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;
    }

    let storage = monitor.storage().unwrap();
    storage.flush().await.unwrap();
    assert_eq!(storage.latest_snapshots(3, 100).await.unwrap().len(), 5);

    let health = storage.health_check().await.unwrap();
    assert!(health.healthy);

    monitor.shutdown().await;
}
