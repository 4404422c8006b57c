//! Concurrency and race condition tests
//!
//! These tests verify thread-safety under concurrent operation:
//! - Both jobs processing the same instance at once
//! - Concurrent evaluation never opens two alerts for one pair
//! - Racing lifecycle commands on one alert
//! - Racing acknowledge and resolve never reorder events or stored state
//! - Per-instance event order across a multi-threaded cycle

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fleetwatch::{
    InstanceId, Metric,
    actors::storage::{StorageHandle, StorageOptions},
    alerts::{AlertId, AlertStatus, AlertStore, AlertType, NewAlert, Severity},
    broadcast::{Interest, MonitorEvent},
    cancel::CancelScope,
    scheduler::{InstanceOutcome, JobKind, run_cycle},
    storage::{MemoryBackend, StorageBackend},
};

use crate::helpers::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pipelines_open_one_alert() {
    let source = ScriptedSource::with_delay(Duration::from_millis(5));
    source.set(1, cpu(97.0));
    let monitor = start(builder(source.clone(), &[1])).await;

    let mut tasks = vec![];
    for _ in 0..16 {
        let monitor = monitor.clone();
        tasks.push(tokio::spawn(async move {
            monitor.process_instance(1, &CancelScope::never()).await
        }));
    }

    let mut raised = 0;
    for task in tasks {
        if let InstanceOutcome::Collected { alerts_raised, .. } = task.await.unwrap() {
            raised += alerts_raised;
        }
    }

    assert_eq!(source.calls(), 16);
    assert_eq!(raised, 1);
    assert_eq!(monitor.active_alerts().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_create_is_deduplicated() {
    let store = Arc::new(AlertStore::new());

    let mut tasks = vec![];
    for i in 0..32 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store.create(NewAlert {
                instance_id: 7,
                alert_type: AlertType::Threshold(Metric::MemoryPercent),
                severity: if i % 2 == 0 {
                    Severity::Warning
                } else {
                    Severity::Critical
                },
                title: "High memory".to_string(),
                message: format!("attempt {i}"),
            })
        }));
    }

    let mut created = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            created += 1;
        }
    }

    assert_eq!(created, 1);
    assert_eq!(
        store
            .active_alerts_for(7, &AlertType::Threshold(Metric::MemoryPercent))
            .len(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_acknowledge_has_one_winner() {
    let source = ScriptedSource::new();
    let monitor = start(builder(source, &[1])).await;
    let alert = monitor
        .raise_manual_alert(1, "disk", Severity::Critical, "Disk", "Disk almost full")
        .unwrap();

    let mut tasks = vec![];
    for i in 0..10 {
        let monitor = monitor.clone();
        tasks.push(tokio::spawn(async move {
            monitor.acknowledge_alert(alert.id, &format!("dba-{i}"), None)
        }));
    }

    let mut winners = vec![];
    for task in tasks {
        if let Ok(alert) = task.await.unwrap() {
            winners.push(alert);
        }
    }

    assert_eq!(winners.len(), 1);
    let stored = monitor.alerts().get(alert.id).unwrap();
    assert_eq!(stored.acknowledged_by, winners[0].acknowledged_by);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_per_instance_event_order() {
    let ids: Vec<InstanceId> = (1..=6).collect();
    let source = ScriptedSource::with_delay(Duration::from_millis(1));
    for &id in &ids {
        source.set(id, cpu(10.0));
    }
    let monitor = start(builder(source.clone(), &ids).workers(3).broadcaster(1024, 3)).await;
    let mut events = monitor.subscribe("ordering", Interest::All);

    for round in 1..=5 {
        for &id in &ids {
            source.set(id, cpu(f64::from(round)));
        }
        run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;
    }

    let mut seen: HashMap<InstanceId, Vec<f64>> = HashMap::new();
    while let Ok(event) = events.receiver.try_recv() {
        if let MonitorEvent::SnapshotUpdate { instance_id, snapshot } = event {
            seen.entry(instance_id)
                .or_default()
                .push(snapshot.metric(Metric::CpuPercent).unwrap());
        }
    }

    assert_eq!(seen.len(), ids.len());
    for values in seen.values() {
        assert_eq!(values, &vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_acknowledge_and_resolve_keep_order() {
    let backend = Arc::new(MemoryBackend::new());
    let storage = StorageHandle::spawn_with_options(
        backend.clone(),
        StorageOptions {
            queue_capacity: 4096,
            ..StorageOptions::default()
        },
    );
    let monitor = start(
        builder(ScriptedSource::new(), &[1])
            .broadcaster(4096, 3)
            .storage(storage, None),
    )
    .await;
    let mut events = monitor.subscribe("ordering", Interest::All);

    let ids: Vec<AlertId> = (0..300)
        .map(|i| {
            monitor
                .raise_manual_alert(1, format!("check-{i}"), Severity::Warning, "Check", "")
                .unwrap()
                .id
        })
        .collect();

    std::thread::scope(|s| {
        s.spawn(|| {
            for &id in &ids {
                let _ = monitor.acknowledge_alert(id, "dba-a", None);
            }
        });
        s.spawn(|| {
            for &id in &ids {
                let _ = monitor.resolve_alert(id, "dba-b");
            }
        });
    });

    let mut seen: HashMap<AlertId, Vec<AlertStatus>> = HashMap::new();
    while let Ok(event) = events.receiver.try_recv() {
        if let MonitorEvent::AlertRaised { alert } | MonitorEvent::AlertChanged { alert } = event {
            seen.entry(alert.id).or_default().push(alert.status);
        }
    }

    assert_eq!(seen.len(), ids.len());
    for (id, statuses) in &seen {
        assert!(
            statuses.windows(2).all(|pair| pair[0] < pair[1]),
            "alert {id} went backwards: {statuses:?}"
        );
        assert_eq!(statuses.last(), Some(&AlertStatus::Resolved));
    }

    monitor.storage().unwrap().flush().await.unwrap();
    let stored = backend.load_alerts(Some(1)).await.unwrap();
    assert_eq!(stored.len(), ids.len());
    for alert in stored {
        assert_eq!(Some(alert.clone()), monitor.alerts().get(alert.id));
    }
    assert!(monitor.active_alerts().is_empty());

    monitor.shutdown().await;
}
