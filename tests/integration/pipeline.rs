//! End-to-end pipeline tests
//!
//! These tests verify that:
//! - A cycle polls agents over HTTP and raises alerts from their readings
//! - Subscribers see the events of a cycle in order
//! - Recovered metrics resolve their alerts automatically
//! - The full collection job picks up directory changes

use std::sync::Arc;

use assert_matches::assert_matches;
use fleetwatch::{
    Metric, Readings,
    alerts::{AlertStatus, AlertType, Severity},
    broadcast::{Interest, MonitorEvent},
    cancel::CancelScope,
    collector::HttpSnapshotSource,
    monitor::Monitor,
    registry::StaticDirectory,
    scheduler::{InstanceOutcome, JobKind, run_cycle},
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_http_cycle_raises_critical_cpu_alert() {
    let hot = mock_agent(&cpu(96.0).with(Metric::MemoryPercent, 40.0)).await;
    let idle = mock_agent(&cpu(12.0)).await;

    let directory = StaticDirectory::new(vec![
        descriptor(1, agent_address(&hot)),
        descriptor(2, agent_address(&idle)),
    ]);
    let source = Arc::new(HttpSnapshotSource::new().unwrap());
    let monitor = Arc::new(Monitor::builder(Arc::new(directory), source).build().unwrap());

    let report = run_cycle(&monitor, JobKind::FullCollection, CancelScope::never()).await;

    assert_eq!(report.collected(), 2);
    assert_eq!(
        report.outcomes[&1],
        InstanceOutcome::Collected {
            alerts_raised: 1,
            alerts_resolved: 0,
        }
    );

    let alerts = monitor.active_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].instance_id, 1);
    assert_eq!(alerts[0].alert_type, AlertType::Threshold(Metric::CpuPercent));
    assert_eq!(alerts[0].severity, Severity::Critical);
    assert!(alerts[0].message.contains("96%"), "{}", alerts[0].message);

    let view = monitor.current_snapshot(1).unwrap();
    assert!(!view.stale);
    assert_eq!(view.snapshot.unwrap().metric(Metric::MemoryPercent), Some(40.0));
}

#[tokio::test]
async fn test_subscriber_sees_cycle_in_order() {
    let source = ScriptedSource::new();
    source.set(5, cpu(85.0));
    let monitor = start(builder(source, &[5])).await;
    let mut events = monitor.subscribe("dashboard", Interest::instances([5]));

    run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;

    assert_matches!(
        events.receiver.recv().await,
        Some(MonitorEvent::InstanceStatus { instance_id: 5, online: true, .. })
    );
    assert_matches!(
        events.receiver.recv().await,
        Some(MonitorEvent::SnapshotUpdate { instance_id: 5, .. })
    );
    assert_matches!(
        events.receiver.recv().await,
        Some(MonitorEvent::AlertRaised { alert }) if alert.severity == Severity::Warning
    );
    assert_matches!(
        events.receiver.recv().await,
        Some(MonitorEvent::CycleCompleted { summary }) if summary.job == JobKind::Performance
    );
}

#[tokio::test]
async fn test_recovery_resolves_threshold_alert_only() {
    let source = ScriptedSource::new();
    source.set(1, cpu(92.0));
    let monitor = start(builder(source.clone(), &[1])).await;

    run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;
    let manual = monitor
        .raise_manual_alert(1, "maintenance", Severity::Warning, "Maintenance", "Patching")
        .unwrap();
    assert_eq!(monitor.summary().critical_alerts, 1);

    source.set(1, cpu(30.0));
    let report = run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;
    assert_eq!(
        report.outcomes[&1],
        InstanceOutcome::Collected {
            alerts_raised: 0,
            alerts_resolved: 1,
        }
    );

    let open = monitor.active_alerts();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, manual.id);

    let history = monitor.alerts_for_instance(1).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, AlertStatus::Resolved);
    assert_eq!(history[0].resolved_by.as_deref(), Some("system"));
}

#[tokio::test]
async fn test_missing_metric_neither_raises_nor_resolves() {
    let source = ScriptedSource::new();
    source.set(1, cpu(95.0));
    let monitor = start(builder(source.clone(), &[1])).await;

    run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;
    assert_eq!(monitor.active_alerts().len(), 1);

    // cpu can no longer be read
    source.set(1, Readings::default().with(Metric::MemoryPercent, 20.0));
    run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;

    assert_eq!(monitor.active_alerts().len(), 1);
}

#[tokio::test]
async fn test_acknowledged_alert_still_deduplicates() {
    let source = ScriptedSource::new();
    source.set(1, cpu(91.0));
    let monitor = start(builder(source, &[1])).await;

    run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;
    let alert = monitor.active_alerts().remove(0);
    monitor
        .acknowledge_alert(alert.id, "dba", Some("looking".to_string()))
        .unwrap();

    let report = run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;

    assert_eq!(
        report.outcomes[&1],
        InstanceOutcome::Collected {
            alerts_raised: 0,
            alerts_resolved: 0,
        }
    );
    assert_eq!(monitor.alerts_for_instance(1).unwrap().len(), 1);
    assert_eq!(monitor.summary().acknowledged_alerts, 1);
}
