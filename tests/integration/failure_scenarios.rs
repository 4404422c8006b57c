//! Failure scenario tests
//!
//! These tests verify graceful degradation:
//! - Unreachable instances stay in the registry with stale data
//! - One broken agent never affects the rest of the cycle
//! - Slow subscribers are dropped instead of blocking the pipeline
//! - A failing instance directory keeps the current registry

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use fleetwatch::{
    broadcast::{Interest, MonitorEvent},
    cancel::CancelScope,
    collector::HttpSnapshotSource,
    monitor::Monitor,
    registry::{InstanceDescriptor, InstanceDirectory, StaticDirectory},
    scheduler::{InstanceOutcome, JobKind, run_cycle},
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_agent_errors_are_unreachable_outcomes() {
    let healthy = mock_agent(&cpu(20.0)).await;

    let broken = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/snapshot"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&broken)
        .await;

    let garbage = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/snapshot"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&garbage)
        .await;

    let directory = StaticDirectory::new(vec![
        descriptor(1, agent_address(&healthy)),
        descriptor(2, agent_address(&broken)),
        descriptor(3, agent_address(&garbage)),
    ]);
    let source = Arc::new(HttpSnapshotSource::new().unwrap());
    let monitor = Arc::new(Monitor::builder(Arc::new(directory), source).build().unwrap());

    let report = run_cycle(&monitor, JobKind::FullCollection, CancelScope::never()).await;

    assert_eq!(report.collected(), 1);
    assert_eq!(report.unreachable(), 2);
    assert_matches!(report.outcomes[&2], InstanceOutcome::Unreachable { .. });
    assert_matches!(report.outcomes[&3], InstanceOutcome::Unreachable { .. });
    assert_eq!(monitor.summary().online_instances, 1);
}

#[tokio::test]
async fn test_instance_going_offline_keeps_last_snapshot() {
    let source = ScriptedSource::new();
    source.set(1, cpu(40.0));
    let monitor = start(builder(source.clone(), &[1])).await;

    run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;
    let seen = monitor.registry().last_seen(1);
    assert!(seen.is_some());

    let mut events = monitor.subscribe("status", Interest::All);
    source.readings.remove(&1);

    run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;
    run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;

    let view = monitor.current_snapshot(1).unwrap();
    assert!(view.stale);
    assert!(!view.instance.online);
    assert_eq!(view.instance.last_seen, seen);
    assert!(view.snapshot.is_some());

    // one status transition, then only cycle reports
    assert_matches!(
        events.receiver.recv().await,
        Some(MonitorEvent::InstanceStatus { online: false, last_seen, .. }) if last_seen == seen
    );
    let mut rest = Vec::new();
    while let Ok(event) = events.receiver.try_recv() {
        rest.push(event);
    }
    assert_eq!(rest.len(), 2);
    assert!(rest.iter().all(|e| matches!(e, MonitorEvent::CycleCompleted { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_hanging_agent_times_out() {
    let source = ScriptedSource::with_delay(Duration::from_secs(120));
    source.set(1, cpu(10.0));
    let monitor = start(
        builder(source, &[1]).collector_timeout(Duration::from_secs(5)),
    )
    .await;

    let report = run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;

    assert_matches!(
        &report.outcomes[&1],
        InstanceOutcome::Unreachable { reason } if reason.contains("timed out")
    );
    assert!((report.finished_at - report.started_at).num_seconds() < 60);
}

#[tokio::test]
async fn test_slow_subscriber_is_dropped() {
    let source = ScriptedSource::new();
    source.set(1, cpu(10.0));
    let monitor = start(builder(source, &[1]).broadcaster(4, 2)).await;

    // never reads
    let _stalled = monitor.subscribe("stalled", Interest::All);
    let mut live = monitor.subscribe("live", Interest::All);

    for _ in 0..3 {
        run_cycle(&monitor, JobKind::Performance, CancelScope::never()).await;
        while live.receiver.try_recv().is_ok() {}
    }

    assert_eq!(monitor.summary().subscribers, 1);
    assert_eq!(monitor.active_alerts().len(), 0);
}

struct FailingDirectory;

#[async_trait]
impl InstanceDirectory for FailingDirectory {
    async fn list_instances(&self) -> anyhow::Result<Vec<InstanceDescriptor>> {
        anyhow::bail!("inventory database unavailable")
    }
}

#[tokio::test]
async fn test_directory_failure_keeps_registry() {
    let source = ScriptedSource::new();
    source.set(1, cpu(10.0));
    let monitor = Arc::new(
        Monitor::builder(Arc::new(FailingDirectory), source)
            .build()
            .unwrap(),
    );
    monitor.registry().register(fleetwatch::Instance::new(1, "sql-1", "10.0.0.1:51243"));

    assert!(monitor.sync_directory().await.is_err());

    let report = run_cycle(&monitor, JobKind::FullCollection, CancelScope::never()).await;
    assert_eq!(report.collected(), 1);
    assert!(monitor.registry().contains(1));
}
