//! Monitor - owns the monitoring components and runs the per-instance
//! pipeline
//!
//! ## Pipeline
//!
//! ```text
//! pipeline lock ─▶ Collector::collect ─▶ AlertEvaluator::evaluate ─▶ AlertStore
//!                        │                                             │
//!                        └────────────── Broadcaster::publish ◀────────┘
//!                                              │
//!                                  StorageHandle::record (try_send)
//! ```
//!
//! The pipeline of one instance always runs under that instance's lock,
//! so collection, evaluation, store mutation and broadcast happen in strict
//! sequence per instance even when both jobs tick at once.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, trace, warn};

use crate::alerts::{
    Alert, AlertDecision, AlertEvaluator, AlertId, AlertRule, AlertStore, AlertType, NewAlert,
    Severity, default_rules,
};
use crate::actors::storage::StorageHandle;
use crate::broadcast::{
    Broadcaster, DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_CONSECUTIVE_FAILURES, Interest,
    MonitorEvent, Subscription, SubscriptionToken,
};
use crate::cancel::CancelScope;
use crate::collector::{Collector, DEFAULT_TIMEOUT, HttpSnapshotSource, SnapshotSource};
use crate::config::{Config, StorageConfig};
use crate::registry::{InstanceDirectory, InstanceRegistry, StaticDirectory, SyncReport};
use crate::scheduler::InstanceOutcome;
use crate::storage::{CleanupReport, MemoryBackend, StorageBackend};
use crate::{Instance, InstanceId, MonitorError, MonitorResult, PerformanceSnapshot};

/// Default age after which a snapshot is reported as stale
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

/// Default size of the per-cycle worker pool
pub const DEFAULT_WORKERS: usize = 8;

/// Instance with its latest snapshot, returned even when the instance is
/// offline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceView {
    pub instance: Instance,
    pub snapshot: Option<PerformanceSnapshot>,

    /// The snapshot does not reflect the current state of the instance
    pub stale: bool,
}

/// Dashboard counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total_instances: usize,
    pub online_instances: usize,
    pub offline_instances: usize,
    pub active_alerts: usize,
    pub acknowledged_alerts: usize,
    pub critical_alerts: usize,
    pub subscribers: usize,
}

pub struct Monitor {
    registry: Arc<InstanceRegistry>,
    directory: Arc<dyn InstanceDirectory>,
    collector: Collector,
    evaluator: AlertEvaluator,
    alerts: AlertStore,
    broadcaster: Broadcaster,
    storage: Option<StorageHandle>,
    stale_after: chrono::Duration,
    retention: Option<chrono::Duration>,
    workers: usize,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("instances", &self.registry.len())
            .field("alerts", &self.alerts.counts())
            .field("subscribers", &self.broadcaster.subscriber_count())
            .field("storage", &self.storage.is_some())
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

pub struct MonitorBuilder {
    directory: Arc<dyn InstanceDirectory>,
    source: Arc<dyn SnapshotSource>,
    rules: Vec<AlertRule>,
    collector_timeout: Duration,
    stale_after: Duration,
    workers: usize,
    channel_capacity: usize,
    max_consecutive_failures: u32,
    storage: Option<StorageHandle>,
    retention: Option<Duration>,
    history: Vec<Alert>,
}

impl MonitorBuilder {
    pub fn rules(mut self, rules: Vec<AlertRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn collector_timeout(mut self, timeout: Duration) -> Self {
        self.collector_timeout = timeout;
        self
    }

    pub fn stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn broadcaster(mut self, channel_capacity: usize, max_consecutive_failures: u32) -> Self {
        self.channel_capacity = channel_capacity;
        self.max_consecutive_failures = max_consecutive_failures;
        self
    }

    /// Feed snapshots and alert changes to `storage`; data older than
    /// `retention` is deleted by the full collection job
    pub fn storage(mut self, storage: StorageHandle, retention: Option<Duration>) -> Self {
        self.storage = Some(storage);
        self.retention = retention;
        self
    }

    /// Seed the alert store with persisted alerts
    pub fn restore_alerts(mut self, history: Vec<Alert>) -> Self {
        self.history = history;
        self
    }

    pub fn build(self) -> MonitorResult<Monitor> {
        let evaluator = AlertEvaluator::new(self.rules)?;

        if self.workers == 0 {
            return Err(MonitorError::Configuration(
                "worker pool needs at least one worker".to_string(),
            ));
        }

        let to_chrono = |d: Duration| {
            chrono::Duration::from_std(d)
                .map_err(|e| MonitorError::Configuration(format!("duration out of range: {e}")))
        };

        let registry = Arc::new(InstanceRegistry::new());
        let collector = Collector::new(self.source, registry.clone(), self.collector_timeout);

        let alerts = if self.history.is_empty() {
            AlertStore::new()
        } else {
            AlertStore::restore(self.history)
        };

        Ok(Monitor {
            registry,
            directory: self.directory,
            collector,
            evaluator,
            alerts,
            broadcaster: Broadcaster::new(self.channel_capacity, self.max_consecutive_failures),
            storage: self.storage,
            stale_after: to_chrono(self.stale_after)?,
            retention: self.retention.map(to_chrono).transpose()?,
            workers: self.workers,
        })
    }
}

impl Monitor {
    pub fn builder(
        directory: Arc<dyn InstanceDirectory>,
        source: Arc<dyn SnapshotSource>,
    ) -> MonitorBuilder {
        MonitorBuilder {
            directory,
            source,
            rules: default_rules(),
            collector_timeout: DEFAULT_TIMEOUT,
            stale_after: DEFAULT_STALE_AFTER,
            workers: DEFAULT_WORKERS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            storage: None,
            retention: None,
            history: Vec::new(),
        }
    }

    /// Build a monitor polling fleetwatch agents as configured
    ///
    /// Opens the storage backend, restores persisted alerts and loads the
    /// instance list.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;

        let directory = Arc::new(StaticDirectory::new(config.instance_descriptors()));
        let source = Arc::new(HttpSnapshotSource::new()?);

        let mut builder = Monitor::builder(directory, source)
            .rules(config.rules.clone())
            .collector_timeout(Duration::from_secs(config.collector.timeout_secs))
            .stale_after(Duration::from_secs(config.collector.stale_after_secs))
            .workers(config.scheduler.workers)
            .broadcaster(
                config.broadcaster.channel_capacity,
                config.broadcaster.max_consecutive_failures,
            );

        if let Some(backend) = open_backend(&config.storage).await? {
            let history = backend
                .load_alerts(None)
                .await
                .context("failed to load alert history")?;
            debug!("loaded {} alerts from storage", history.len());

            let retention = config
                .storage
                .retention_days()
                .map(|days| Duration::from_secs(u64::from(days) * 24 * 60 * 60));

            builder = builder
                .storage(StorageHandle::spawn(backend), retention)
                .restore_alerts(history);
        }

        let monitor = builder.build()?;
        monitor.sync_directory().await?;

        Ok(monitor)
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn alerts(&self) -> &AlertStore {
        &self.alerts
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn storage(&self) -> Option<&StorageHandle> {
        self.storage.as_ref()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Reconcile the registry with the instance directory
    #[instrument(skip(self))]
    pub async fn sync_directory(&self) -> anyhow::Result<SyncReport> {
        let descriptors = self
            .directory
            .list_instances()
            .await
            .context("failed to list instances")?;

        let report = self.registry.sync(&descriptors);

        for id in &report.removed {
            // open alerts of a removed instance stay in the store until an
            // operator resolves them
            debug!("instance {id} removed from directory");
        }

        Ok(report)
    }

    /// Run the full pipeline for one instance
    ///
    /// Never fails: every problem is folded into the returned outcome.
    #[instrument(skip(self, scope))]
    pub async fn process_instance(&self, id: InstanceId, scope: &CancelScope) -> InstanceOutcome {
        let Some(lock) = self.registry.pipeline_lock(id) else {
            return InstanceOutcome::Failed {
                reason: MonitorError::InstanceNotFound(id).to_string(),
            };
        };

        let mut cancelled = scope.clone();
        let _guard = tokio::select! {
            biased;
            _ = cancelled.cancelled() => return InstanceOutcome::Cancelled,
            guard = lock.lock() => guard,
        };

        // removed from the directory while waiting for the lock
        let Some(instance) = self.registry.get(id) else {
            return InstanceOutcome::Failed {
                reason: MonitorError::InstanceNotFound(id).to_string(),
            };
        };
        let was_online = instance.online;

        match self.collector.collect(&instance, scope).await {
            Ok(snapshot) => {
                if !was_online {
                    self.publish_status(id);
                }

                self.broadcaster.publish(MonitorEvent::SnapshotUpdate {
                    instance_id: id,
                    snapshot: snapshot.clone(),
                });
                if let Some(storage) = &self.storage {
                    storage.record_snapshot(snapshot.clone());
                }

                let (alerts_raised, alerts_resolved) = self.apply_decisions(&snapshot);

                InstanceOutcome::Collected {
                    alerts_raised,
                    alerts_resolved,
                }
            }
            Err(MonitorError::Unreachable { reason, .. }) => {
                if was_online {
                    self.publish_status(id);
                }
                InstanceOutcome::Unreachable { reason }
            }
            Err(MonitorError::Cancelled) => InstanceOutcome::Cancelled,
            Err(e) => InstanceOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    fn publish_status(&self, id: InstanceId) {
        if let Some(instance) = self.registry.get(id) {
            self.broadcaster.publish(MonitorEvent::InstanceStatus {
                instance_id: id,
                online: instance.online,
                last_seen: instance.last_seen,
            });
        }
    }

    /// Apply evaluator decisions; returns (raised, resolved)
    fn apply_decisions(&self, snapshot: &PerformanceSnapshot) -> (usize, usize) {
        let mut raised = 0;
        let mut resolved = 0;

        for decision in self.evaluator.evaluate(snapshot, &self.alerts) {
            match decision {
                AlertDecision::Raise(new) => match self.alerts.create_then(new, |alert| {
                    self.alert_event(MonitorEvent::AlertRaised {
                        alert: alert.clone(),
                    })
                }) {
                    Ok(_) => raised += 1,
                    Err(MonitorError::DuplicateAlert { existing, .. }) => {
                        trace!("alert {existing} already open, nothing to raise");
                    }
                    Err(e) => warn!("failed to raise alert: {e}"),
                },
                AlertDecision::AutoResolve {
                    alert_id,
                    metric,
                    value,
                    ..
                } => match self.alerts.auto_resolve_then(alert_id, |alert| {
                    self.alert_event(MonitorEvent::AlertChanged {
                        alert: alert.clone(),
                    })
                }) {
                    Ok(_) => {
                        resolved += 1;
                        info!(
                            "alert {alert_id} auto-resolved, {} back to {value}{}",
                            metric.label(),
                            metric.unit()
                        );
                    }
                    Err(MonitorError::InvalidTransition { .. }) => {
                        debug!("alert {alert_id} already resolved");
                    }
                    Err(e) => warn!("failed to auto-resolve alert {alert_id}: {e}"),
                },
            }
        }

        (raised, resolved)
    }

    /// Persist and publish an alert change
    ///
    /// Called from inside the store's `*_then` callbacks so changes of one
    /// alert are emitted in the order they were applied.
    fn alert_event(&self, event: MonitorEvent) {
        if let Some(storage) = &self.storage
            && let MonitorEvent::AlertRaised { alert } | MonitorEvent::AlertChanged { alert } =
                &event
        {
            storage.record_alert(alert.clone());
        }
        self.broadcaster.publish(event);
    }

    /// Delete data older than the retention period
    pub async fn apply_retention(&self) -> Option<CleanupReport> {
        let retention = self.retention?;
        let cutoff = Utc::now() - retention;

        let purged = self.alerts.purge_resolved_before(cutoff);
        if purged > 0 {
            debug!("purged {purged} resolved alerts from memory");
        }

        let storage = self.storage.as_ref()?;
        match storage.cleanup_before(cutoff).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("retention cleanup failed: {e:#}");
                None
            }
        }
    }

    // --- command surface ---

    pub fn acknowledge_alert(
        &self,
        alert_id: AlertId,
        by: &str,
        comment: Option<String>,
    ) -> MonitorResult<Alert> {
        self.alerts.acknowledge_then(alert_id, by, comment, |alert| {
            self.alert_event(MonitorEvent::AlertChanged {
                alert: alert.clone(),
            })
        })
    }

    pub fn resolve_alert(&self, alert_id: AlertId, by: &str) -> MonitorResult<Alert> {
        self.alerts.resolve_then(alert_id, by, |alert| {
            self.alert_event(MonitorEvent::AlertChanged {
                alert: alert.clone(),
            })
        })
    }

    /// Raise an operator alert against a known instance
    pub fn raise_manual_alert(
        &self,
        instance_id: InstanceId,
        name: impl Into<String>,
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> MonitorResult<Alert> {
        if !self.registry.contains(instance_id) {
            return Err(MonitorError::InstanceNotFound(instance_id));
        }

        let new = NewAlert {
            instance_id,
            alert_type: AlertType::Manual(name.into()),
            severity,
            title: title.into(),
            message: message.into(),
        };

        self.alerts.create_then(new, |alert| {
            self.alert_event(MonitorEvent::AlertRaised {
                alert: alert.clone(),
            })
        })
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.active_alerts()
    }

    pub fn alerts_for_instance(&self, instance_id: InstanceId) -> MonitorResult<Vec<Alert>> {
        if !self.registry.contains(instance_id) {
            return Err(MonitorError::InstanceNotFound(instance_id));
        }
        Ok(self.alerts.alerts_for_instance(instance_id))
    }

    /// Latest known state of an instance, labeled stale when it is offline
    /// or the snapshot is too old
    pub fn current_snapshot(&self, instance_id: InstanceId) -> MonitorResult<InstanceView> {
        let instance = self
            .registry
            .get(instance_id)
            .ok_or(MonitorError::InstanceNotFound(instance_id))?;
        let snapshot = self.registry.current_snapshot(instance_id);

        let stale = !instance.online || instance.is_stale(Utc::now(), self.stale_after);

        Ok(InstanceView {
            instance,
            snapshot,
            stale,
        })
    }

    pub fn instances(&self) -> Vec<Instance> {
        self.registry.instances()
    }

    pub fn summary(&self) -> Summary {
        let instances = self.registry.instances();
        let online = instances.iter().filter(|i| i.online).count();
        let counts = self.alerts.counts();

        Summary {
            total_instances: instances.len(),
            online_instances: online,
            offline_instances: instances.len() - online,
            active_alerts: counts.active,
            acknowledged_alerts: counts.acknowledged,
            critical_alerts: counts.critical,
            subscribers: self.broadcaster.subscriber_count(),
        }
    }

    pub fn subscribe(&self, subscriber_id: impl Into<String>, interest: Interest) -> Subscription {
        self.broadcaster.subscribe(subscriber_id, interest)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.broadcaster.unsubscribe(token)
    }

    /// Stop background actors
    pub async fn shutdown(&self) {
        if let Some(storage) = &self.storage {
            storage.shutdown().await;
        }
    }
}

async fn open_backend(config: &StorageConfig) -> anyhow::Result<Option<Arc<dyn StorageBackend>>> {
    match config {
        StorageConfig::None => Ok(None),
        StorageConfig::Memory {
            snapshots_per_instance,
            ..
        } => Ok(Some(Arc::new(MemoryBackend::with_capacity(
            *snapshots_per_instance,
        )))),
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => {
            let backend = crate::storage::sqlite::SqliteBackend::new(path)
                .await
                .context("failed to open SQLite storage")?;
            Ok(Some(Arc::new(backend)))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("SQLite storage requires the `storage-sqlite` feature")
        }
    }
}
