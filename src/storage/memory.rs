//! In-memory storage backend (no persistence)
//!
//! Snapshots are kept in a ring buffer per instance; when a buffer is full
//! the oldest snapshot is evicted. Alerts are kept by id.
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Limited capacity**: Ring buffer size is fixed per instance

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{CleanupReport, HealthStatus, StorageBackend};
use super::error::StorageResult;
use crate::alerts::{Alert, AlertId, AlertStatus};
use crate::{InstanceId, PerformanceSnapshot};

/// Default number of snapshots kept per instance
pub const DEFAULT_SNAPSHOTS_PER_INSTANCE: usize = 1000;

pub struct MemoryBackend {
    capacity: usize,
    snapshots: RwLock<HashMap<InstanceId, VecDeque<PerformanceSnapshot>>>,
    alerts: RwLock<BTreeMap<AlertId, Alert>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SNAPSHOTS_PER_INSTANCE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            snapshots: RwLock::new(HashMap::new()),
            alerts: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn insert_snapshots(&self, snapshots: Vec<PerformanceSnapshot>) -> StorageResult<()> {
        let mut stored = self.snapshots.write().await;

        for snapshot in snapshots {
            let buffer = stored.entry(snapshot.instance_id).or_default();

            match buffer
                .iter_mut()
                .find(|existing| existing.timestamp == snapshot.timestamp)
            {
                Some(existing) => *existing = snapshot,
                None => {
                    // keep the buffer ordered oldest to newest
                    let position = buffer.partition_point(|s| s.timestamp < snapshot.timestamp);
                    buffer.insert(position, snapshot);
                }
            }

            while buffer.len() > self.capacity {
                buffer.pop_front();
            }
        }

        Ok(())
    }

    async fn upsert_alerts(&self, alerts: Vec<Alert>) -> StorageResult<()> {
        let mut stored = self.alerts.write().await;
        for alert in alerts {
            // a late record must not reopen an alert
            let regresses = stored
                .get(&alert.id)
                .is_some_and(|existing| existing.status > alert.status);
            if regresses {
                debug!("ignoring {} state for alert {}", alert.status, alert.id);
                continue;
            }
            stored.insert(alert.id, alert);
        }
        Ok(())
    }

    async fn latest_snapshots(
        &self,
        instance_id: InstanceId,
        limit: usize,
    ) -> StorageResult<Vec<PerformanceSnapshot>> {
        debug!("querying latest {limit} snapshots for instance {instance_id}");

        let stored = self.snapshots.read().await;
        Ok(stored
            .get(&instance_id)
            .map(|buffer| buffer.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn load_alerts(&self, instance_id: Option<InstanceId>) -> StorageResult<Vec<Alert>> {
        let stored = self.alerts.read().await;
        Ok(stored
            .values()
            .filter(|alert| instance_id.is_none_or(|id| alert.instance_id == id))
            .cloned()
            .collect())
    }

    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<CleanupReport> {
        let mut report = CleanupReport::default();

        {
            let mut stored = self.snapshots.write().await;
            for buffer in stored.values_mut() {
                let len = buffer.len();
                buffer.retain(|snapshot| snapshot.timestamp >= before);
                report.snapshots_deleted += len - buffer.len();
            }
            stored.retain(|_, buffer| !buffer.is_empty());
        }

        {
            let mut stored = self.alerts.write().await;
            let len = stored.len();
            stored.retain(|_, alert| {
                alert.status != AlertStatus::Resolved
                    || alert.resolved_at.is_none_or(|resolved_at| resolved_at >= before)
            });
            report.alerts_deleted = len - stored.len();
        }

        debug!(
            "in-memory cleanup removed {} snapshots, {} alerts",
            report.snapshots_deleted, report.alerts_deleted
        );
        Ok(report)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let snapshots: usize = self.snapshots.read().await.values().map(VecDeque::len).sum();
        let alerts = self.alerts.read().await.len();

        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("snapshots".to_string(), snapshots.to_string()),
                ("alerts".to_string(), alerts.to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
