//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Records**: fire-and-forget writes, sent with `try_send` so the
//!    monitoring pipeline never waits on persistence
//! 2. **Commands**: request/response messages answered through a oneshot
//!    channel

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::alerts::Alert;
use crate::storage::{CleanupReport, HealthStatus};
use crate::{InstanceId, PerformanceSnapshot};

/// A write destined for the storage backend
#[derive(Debug, Clone)]
pub enum StorageRecord {
    Snapshot(PerformanceSnapshot),

    /// Current state of an alert, written on every lifecycle change
    Alert(Alert),
}

/// Commands that can be sent to the StorageActor
#[derive(Debug)]
pub enum StorageCommand {
    /// Write all buffered records to the backend now
    Flush {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    GetStats {
        respond_to: oneshot::Sender<StorageStats>,
    },

    /// Most recent snapshots of one instance, newest first
    LatestSnapshots {
        instance_id: InstanceId,
        limit: usize,
        respond_to: oneshot::Sender<anyhow::Result<Vec<PerformanceSnapshot>>>,
    },

    LoadAlerts {
        instance_id: Option<InstanceId>,
        respond_to: oneshot::Sender<anyhow::Result<Vec<Alert>>>,
    },

    /// Apply the retention policy with the given cutoff
    Cleanup {
        before: DateTime<Utc>,
        respond_to: oneshot::Sender<anyhow::Result<CleanupReport>>,
    },

    HealthCheck {
        respond_to: oneshot::Sender<anyhow::Result<HealthStatus>>,
    },

    /// Flush, close the backend and stop
    ///
    /// The reply is sent once the backend is closed.
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Storage statistics
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub snapshots_written: u64,
    pub alerts_written: u64,

    /// Records waiting in the batch buffers
    pub pending: usize,

    pub flush_count: u64,
    pub failed_flushes: u64,

    /// Records rejected because the queue was full
    pub dropped_records: u64,

    pub last_cleanup_time: Option<DateTime<Utc>>,
    pub total_snapshots_deleted: u64,
    pub total_alerts_deleted: u64,
}
