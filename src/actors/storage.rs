//! StorageActor - persists snapshots and alerts through a backend
//!
//! ## Batching Strategy
//!
//! Records are buffered and written in batches:
//! - **Size trigger**: Flush after 100 records (configurable)
//! - **Time trigger**: Flush after 5 seconds (configurable)
//!
//! This balances write throughput with data freshness.
//!
//! ## Backpressure
//!
//! The record queue is bounded. [`StorageHandle::record`] uses `try_send`:
//! when the queue is full the record is dropped and counted, the caller
//! never waits. Backend errors are logged and the batch is discarded.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::time;
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::{StorageCommand, StorageRecord, StorageStats};
use crate::alerts::Alert;
use crate::storage::{CleanupReport, HealthStatus, StorageBackend};
use crate::{InstanceId, PerformanceSnapshot};

/// Tuning knobs of the storage actor
#[derive(Debug, Clone, Copy)]
pub struct StorageOptions {
    /// Flush after this many buffered records
    pub batch_size: usize,

    /// Flush at least this often while records are pending
    pub flush_interval: Duration,

    /// Capacity of the record queue
    pub queue_capacity: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            queue_capacity: 1024,
        }
    }
}

pub struct StorageActor {
    backend: Arc<dyn StorageBackend>,
    options: StorageOptions,

    snapshot_batch: Vec<PerformanceSnapshot>,
    alert_batch: Vec<Alert>,

    record_rx: mpsc::Receiver<StorageRecord>,
    command_rx: mpsc::Receiver<StorageCommand>,

    stats: StorageStats,
    dropped: Arc<AtomicU64>,
}

impl StorageActor {
    fn new(
        backend: Arc<dyn StorageBackend>,
        options: StorageOptions,
        record_rx: mpsc::Receiver<StorageRecord>,
        command_rx: mpsc::Receiver<StorageCommand>,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            backend,
            options,
            snapshot_batch: Vec::with_capacity(options.batch_size),
            alert_batch: Vec::new(),
            record_rx,
            command_rx,
            stats: StorageStats::default(),
            dropped,
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting storage actor");

        let mut flush_interval = time::interval(self.options.flush_interval);
        flush_interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        let mut shutdown_reply = None;

        loop {
            tokio::select! {
                // queued records are drained before commands, so a command
                // observes every record sent before it
                biased;

                record = self.record_rx.recv() => {
                    match record {
                        Some(record) => self.store(record).await,
                        None => {
                            debug!("record channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = flush_interval.tick() => {
                    if self.pending() > 0 {
                        trace!("time-based flush triggered ({} records)", self.pending());
                        self.flush().await;
                    }
                }

                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => {
                            if let Some(reply) = self.handle_command(command).await {
                                shutdown_reply = Some(reply);
                                break;
                            }
                        }
                        None => {
                            debug!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        // records accepted before the shutdown are still written
        while let Ok(record) = self.record_rx.try_recv() {
            self.buffer(record);
        }

        if self.pending() > 0 {
            debug!("final flush before shutdown ({} records)", self.pending());
            self.flush().await;
        }

        debug!("closing backend");
        if let Err(e) = self.backend.close().await {
            error!("error closing backend: {}", e);
        }

        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }

        debug!("storage actor stopped");
    }

    fn pending(&self) -> usize {
        self.snapshot_batch.len() + self.alert_batch.len()
    }

    fn buffer(&mut self, record: StorageRecord) {
        match record {
            StorageRecord::Snapshot(snapshot) => {
                trace!(
                    "buffering snapshot for instance {} at {}",
                    snapshot.instance_id, snapshot.timestamp
                );
                self.snapshot_batch.push(snapshot);
            }
            StorageRecord::Alert(alert) => {
                trace!("buffering alert {} ({})", alert.id, alert.status);
                self.alert_batch.push(alert);
            }
        }
    }

    async fn store(&mut self, record: StorageRecord) {
        self.buffer(record);

        if self.pending() >= self.options.batch_size {
            trace!("size-based flush triggered ({} records)", self.pending());
            self.flush().await;
        }
    }

    /// Write both batch buffers to the backend
    ///
    /// A failed batch is logged and discarded.
    async fn flush(&mut self) -> bool {
        let mut ok = true;

        if !self.snapshot_batch.is_empty() {
            let batch = std::mem::take(&mut self.snapshot_batch);
            let count = batch.len() as u64;

            match self.backend.insert_snapshots(batch).await {
                Ok(()) => self.stats.snapshots_written += count,
                Err(e) => {
                    error!("failed to write {count} snapshots: {e}");
                    ok = false;
                }
            }
        }

        if !self.alert_batch.is_empty() {
            let batch = std::mem::take(&mut self.alert_batch);
            let count = batch.len() as u64;

            match self.backend.upsert_alerts(batch).await {
                Ok(()) => self.stats.alerts_written += count,
                Err(e) => {
                    error!("failed to write {count} alerts: {e}");
                    ok = false;
                }
            }
        }

        self.stats.flush_count += 1;
        if !ok {
            self.stats.failed_flushes += 1;
        }
        trace!("flush #{} complete", self.stats.flush_count);
        ok
    }

    /// Reads must observe every record accepted before them
    async fn flush_pending(&mut self) {
        if self.pending() > 0 {
            self.flush().await;
        }
    }

    async fn cleanup(&mut self, before: DateTime<Utc>) -> anyhow::Result<CleanupReport> {
        // buffered rows must not survive a cleanup that should have removed them
        self.flush().await;

        debug!("running retention cleanup (deleting data before {before})");
        let report = self.backend.cleanup_before(before).await?;

        self.stats.last_cleanup_time = Some(Utc::now());
        self.stats.total_snapshots_deleted += report.snapshots_deleted as u64;
        self.stats.total_alerts_deleted += report.alerts_deleted as u64;

        if report.snapshots_deleted > 0 || report.alerts_deleted > 0 {
            info!(
                "retention cleanup: {} snapshots, {} alerts deleted (totals: {}, {})",
                report.snapshots_deleted,
                report.alerts_deleted,
                self.stats.total_snapshots_deleted,
                self.stats.total_alerts_deleted
            );
        }

        Ok(report)
    }

    /// Returns the reply channel when the command asks the actor to stop
    async fn handle_command(&mut self, cmd: StorageCommand) -> Option<oneshot::Sender<()>> {
        match cmd {
            StorageCommand::Flush { respond_to } => {
                debug!("manual flush requested");
                let result = if self.flush().await {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("flush failed, see log for details"))
                };
                let _ = respond_to.send(result);
            }

            StorageCommand::GetStats { respond_to } => {
                let mut stats = self.stats.clone();
                stats.pending = self.pending();
                stats.dropped_records = self.dropped.load(Ordering::Relaxed);
                let _ = respond_to.send(stats);
            }

            StorageCommand::LatestSnapshots {
                instance_id,
                limit,
                respond_to,
            } => {
                self.flush_pending().await;
                let result = self
                    .backend
                    .latest_snapshots(instance_id, limit)
                    .await
                    .map_err(Into::into);
                let _ = respond_to.send(result);
            }

            StorageCommand::LoadAlerts {
                instance_id,
                respond_to,
            } => {
                self.flush_pending().await;
                let result = self
                    .backend
                    .load_alerts(instance_id)
                    .await
                    .map_err(Into::into);
                let _ = respond_to.send(result);
            }

            StorageCommand::Cleanup { before, respond_to } => {
                let result = self.cleanup(before).await;
                if let Err(e) = &result {
                    error!("retention cleanup failed: {e}");
                }
                let _ = respond_to.send(result);
            }

            StorageCommand::HealthCheck { respond_to } => {
                let result = self.backend.health_check().await.map_err(Into::into);
                let _ = respond_to.send(result);
            }

            StorageCommand::Shutdown { respond_to } => {
                debug!("received shutdown command");
                return Some(respond_to);
            }
        }

        None
    }
}

/// Handle for controlling the StorageActor
#[derive(Clone)]
pub struct StorageHandle {
    records: mpsc::Sender<StorageRecord>,
    sender: mpsc::Sender<StorageCommand>,
    dropped: Arc<AtomicU64>,
}

impl StorageHandle {
    /// Spawn a storage actor with default options
    pub fn spawn(backend: Arc<dyn StorageBackend>) -> Self {
        Self::spawn_with_options(backend, StorageOptions::default())
    }

    pub fn spawn_with_options(backend: Arc<dyn StorageBackend>, options: StorageOptions) -> Self {
        let (record_tx, record_rx) = mpsc::channel(options.queue_capacity.max(1));
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let dropped = Arc::new(AtomicU64::new(0));

        let actor = StorageActor::new(backend, options, record_rx, cmd_rx, dropped.clone());
        tokio::spawn(actor.run());

        Self {
            records: record_tx,
            sender: cmd_tx,
            dropped,
        }
    }

    /// Queue a record without waiting
    ///
    /// Returns false if the record was dropped.
    pub fn record(&self, record: StorageRecord) -> bool {
        match self.records.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("storage queue full, dropping record ({dropped} dropped so far)");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("storage actor stopped, dropping record");
                false
            }
        }
    }

    pub fn record_snapshot(&self, snapshot: PerformanceSnapshot) -> bool {
        self.record(StorageRecord::Snapshot(snapshot))
    }

    pub fn record_alert(&self, alert: Alert) -> bool {
        self.record(StorageRecord::Alert(alert))
    }

    /// Manually flush the write buffer
    pub async fn flush(&self) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::Flush { respond_to: tx })
            .await?;

        rx.await?
    }

    /// Get storage statistics
    pub async fn get_stats(&self) -> Option<StorageStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    pub async fn latest_snapshots(
        &self,
        instance_id: InstanceId,
        limit: usize,
    ) -> anyhow::Result<Vec<PerformanceSnapshot>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::LatestSnapshots {
                instance_id,
                limit,
                respond_to: tx,
            })
            .await?;

        rx.await?
    }

    pub async fn load_alerts(&self, instance_id: Option<InstanceId>) -> anyhow::Result<Vec<Alert>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::LoadAlerts {
                instance_id,
                respond_to: tx,
            })
            .await?;

        rx.await?
    }

    /// Delete data older than `before` (open alerts are kept)
    pub async fn cleanup_before(&self, before: DateTime<Utc>) -> anyhow::Result<CleanupReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::Cleanup {
                before,
                respond_to: tx,
            })
            .await?;

        rx.await?
    }

    pub async fn health_check(&self) -> anyhow::Result<HealthStatus> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::HealthCheck { respond_to: tx })
            .await?;

        rx.await?
    }

    /// Flush pending records, close the backend and stop the actor
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(StorageCommand::Shutdown { respond_to: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}
