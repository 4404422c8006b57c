//! SQLite storage backend implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Better concurrency for reads during writes
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{CleanupReport, HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{AlertRow, from_millis, to_millis};
use crate::alerts::Alert;
use crate::{InstanceId, PerformanceSnapshot, Readings};

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Open (or create) the database at `db_path` and run migrations
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn snapshot_from_row(row: &SqliteRow) -> StorageResult<PerformanceSnapshot> {
        let instance_id: i64 = row.try_get("instance_id")?;
        let instance_id = InstanceId::try_from(instance_id)
            .map_err(|_| StorageError::CorruptRecord(format!("bad instance id {instance_id}")))?;

        Ok(PerformanceSnapshot {
            instance_id,
            timestamp: from_millis(row.try_get("timestamp")?)?,
            readings: Readings {
                cpu_percent: row.try_get("cpu_percent")?,
                memory_percent: row.try_get("memory_percent")?,
                active_connections: row.try_get("active_connections")?,
                blocked_processes: row.try_get("blocked_processes")?,
                disk_iops: row.try_get("disk_iops")?,
                network_kbps: row.try_get("network_kbps")?,
            },
        })
    }

    fn alert_from_row(row: &SqliteRow) -> StorageResult<Alert> {
        let row = AlertRow {
            id: row.try_get("id")?,
            instance_id: row.try_get("instance_id")?,
            alert_type: row.try_get("alert_type")?,
            severity: row.try_get("severity")?,
            title: row.try_get("title")?,
            message: row.try_get("message")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            acknowledged_by: row.try_get("acknowledged_by")?,
            acknowledged_at: row.try_get("acknowledged_at")?,
            acknowledge_comment: row.try_get("acknowledge_comment")?,
            resolved_by: row.try_get("resolved_by")?,
            resolved_at: row.try_get("resolved_at")?,
        };
        Alert::try_from(row)
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, snapshots), fields(count = snapshots.len()))]
    async fn insert_snapshots(&self, snapshots: Vec<PerformanceSnapshot>) -> StorageResult<()> {
        if snapshots.is_empty() {
            return Ok(());
        }

        debug!("inserting {} snapshots into SQLite", snapshots.len());

        let mut tx = self.pool.begin().await?;

        for snapshot in snapshots {
            let readings = &snapshot.readings;

            sqlx::query(
                r#"
                INSERT INTO snapshots (
                    instance_id, timestamp, cpu_percent, memory_percent,
                    active_connections, blocked_processes, disk_iops, network_kbps
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (instance_id, timestamp) DO UPDATE SET
                    cpu_percent = excluded.cpu_percent,
                    memory_percent = excluded.memory_percent,
                    active_connections = excluded.active_connections,
                    blocked_processes = excluded.blocked_processes,
                    disk_iops = excluded.disk_iops,
                    network_kbps = excluded.network_kbps
                "#,
            )
            .bind(i64::from(snapshot.instance_id))
            .bind(to_millis(&snapshot.timestamp))
            .bind(readings.cpu_percent)
            .bind(readings.memory_percent)
            .bind(readings.active_connections)
            .bind(readings.blocked_processes)
            .bind(readings.disk_iops)
            .bind(readings.network_kbps)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, alerts), fields(count = alerts.len()))]
    async fn upsert_alerts(&self, alerts: Vec<Alert>) -> StorageResult<()> {
        if alerts.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for alert in &alerts {
            let row = AlertRow::from(alert);

            sqlx::query(
                r#"
                INSERT INTO alerts (
                    id, instance_id, alert_type, severity, title, message, status,
                    created_at, acknowledged_by, acknowledged_at, acknowledge_comment,
                    resolved_by, resolved_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (id) DO UPDATE SET
                    status = excluded.status,
                    severity = excluded.severity,
                    title = excluded.title,
                    message = excluded.message,
                    acknowledged_by = excluded.acknowledged_by,
                    acknowledged_at = excluded.acknowledged_at,
                    acknowledge_comment = excluded.acknowledge_comment,
                    resolved_by = excluded.resolved_by,
                    resolved_at = excluded.resolved_at
                WHERE (CASE alerts.status WHEN 'resolved' THEN 2 WHEN 'acknowledged' THEN 1 ELSE 0 END)
                   <= (CASE excluded.status WHEN 'resolved' THEN 2 WHEN 'acknowledged' THEN 1 ELSE 0 END)
                "#,
            )
            .bind(row.id)
            .bind(row.instance_id)
            .bind(row.alert_type)
            .bind(row.severity)
            .bind(row.title)
            .bind(row.message)
            .bind(row.status)
            .bind(row.created_at)
            .bind(row.acknowledged_by)
            .bind(row.acknowledged_at)
            .bind(row.acknowledge_comment)
            .bind(row.resolved_by)
            .bind(row.resolved_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("upserted {} alerts", alerts.len());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn latest_snapshots(
        &self,
        instance_id: InstanceId,
        limit: usize,
    ) -> StorageResult<Vec<PerformanceSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT instance_id, timestamp, cpu_percent, memory_percent,
                   active_connections, blocked_processes, disk_iops, network_kbps
            FROM snapshots
            WHERE instance_id = ?
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(instance_id))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::snapshot_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn load_alerts(&self, instance_id: Option<InstanceId>) -> StorageResult<Vec<Alert>> {
        let rows = match instance_id {
            Some(id) => {
                sqlx::query("SELECT * FROM alerts WHERE instance_id = ? ORDER BY id ASC")
                    .bind(i64::from(id))
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM alerts ORDER BY id ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(Self::alert_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<CleanupReport> {
        let cutoff = to_millis(&before);

        let snapshots = sqlx::query("DELETE FROM snapshots WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let alerts = sqlx::query(
            "DELETE FROM alerts WHERE status = 'resolved' AND resolved_at IS NOT NULL AND resolved_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let report = CleanupReport {
            snapshots_deleted: snapshots.rows_affected() as usize,
            alerts_deleted: alerts.rows_affected() as usize,
        };

        info!(
            "deleted {} old snapshots and {} resolved alerts",
            report.snapshots_deleted, report.alerts_deleted
        );

        Ok(report)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
