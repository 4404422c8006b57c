//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use crate::alerts::Alert;
use crate::{InstanceId, PerformanceSnapshot};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Rows removed by one retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub snapshots_deleted: usize,
    pub alerts_deleted: usize,
}

/// Trait for persistent storage backends
///
/// The monitor never calls a backend directly: records go through the
/// storage actor, which batches them and calls `insert_snapshots` /
/// `upsert_alerts`. Implementations must be `Send + Sync` as they are used
/// across async tasks.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Insert a batch of snapshots
    ///
    /// A snapshot with the same `(instance_id, timestamp)` as a stored one
    /// replaces it.
    async fn insert_snapshots(&self, snapshots: Vec<PerformanceSnapshot>) -> StorageResult<()>;

    /// Insert or replace alerts by id
    ///
    /// Alerts are written on every lifecycle change, so the latest write
    /// carries the current status.
    async fn upsert_alerts(&self, alerts: Vec<Alert>) -> StorageResult<()>;

    /// The `limit` most recent snapshots of an instance, newest first
    async fn latest_snapshots(
        &self,
        instance_id: InstanceId,
        limit: usize,
    ) -> StorageResult<Vec<PerformanceSnapshot>>;

    /// Stored alerts ordered by id, optionally for one instance only
    async fn load_alerts(&self, instance_id: Option<InstanceId>) -> StorageResult<Vec<Alert>>;

    /// Delete snapshots taken before `before` and alerts resolved before it
    ///
    /// Open alerts are never deleted, however old.
    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<CleanupReport>;

    /// Check backend health
    ///
    /// Performs a lightweight operation to verify the backend
    /// is operational (e.g., ping database, check file access).
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
