//! Request and response bodies of the API
//!
//! Responses serialize the core types directly; only envelopes and request
//! bodies live here.

use serde::{Deserialize, Serialize};

use crate::alerts::{Alert, Severity};
use crate::monitor::InstanceView;
use crate::{InstanceId, PerformanceSnapshot};

/// Overall status reported by GET /api/v1/health
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Ok,
    /// The hub runs but storage is failing
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageHealth {
    pub healthy: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthState,

    /// RFC 3339 timestamp
    pub timestamp: String,

    /// `None` when persistence is disabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageHealth>,

    pub subscribers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstancesResponse {
    pub instances: Vec<InstanceView>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotHistoryResponse {
    pub instance_id: InstanceId,
    pub snapshots: Vec<PerformanceSnapshot>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
    pub count: usize,
}

impl From<Vec<Alert>> for AlertsResponse {
    fn from(alerts: Vec<Alert>) -> Self {
        Self {
            count: alerts.len(),
            alerts,
        }
    }
}

/// Body of POST /api/v1/alerts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualAlertRequest {
    pub instance_id: InstanceId,

    /// Identifies the alert for deduplication, e.g. "maintenance"
    pub name: String,

    pub severity: Severity,
    pub title: String,
    #[serde(default)]
    pub message: String,
}

/// Body of POST /api/v1/alerts/{id}/acknowledge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcknowledgeRequest {
    pub by: String,
    pub comment: Option<String>,
}

/// Body of POST /api/v1/alerts/{id}/resolve
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub by: String,
}
