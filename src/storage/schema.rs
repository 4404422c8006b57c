//! Column encodings shared by the persistent backends
//!
//! Snapshots map one-to-one onto columns (one REAL column per metric).
//! Alerts are stored flat: enums become short text codes and the alert type
//! is encoded as `threshold:<metric>` or `manual:<name>`, matching its
//! `Display` form.

use chrono::{DateTime, Utc};

use super::error::{StorageError, StorageResult};
use crate::alerts::{Alert, AlertId, AlertStatus, AlertType, Severity};
use crate::{InstanceId, Metric};

pub fn encode_alert_type(alert_type: &AlertType) -> String {
    alert_type.to_string()
}

pub fn decode_alert_type(raw: &str) -> StorageResult<AlertType> {
    match raw.split_once(':') {
        Some(("threshold", metric)) => Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == metric)
            .map(AlertType::Threshold)
            .ok_or_else(|| StorageError::CorruptRecord(format!("unknown metric '{metric}'"))),
        Some(("manual", name)) => Ok(AlertType::Manual(name.to_string())),
        _ => Err(StorageError::CorruptRecord(format!(
            "unknown alert type '{raw}'"
        ))),
    }
}

pub fn encode_severity(severity: Severity) -> &'static str {
    match severity {
        Severity::Warning => "warning",
        Severity::Critical => "critical",
    }
}

pub fn decode_severity(raw: &str) -> StorageResult<Severity> {
    match raw {
        "warning" => Ok(Severity::Warning),
        "critical" => Ok(Severity::Critical),
        other => Err(StorageError::CorruptRecord(format!(
            "unknown severity '{other}'"
        ))),
    }
}

pub fn encode_status(status: AlertStatus) -> &'static str {
    match status {
        AlertStatus::Active => "active",
        AlertStatus::Acknowledged => "acknowledged",
        AlertStatus::Resolved => "resolved",
    }
}

pub fn decode_status(raw: &str) -> StorageResult<AlertStatus> {
    match raw {
        "active" => Ok(AlertStatus::Active),
        "acknowledged" => Ok(AlertStatus::Acknowledged),
        "resolved" => Ok(AlertStatus::Resolved),
        other => Err(StorageError::CorruptRecord(format!(
            "unknown alert status '{other}'"
        ))),
    }
}

/// Timestamps are stored as Unix milliseconds
pub fn to_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub fn from_millis(millis: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::CorruptRecord(format!("timestamp out of range: {millis}")))
}

/// Flat alert row as read from or written to the `alerts` table
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRow {
    pub id: i64,
    pub instance_id: i64,
    pub alert_type: String,
    pub severity: String,
    pub title: String,
    pub message: String,
    pub status: String,
    pub created_at: i64,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<i64>,
    pub acknowledge_comment: Option<String>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<i64>,
}

impl From<&Alert> for AlertRow {
    fn from(alert: &Alert) -> Self {
        Self {
            id: alert.id as i64,
            instance_id: i64::from(alert.instance_id),
            alert_type: encode_alert_type(&alert.alert_type),
            severity: encode_severity(alert.severity).to_string(),
            title: alert.title.clone(),
            message: alert.message.clone(),
            status: encode_status(alert.status).to_string(),
            created_at: to_millis(&alert.created_at),
            acknowledged_by: alert.acknowledged_by.clone(),
            acknowledged_at: alert.acknowledged_at.as_ref().map(to_millis),
            acknowledge_comment: alert.acknowledge_comment.clone(),
            resolved_by: alert.resolved_by.clone(),
            resolved_at: alert.resolved_at.as_ref().map(to_millis),
        }
    }
}

impl TryFrom<AlertRow> for Alert {
    type Error = StorageError;

    fn try_from(row: AlertRow) -> StorageResult<Self> {
        let instance_id = InstanceId::try_from(row.instance_id)
            .map_err(|_| StorageError::CorruptRecord(format!("bad instance id {}", row.instance_id)))?;

        Ok(Alert {
            id: row.id as AlertId,
            instance_id,
            alert_type: decode_alert_type(&row.alert_type)?,
            severity: decode_severity(&row.severity)?,
            title: row.title,
            message: row.message,
            status: decode_status(&row.status)?,
            created_at: from_millis(row.created_at)?,
            acknowledged_by: row.acknowledged_by,
            acknowledged_at: row.acknowledged_at.map(from_millis).transpose()?,
            acknowledge_comment: row.acknowledge_comment,
            resolved_by: row.resolved_by,
            resolved_at: row.resolved_at.map(from_millis).transpose()?,
        })
    }
}
