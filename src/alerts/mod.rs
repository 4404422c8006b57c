//! Alert model, threshold evaluation and lifecycle store
//!
//! ## Lifecycle
//!
//! ```text
//!   Active ──acknowledge──▶ Acknowledged
//!     │                         │
//!     └──────resolve──────┬─────┘
//!                         ▼
//!                      Resolved
//! ```
//!
//! Transitions never regress. All mutations go through [`store::AlertStore`].

pub mod evaluator;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{InstanceId, Metric};

pub use evaluator::{
    AlertDecision, AlertEvaluator, AlertRule, Comparator, ThresholdEvaluation, default_rules,
};
pub use store::{AlertCounts, AlertStore};

pub type AlertId = u64;

/// Actor recorded for resolutions performed by the evaluator
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "Warning"),
            Severity::Critical => write!(f, "Critical"),
        }
    }
}

/// Ordered along the lifecycle: `Active < Acknowledged < Resolved`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Active => write!(f, "active"),
            AlertStatus::Acknowledged => write!(f, "acknowledged"),
            AlertStatus::Resolved => write!(f, "resolved"),
        }
    }
}

/// What raised an alert
///
/// Threshold alerts come from [`AlertRule`]s and may be resolved
/// automatically. Manual alerts are raised by an operator and only ever
/// resolved by one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum AlertType {
    Threshold(Metric),
    Manual(String),
}

impl AlertType {
    pub fn is_rule_based(&self) -> bool {
        matches!(self, AlertType::Threshold(_))
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertType::Threshold(metric) => write!(f, "threshold:{metric}"),
            AlertType::Manual(name) => write!(f, "manual:{name}"),
        }
    }
}

/// Alert candidate before the store assigned an id
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub instance_id: InstanceId,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub instance_id: InstanceId,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledge_comment: Option<String>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    fn from_new(id: AlertId, new: NewAlert, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            instance_id: new.instance_id,
            alert_type: new.alert_type,
            severity: new.severity,
            title: new.title,
            message: new.message,
            status: AlertStatus::Active,
            created_at,
            acknowledged_by: None,
            acknowledged_at: None,
            acknowledge_comment: None,
            resolved_by: None,
            resolved_at: None,
        }
    }

    /// Active or acknowledged, i.e. not yet resolved
    pub fn is_open(&self) -> bool {
        self.status != AlertStatus::Resolved
    }
}
