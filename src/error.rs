//! Error taxonomy of the monitoring core
//!
//! - `Unreachable` is recoverable and retried on the next cycle.
//! - `InvalidTransition`, `AlertNotFound`, `InstanceNotFound` and
//!   `DuplicateAlert` are surfaced to the command caller and never retried.
//! - `DeliveryFailure` stays inside the broadcaster.
//! - `Configuration` is only produced while loading configuration.

use thiserror::Error;

use crate::InstanceId;
use crate::alerts::{AlertId, AlertStatus, AlertType};

pub type MonitorResult<T> = Result<T, MonitorError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MonitorError {
    /// Instance offline, refused the connection or timed out.
    #[error("instance {instance_id} unreachable: {reason}")]
    Unreachable {
        instance_id: InstanceId,
        reason: String,
    },

    /// Alert lifecycle misuse (e.g. acknowledging a resolved alert).
    #[error("cannot {action} alert {alert_id} while it is {from}")]
    InvalidTransition {
        alert_id: AlertId,
        from: AlertStatus,
        action: &'static str,
    },

    #[error("alert {0} not found")]
    AlertNotFound(AlertId),

    #[error("instance {0} not found")]
    InstanceNotFound(InstanceId),

    /// An open alert already exists for the same instance and type.
    #[error("alert {existing} is already open for instance {instance_id} ({alert_type})")]
    DuplicateAlert {
        existing: AlertId,
        instance_id: InstanceId,
        alert_type: AlertType,
    },

    /// Pushing an event to a subscriber failed.
    #[error("delivery to subscriber {subscriber} failed: {reason}")]
    DeliveryFailure { subscriber: String, reason: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("operation cancelled")]
    Cancelled,
}
