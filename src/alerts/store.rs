//! AlertStore - sole owner of the alert lifecycle
//!
//! ## Locking
//!
//! Two sharded maps, no global lock:
//!
//! - `alerts`: alert id → alert. Every mutation of one alert happens under
//!   that entry's write guard, so concurrent acknowledge/resolve on the same
//!   id are serialized and cannot lose updates.
//! - `open`: (instance, type) → id of the open alert. `create` performs its
//!   duplicate check and insert while holding the entry for its key, which
//!   makes "at most one open alert per key" atomic.
//!
//! Lock order is always `open` → `alerts`. Operations that touch both maps
//! the other way round release the alert guard first.
//!
//! The `*_then` variants run a callback while the alert's guard is still
//! held. Whatever the callback emits (events, storage records) is therefore
//! ordered exactly like the mutations of that alert.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tracing::{debug, info, instrument};

use super::{Alert, AlertId, AlertStatus, AlertType, NewAlert, SYSTEM_ACTOR, Severity};
use crate::{InstanceId, MonitorError, MonitorResult};

/// Aggregated alert counters for dashboards
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlertCounts {
    pub active: usize,
    pub acknowledged: usize,
    pub critical: usize,
    pub resolved: usize,
}

#[derive(Debug)]
pub struct AlertStore {
    next_id: AtomicU64,
    alerts: DashMap<AlertId, Alert>,
    open: DashMap<(InstanceId, AlertType), AlertId>,
}

impl Default for AlertStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            alerts: DashMap::new(),
            open: DashMap::new(),
        }
    }

    /// Store a new alert as Active
    ///
    /// Fails with [`MonitorError::DuplicateAlert`] when an alert for the same
    /// instance and type is still open.
    pub fn create(&self, new: NewAlert) -> MonitorResult<Alert> {
        self.create_then(new, |_| {})
    }

    /// [`create`](Self::create), running `on_change` before the new alert
    /// is unlocked
    #[instrument(skip_all, fields(instance_id = new.instance_id, alert_type = %new.alert_type))]
    pub fn create_then(&self, new: NewAlert, on_change: impl FnOnce(&Alert)) -> MonitorResult<Alert> {
        let key = (new.instance_id, new.alert_type.clone());

        match self.open.entry(key) {
            Entry::Occupied(mut entry) => {
                let existing = *entry.get();
                let still_open = self
                    .alerts
                    .get(&existing)
                    .is_some_and(|alert| alert.is_open());

                if still_open {
                    return Err(MonitorError::DuplicateAlert {
                        existing,
                        instance_id: new.instance_id,
                        alert_type: new.alert_type,
                    });
                }

                let alert = self.insert(new, on_change);
                entry.insert(alert.id);
                Ok(alert)
            }
            Entry::Vacant(entry) => {
                let alert = self.insert(new, on_change);
                entry.insert(alert.id);
                Ok(alert)
            }
        }
    }

    /// Rebuild a store from persisted alerts
    ///
    /// New ids continue after the highest restored id. If the history holds
    /// several open alerts for one key, the newest owns the key.
    pub fn restore(history: Vec<Alert>) -> Self {
        let store = Self::new();
        let mut max_id = 0;

        for alert in history {
            max_id = max_id.max(alert.id);

            if alert.is_open() {
                let key = (alert.instance_id, alert.alert_type.clone());
                let newest = store
                    .open
                    .get(&key)
                    .is_none_or(|existing| *existing < alert.id);
                if newest {
                    store.open.insert(key, alert.id);
                }
            }

            store.alerts.insert(alert.id, alert);
        }

        store.next_id.store(max_id + 1, Ordering::Relaxed);
        debug!("restored {} alerts", store.alerts.len());
        store
    }

    fn insert(&self, new: NewAlert, on_change: impl FnOnce(&Alert)) -> Alert {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let alert = Alert::from_new(id, new, Utc::now());

        info!(
            "alert {} raised for instance {}: {} ({})",
            alert.id, alert.instance_id, alert.message, alert.severity
        );

        let stored = self.alerts.entry(id).insert(alert);
        on_change(stored.value());
        stored.value().clone()
    }

    /// Active → Acknowledged
    pub fn acknowledge(
        &self,
        alert_id: AlertId,
        by: &str,
        comment: Option<String>,
    ) -> MonitorResult<Alert> {
        self.acknowledge_then(alert_id, by, comment, |_| {})
    }

    #[instrument(skip(self, comment, on_change))]
    pub fn acknowledge_then(
        &self,
        alert_id: AlertId,
        by: &str,
        comment: Option<String>,
        on_change: impl FnOnce(&Alert),
    ) -> MonitorResult<Alert> {
        let mut alert = self
            .alerts
            .get_mut(&alert_id)
            .ok_or(MonitorError::AlertNotFound(alert_id))?;

        if alert.status != AlertStatus::Active {
            return Err(MonitorError::InvalidTransition {
                alert_id,
                from: alert.status,
                action: "acknowledge",
            });
        }

        alert.status = AlertStatus::Acknowledged;
        alert.acknowledged_by = Some(by.to_string());
        alert.acknowledged_at = Some(Utc::now());
        alert.acknowledge_comment = comment;

        info!("alert {alert_id} acknowledged by {by}");
        on_change(&*alert);
        Ok(alert.clone())
    }

    /// Active or Acknowledged → Resolved
    pub fn resolve(&self, alert_id: AlertId, by: &str) -> MonitorResult<Alert> {
        self.resolve_then(alert_id, by, |_| {})
    }

    #[instrument(skip(self, on_change))]
    pub fn resolve_then(
        &self,
        alert_id: AlertId,
        by: &str,
        on_change: impl FnOnce(&Alert),
    ) -> MonitorResult<Alert> {
        self.resolve_with(alert_id, by, "resolve", |_| true, on_change)
    }

    /// Resolution performed by the evaluator once a metric recovered
    ///
    /// Only threshold alerts may be auto-resolved; manual alerts stay open
    /// until an operator resolves them.
    pub fn auto_resolve(&self, alert_id: AlertId) -> MonitorResult<Alert> {
        self.auto_resolve_then(alert_id, |_| {})
    }

    #[instrument(skip(self, on_change))]
    pub fn auto_resolve_then(
        &self,
        alert_id: AlertId,
        on_change: impl FnOnce(&Alert),
    ) -> MonitorResult<Alert> {
        self.resolve_with(
            alert_id,
            SYSTEM_ACTOR,
            "auto-resolve",
            |alert| alert.alert_type.is_rule_based(),
            on_change,
        )
    }

    fn resolve_with(
        &self,
        alert_id: AlertId,
        by: &str,
        action: &'static str,
        allowed: impl FnOnce(&Alert) -> bool,
        on_change: impl FnOnce(&Alert),
    ) -> MonitorResult<Alert> {
        let resolved = {
            let mut alert = self
                .alerts
                .get_mut(&alert_id)
                .ok_or(MonitorError::AlertNotFound(alert_id))?;

            if alert.status == AlertStatus::Resolved || !allowed(&*alert) {
                return Err(MonitorError::InvalidTransition {
                    alert_id,
                    from: alert.status,
                    action,
                });
            }

            alert.status = AlertStatus::Resolved;
            alert.resolved_by = Some(by.to_string());
            alert.resolved_at = Some(Utc::now());
            on_change(&*alert);
            alert.clone()
        };

        self.open.remove_if(
            &(resolved.instance_id, resolved.alert_type.clone()),
            |_, id| *id == alert_id,
        );

        info!("alert {alert_id} resolved by {by}");
        Ok(resolved)
    }

    /// Open alerts for one (instance, type) pair
    ///
    /// "Active" here means not yet resolved: an Acknowledged alert is
    /// returned too and keeps blocking new alerts for the pair, and the
    /// evaluator may auto-resolve it. Holds at most one element. Reads through the same entry `create`
    /// locks, so it never observes a half-created alert.
    pub fn active_alerts_for(&self, instance_id: InstanceId, alert_type: &AlertType) -> Vec<Alert> {
        let Some(id) = self
            .open
            .get(&(instance_id, alert_type.clone()))
            .map(|entry| *entry.value())
        else {
            return Vec::new();
        };

        self.alerts
            .get(&id)
            .filter(|alert| alert.is_open())
            .map(|alert| vec![alert.clone()])
            .unwrap_or_default()
    }

    pub fn get(&self, alert_id: AlertId) -> Option<Alert> {
        self.alerts.get(&alert_id).map(|alert| alert.clone())
    }

    /// All unresolved alerts, oldest first
    pub fn active_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|alert| alert.is_open())
            .map(|alert| alert.clone())
            .collect();
        alerts.sort_by_key(|alert| alert.id);
        alerts
    }

    pub fn alerts_for_instance(&self, instance_id: InstanceId) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|alert| alert.instance_id == instance_id)
            .map(|alert| alert.clone())
            .collect();
        alerts.sort_by_key(|alert| alert.id);
        alerts
    }

    pub fn counts(&self) -> AlertCounts {
        let mut counts = AlertCounts::default();
        for alert in self.alerts.iter() {
            match alert.status {
                AlertStatus::Active => counts.active += 1,
                AlertStatus::Acknowledged => counts.acknowledged += 1,
                AlertStatus::Resolved => counts.resolved += 1,
            }
            if alert.is_open() && alert.severity == Severity::Critical {
                counts.critical += 1;
            }
        }
        counts
    }

    /// Forget resolved alerts resolved before `cutoff`
    pub fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.alerts.len();
        self.alerts.retain(|_, alert| {
            alert.status != AlertStatus::Resolved
                || alert.resolved_at.is_none_or(|resolved_at| resolved_at >= cutoff)
        });
        let purged = before.saturating_sub(self.alerts.len());
        if purged > 0 {
            debug!("purged {purged} resolved alerts");
        }
        purged
    }
}
