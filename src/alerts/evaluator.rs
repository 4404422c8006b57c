//! Threshold evaluation of performance snapshots
//!
//! ```text
//! value breaches critical           → Breach(Critical)
//! value breaches warning only       → Breach(Warning)
//! value on the safe side of warning → Ok
//! ```
//!
//! Breaches are inclusive: a value exactly at a threshold breaches it.
//! Critical is always checked first so an instance above both thresholds is
//! never reported as Warning.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::store::AlertStore;
use super::{AlertId, AlertType, NewAlert, Severity};
use crate::{InstanceId, Metric, MonitorError, MonitorResult, PerformanceSnapshot};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    /// Breach when value >= threshold
    #[default]
    Above,
    /// Breach when value <= threshold
    Below,
}

impl Comparator {
    pub fn breaches(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Above => value >= threshold,
            Comparator::Below => value <= threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdEvaluation {
    Ok,
    Breach(Severity),
}

impl ThresholdEvaluation {
    pub fn evaluate(value: f64, comparator: Comparator, warning: f64, critical: f64) -> Self {
        if comparator.breaches(value, critical) {
            return ThresholdEvaluation::Breach(Severity::Critical);
        }

        if comparator.breaches(value, warning) {
            return ThresholdEvaluation::Breach(Severity::Warning);
        }

        ThresholdEvaluation::Ok
    }
}

/// Static threshold rule for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub metric: Metric,
    #[serde(default)]
    pub comparator: Comparator,
    pub warning: f64,
    pub critical: f64,
}

impl AlertRule {
    pub fn above(metric: Metric, warning: f64, critical: f64) -> Self {
        Self {
            metric,
            comparator: Comparator::Above,
            warning,
            critical,
        }
    }

    pub fn below(metric: Metric, warning: f64, critical: f64) -> Self {
        Self {
            metric,
            comparator: Comparator::Below,
            warning,
            critical,
        }
    }

    pub fn check(&self, value: f64) -> ThresholdEvaluation {
        ThresholdEvaluation::evaluate(value, self.comparator, self.warning, self.critical)
    }

    pub fn validate(&self) -> MonitorResult<()> {
        if !self.warning.is_finite() || !self.critical.is_finite() {
            return Err(MonitorError::Configuration(format!(
                "rule for {}: thresholds must be finite numbers",
                self.metric
            )));
        }

        let ordered = match self.comparator {
            Comparator::Above => self.critical >= self.warning,
            Comparator::Below => self.critical <= self.warning,
        };

        if !ordered {
            return Err(MonitorError::Configuration(format!(
                "rule for {}: critical threshold {} is less severe than warning threshold {}",
                self.metric, self.critical, self.warning
            )));
        }

        Ok(())
    }

    fn title(&self) -> String {
        match self.comparator {
            Comparator::Above => format!("High {}", self.metric.label()),
            Comparator::Below => format!("Low {}", self.metric.label()),
        }
    }

    fn message(&self, value: f64, severity: Severity) -> String {
        let (kind, threshold) = match severity {
            Severity::Critical => ("critical", self.critical),
            Severity::Warning => ("warning", self.warning),
        };
        let unit = self.metric.unit();

        format!(
            "{} is {}{unit} ({kind} threshold {}{unit})",
            self.metric.label(),
            format_value(value),
            format_value(threshold),
        )
    }
}

/// Default rule set: CPU 80/90 %, memory 85/95 %, any blocked process
pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::above(Metric::CpuPercent, 80.0, 90.0),
        AlertRule::above(Metric::MemoryPercent, 85.0, 95.0),
        AlertRule::above(Metric::BlockedProcesses, 1.0, 10.0),
    ]
}

fn format_value(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded}")
}

/// Outcome of evaluating one rule against one snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum AlertDecision {
    /// No open alert exists for the rule and the value breaches it
    Raise(NewAlert),

    /// The value is back to normal and an open threshold alert exists
    AutoResolve {
        alert_id: AlertId,
        instance_id: InstanceId,
        metric: Metric,
        value: f64,
    },
}

/// Applies the configured rules to snapshots
#[derive(Debug, Clone)]
pub struct AlertEvaluator {
    rules: Vec<AlertRule>,
}

impl AlertEvaluator {
    /// Validate and load the rule set
    ///
    /// Fails with [`MonitorError::Configuration`] on invalid thresholds or
    /// when two rules target the same metric.
    pub fn new(rules: Vec<AlertRule>) -> MonitorResult<Self> {
        let mut seen = HashSet::new();
        for rule in &rules {
            rule.validate()?;
            if !seen.insert(rule.metric) {
                return Err(MonitorError::Configuration(format!(
                    "more than one rule configured for {}",
                    rule.metric
                )));
            }
        }

        debug!("loaded {} alert rules", rules.len());
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Evaluate `snapshot` against every rule
    ///
    /// Open alerts are looked up in `store` so a breach that is already
    /// alerted produces no decision. Rules whose metric is missing from the
    /// snapshot are skipped entirely.
    pub fn evaluate(&self, snapshot: &PerformanceSnapshot, store: &AlertStore) -> Vec<AlertDecision> {
        let mut decisions = Vec::new();

        for rule in &self.rules {
            let Some(value) = snapshot.metric(rule.metric) else {
                trace!(
                    "instance {}: {} missing, skipping rule",
                    snapshot.instance_id, rule.metric
                );
                continue;
            };

            let alert_type = AlertType::Threshold(rule.metric);
            let open = store.active_alerts_for(snapshot.instance_id, &alert_type);
            let evaluation = rule.check(value);

            trace!(
                "instance {}: {} {value} vs {}/{} → {evaluation:?}",
                snapshot.instance_id, rule.metric, rule.warning, rule.critical
            );

            match (evaluation, open.first()) {
                (ThresholdEvaluation::Breach(severity), None) => {
                    decisions.push(AlertDecision::Raise(NewAlert {
                        instance_id: snapshot.instance_id,
                        alert_type,
                        severity,
                        title: rule.title(),
                        message: rule.message(value, severity),
                    }));
                }
                (ThresholdEvaluation::Breach(_), Some(existing)) => {
                    trace!(
                        "instance {}: alert {} already open for {}",
                        snapshot.instance_id, existing.id, rule.metric
                    );
                }
                (ThresholdEvaluation::Ok, Some(existing)) => {
                    decisions.push(AlertDecision::AutoResolve {
                        alert_id: existing.id,
                        instance_id: snapshot.instance_id,
                        metric: rule.metric,
                        value,
                    });
                }
                (ThresholdEvaluation::Ok, None) => {}
            }
        }

        decisions
    }
}
