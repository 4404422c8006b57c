//! Collector - produces performance snapshots for one instance
//!
//! ## Message Flow
//!
//! ```text
//! collect(instance) → SnapshotSource::fetch ──ok──▶ registry.record_success → snapshot
//!                          │
//!                          └─ error / timeout ──▶ registry.mark_offline → Unreachable
//! ```
//!
//! An unreachable instance is an expected outcome, not a failure of the
//! cycle: the caller records it and the instance is retried next cycle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{instrument, trace, warn};

use crate::cancel::CancelScope;
use crate::registry::InstanceRegistry;
use crate::{Instance, MonitorError, MonitorResult, PerformanceSnapshot, Readings};

/// Default upper bound for one fetch
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Header carrying the shared agent secret
pub const SECRET_HEADER: &str = "X-MONITORING-SECRET";

/// Seam to the monitored instance
///
/// Implementations perform the actual network or database round trip.
/// They do not need to handle timeouts or cancellation; the collector
/// wraps every call.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, instance: &Instance) -> Result<Readings>;
}

/// Polls the `/snapshot` endpoint of a fleetwatch agent
#[derive(Debug, Clone)]
pub struct HttpSnapshotSource {
    /// HTTP client (reused across requests)
    client: reqwest::Client,
}

impl HttpSnapshotSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self, instance: &Instance) -> Result<Readings> {
        let url = format!("http://{}/snapshot", instance.address);

        trace!("requesting snapshot from {url}");

        let mut request = self.client.get(&url);

        if let Some(token) = &instance.token {
            request = request.header(SECRET_HEADER, token);
        }

        let response = request
            .send()
            .await
            .context("failed to send HTTP request")?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP error: {}", response.status());
        }

        let body = response
            .text()
            .await
            .context("failed to read response body")?;

        serde_json::from_str(&body).context("failed to parse snapshot JSON")
    }
}

/// Timeout- and cancellation-bound wrapper around a [`SnapshotSource`]
#[derive(Clone)]
pub struct Collector {
    source: Arc<dyn SnapshotSource>,
    registry: Arc<InstanceRegistry>,
    timeout: Duration,
}

impl Collector {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        registry: Arc<InstanceRegistry>,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            registry,
            timeout,
        }
    }

    /// Fetch a snapshot for `instance`
    ///
    /// On success the registry marks the instance online and moves
    /// `last_seen` forward. On timeout or source failure the instance is
    /// marked offline (`last_seen` stays as it was) and
    /// [`MonitorError::Unreachable`] is returned. A cancelled `scope` aborts
    /// the fetch immediately with [`MonitorError::Cancelled`] and leaves the
    /// registry untouched.
    #[instrument(skip_all, fields(instance_id = instance.id))]
    pub async fn collect(
        &self,
        instance: &Instance,
        scope: &CancelScope,
    ) -> MonitorResult<PerformanceSnapshot> {
        let mut scope = scope.clone();
        if scope.is_cancelled() {
            return Err(MonitorError::Cancelled);
        }

        let fetch = tokio::time::timeout(self.timeout, self.source.fetch(instance));

        let result = tokio::select! {
            biased;
            _ = scope.cancelled() => {
                trace!("collection cancelled");
                return Err(MonitorError::Cancelled);
            }
            result = fetch => result,
        };

        match result {
            Ok(Ok(readings)) => {
                let snapshot = PerformanceSnapshot::new(instance.id, Utc::now(), readings);
                self.registry.record_success(&snapshot);
                trace!("collected snapshot");
                Ok(snapshot)
            }
            Ok(Err(e)) => Err(self.unreachable(instance, format!("{e:#}"))),
            Err(_) => Err(self.unreachable(
                instance,
                format!("timed out after {}ms", self.timeout.as_millis()),
            )),
        }
    }

    fn unreachable(&self, instance: &Instance, reason: String) -> MonitorError {
        let transitioned = self.registry.mark_offline(instance.id);
        warn!(
            "instance {} ({}) unreachable{}: {reason}",
            instance.id,
            instance.name,
            if transitioned { ", marked offline" } else { "" }
        );

        MonitorError::Unreachable {
            instance_id: instance.id,
            reason,
        }
    }
}
