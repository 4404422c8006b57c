pub mod actors;
pub mod alerts;
pub mod api;
pub mod broadcast;
pub mod cancel;
pub mod collector;
pub mod config;
pub mod error;
pub mod monitor;
pub mod registry;
pub mod scheduler;
pub mod storage;
pub mod util;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub use error::{MonitorError, MonitorResult};

/// Identifier of a monitored database instance
pub type InstanceId = u32;

/// The numeric signals carried by a [`PerformanceSnapshot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    CpuPercent,
    MemoryPercent,
    ActiveConnections,
    BlockedProcesses,
    DiskIops,
    NetworkKbps,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::CpuPercent,
        Metric::MemoryPercent,
        Metric::ActiveConnections,
        Metric::BlockedProcesses,
        Metric::DiskIops,
        Metric::NetworkKbps,
    ];

    /// Human readable label used in alert titles and messages
    pub fn label(&self) -> &'static str {
        match self {
            Metric::CpuPercent => "CPU usage",
            Metric::MemoryPercent => "Memory usage",
            Metric::ActiveConnections => "Active connections",
            Metric::BlockedProcesses => "Blocked processes",
            Metric::DiskIops => "Disk IOPS",
            Metric::NetworkKbps => "Network throughput",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::CpuPercent | Metric::MemoryPercent => "%",
            Metric::NetworkKbps => " KB/s",
            Metric::ActiveConnections | Metric::BlockedProcesses | Metric::DiskIops => "",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::CpuPercent => "cpu_percent",
            Metric::MemoryPercent => "memory_percent",
            Metric::ActiveConnections => "active_connections",
            Metric::BlockedProcesses => "blocked_processes",
            Metric::DiskIops => "disk_iops",
            Metric::NetworkKbps => "network_kbps",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw readings as reported by a snapshot source
///
/// A field is `None` when the source could not read that signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Readings {
    #[serde(default)]
    pub cpu_percent: Option<f64>,
    #[serde(default)]
    pub memory_percent: Option<f64>,
    #[serde(default)]
    pub active_connections: Option<f64>,
    #[serde(default)]
    pub blocked_processes: Option<f64>,
    #[serde(default)]
    pub disk_iops: Option<f64>,
    #[serde(default)]
    pub network_kbps: Option<f64>,
}

impl Readings {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::CpuPercent => self.cpu_percent,
            Metric::MemoryPercent => self.memory_percent,
            Metric::ActiveConnections => self.active_connections,
            Metric::BlockedProcesses => self.blocked_processes,
            Metric::DiskIops => self.disk_iops,
            Metric::NetworkKbps => self.network_kbps,
        }
    }

    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        let slot = match metric {
            Metric::CpuPercent => &mut self.cpu_percent,
            Metric::MemoryPercent => &mut self.memory_percent,
            Metric::ActiveConnections => &mut self.active_connections,
            Metric::BlockedProcesses => &mut self.blocked_processes,
            Metric::DiskIops => &mut self.disk_iops,
            Metric::NetworkKbps => &mut self.network_kbps,
        };
        *slot = Some(value);
        self
    }
}

/// Point-in-time performance reading for one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub instance_id: InstanceId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub readings: Readings,
}

impl PerformanceSnapshot {
    pub fn new(instance_id: InstanceId, timestamp: DateTime<Utc>, readings: Readings) -> Self {
        Self {
            instance_id,
            timestamp,
            readings,
        }
    }

    /// Value of `metric`, if the source reported it
    pub fn metric(&self, metric: Metric) -> Option<f64> {
        self.readings.get(metric)
    }
}

/// One monitored database server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    /// Address of the agent serving snapshots for this instance ("host:port")
    pub address: String,
    /// Shared secret sent to the agent
    #[serde(skip)]
    pub token: Option<String>,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Instance {
    pub fn new(id: InstanceId, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            address: address.into(),
            token: None,
            online: false,
            last_seen: None,
        }
    }

    /// Whether the last successful collection is older than `threshold`
    ///
    /// An instance that was never seen is always stale.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match self.last_seen {
            Some(last_seen) => now - last_seen > threshold,
            None => true,
        }
    }
}
