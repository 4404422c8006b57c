use std::collections::HashSet;
use std::path::PathBuf;

use tracing::trace;

use crate::alerts::{AlertEvaluator, AlertRule, default_rules};
use crate::api::ApiConfig;
use crate::registry::InstanceDescriptor;
use crate::{InstanceId, MonitorError, MonitorResult};

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Nothing is persisted
    #[serde(rename = "none")]
    None,

    /// Bounded in-process history, lost on restart
    Memory {
        #[serde(default = "default_memory_retention_days")]
        retention_days: u32,

        /// Snapshots kept per instance
        #[serde(default = "default_snapshots_per_instance")]
        snapshots_per_instance: usize,
    },

    /// SQLite database file
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Snapshots and resolved alerts older than this are deleted
        #[serde(default = "default_sqlite_retention_days")]
        retention_days: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory {
            retention_days: default_memory_retention_days(),
            snapshots_per_instance: default_snapshots_per_instance(),
        }
    }
}

impl StorageConfig {
    pub fn retention_days(&self) -> Option<u32> {
        match self {
            StorageConfig::None => None,
            StorageConfig::Memory { retention_days, .. }
            | StorageConfig::Sqlite { retention_days, .. } => Some(*retention_days),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./fleetwatch.db")
}

fn default_sqlite_retention_days() -> u32 {
    30
}

fn default_memory_retention_days() -> u32 {
    7
}

fn default_snapshots_per_instance() -> usize {
    1000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,

    #[serde(default = "default_rules")]
    pub rules: Vec<AlertRule>,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub collector: CollectorConfig,

    #[serde(default)]
    pub broadcaster: BroadcasterConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct InstanceConfig {
    pub id: InstanceId,
    pub name: Option<String>,
    pub host: String,
    #[serde(default = "crate::util::get_default_port")]
    pub port: u16,
    pub token: Option<String>,
}

impl InstanceConfig {
    fn descriptor(&self) -> InstanceDescriptor {
        InstanceDescriptor {
            id: self.id,
            name: self.name.clone().unwrap_or_else(|| self.host.clone()),
            address: format!("{}:{}", self.host, self.port),
            token: self.token.clone(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_fast_interval")]
    pub fast_interval_secs: u64,
    #[serde(default = "default_slow_interval")]
    pub slow_interval_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fast_interval_secs: default_fast_interval(),
            slow_interval_secs: default_slow_interval(),
            workers: default_workers(),
        }
    }
}

fn default_fast_interval() -> u64 {
    60
}

fn default_slow_interval() -> u64 {
    300
}

fn default_workers() -> usize {
    crate::monitor::DEFAULT_WORKERS
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Snapshots older than this are reported as stale
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            stale_after_secs: default_stale_after(),
        }
    }
}

fn default_timeout() -> u64 {
    crate::collector::DEFAULT_TIMEOUT.as_secs()
}

fn default_stale_after() -> u64 {
    crate::monitor::DEFAULT_STALE_AFTER.as_secs()
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct BroadcasterConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

fn default_channel_capacity() -> usize {
    crate::broadcast::DEFAULT_CHANNEL_CAPACITY
}

fn default_max_consecutive_failures() -> u32 {
    crate::broadcast::DEFAULT_MAX_CONSECUTIVE_FAILURES
}

impl Config {
    pub fn instance_descriptors(&self) -> Vec<InstanceDescriptor> {
        self.instances.iter().map(InstanceConfig::descriptor).collect()
    }

    /// Reject settings the hub cannot run with
    pub fn validate(&self) -> MonitorResult<()> {
        let invalid = |msg: &str| Err(MonitorError::Configuration(msg.to_string()));

        if self.scheduler.fast_interval_secs == 0 || self.scheduler.slow_interval_secs == 0 {
            return invalid("scheduler intervals must be at least one second");
        }
        if self.scheduler.workers == 0 {
            return invalid("scheduler.workers must be at least 1");
        }
        if self.collector.timeout_secs == 0 {
            return invalid("collector.timeout_secs must be at least 1");
        }
        if self.broadcaster.channel_capacity == 0 {
            return invalid("broadcaster.channel_capacity must be at least 1");
        }
        if self.broadcaster.max_consecutive_failures == 0 {
            return invalid("broadcaster.max_consecutive_failures must be at least 1");
        }
        if let StorageConfig::Memory {
            snapshots_per_instance: 0,
            ..
        } = self.storage
        {
            return invalid("storage.snapshots_per_instance must be at least 1");
        }

        let mut seen = HashSet::new();
        for instance in &self.instances {
            if !seen.insert(instance.id) {
                return Err(MonitorError::Configuration(format!(
                    "instance id {} is configured more than once",
                    instance.id
                )));
            }
            if instance.host.trim().is_empty() {
                return Err(MonitorError::Configuration(format!(
                    "instance {} has an empty host",
                    instance.id
                )));
            }
        }

        AlertEvaluator::new(self.rules.clone()).map(|_| ())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
