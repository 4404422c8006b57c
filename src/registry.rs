//! Instance registry and instance directory
//!
//! The registry is the owned replacement for a shared instance map: every
//! access goes through a method, entries are locked individually (sharded
//! `DashMap`), and only collection results change the health fields.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{Instance, InstanceId, PerformanceSnapshot};

/// Connection parameters for one instance, as provided by the directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub id: InstanceId,
    pub name: String,
    pub address: String,
    pub token: Option<String>,
}

impl InstanceDescriptor {
    fn to_instance(&self) -> Instance {
        let mut instance = Instance::new(self.id, self.name.clone(), self.address.clone());
        instance.token = self.token.clone();
        instance
    }
}

/// External source of the set of monitored instances
#[async_trait]
pub trait InstanceDirectory: Send + Sync {
    async fn list_instances(&self) -> anyhow::Result<Vec<InstanceDescriptor>>;
}

/// Directory backed by the configuration file
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    instances: Vec<InstanceDescriptor>,
}

impl StaticDirectory {
    pub fn new(instances: Vec<InstanceDescriptor>) -> Self {
        Self { instances }
    }
}

#[async_trait]
impl InstanceDirectory for StaticDirectory {
    async fn list_instances(&self) -> anyhow::Result<Vec<InstanceDescriptor>> {
        Ok(self.instances.clone())
    }
}

/// Result of reconciling the registry with the directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: Vec<InstanceId>,
    pub removed: Vec<InstanceId>,
    pub updated: Vec<InstanceId>,
}

#[derive(Debug)]
struct InstanceEntry {
    instance: Instance,
    snapshot: Option<PerformanceSnapshot>,
    pipeline: Arc<Mutex<()>>,
}

/// Known instances with their last-known health and latest snapshot
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    entries: DashMap<InstanceId, InstanceEntry>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors(descriptors: &[InstanceDescriptor]) -> Self {
        let registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor.to_instance());
        }
        registry
    }

    /// Add an instance; returns false if the id was already registered
    pub fn register(&self, instance: Instance) -> bool {
        let id = instance.id;
        let mut added = false;
        self.entries.entry(id).or_insert_with(|| {
            added = true;
            InstanceEntry {
                instance,
                snapshot: None,
                pipeline: Arc::new(Mutex::new(())),
            }
        });

        if added {
            debug!("registered instance {id}");
        }
        added
    }

    pub fn remove(&self, id: InstanceId) -> Option<Instance> {
        self.entries.remove(&id).map(|(_, entry)| entry.instance)
    }

    pub fn get(&self, id: InstanceId) -> Option<Instance> {
        self.entries.get(&id).map(|entry| entry.instance.clone())
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.entries.contains_key(&id)
    }

    /// All instances ordered by id
    pub fn instances(&self) -> Vec<Instance> {
        let mut instances: Vec<Instance> = self
            .entries
            .iter()
            .map(|entry| entry.instance.clone())
            .collect();
        instances.sort_by_key(|instance| instance.id);
        instances
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current_snapshot(&self, id: InstanceId) -> Option<PerformanceSnapshot> {
        self.entries.get(&id).and_then(|entry| entry.snapshot.clone())
    }

    /// Lock serializing the collection pipeline of one instance
    pub fn pipeline_lock(&self, id: InstanceId) -> Option<Arc<Mutex<()>>> {
        self.entries.get(&id).map(|entry| entry.pipeline.clone())
    }

    /// Record a successful collection
    ///
    /// Marks the instance online, moves `last_seen` forward and stores the
    /// snapshot. Returns true if the instance was offline before. Snapshots
    /// older than the stored one are ignored.
    pub fn record_success(&self, snapshot: &PerformanceSnapshot) -> bool {
        let Some(mut entry) = self.entries.get_mut(&snapshot.instance_id) else {
            warn!(
                "snapshot for unregistered instance {}, ignoring",
                snapshot.instance_id
            );
            return false;
        };

        let is_newer = entry
            .instance
            .last_seen
            .is_none_or(|last_seen| snapshot.timestamp >= last_seen);
        if !is_newer {
            debug!(
                "instance {}: ignoring out-of-date snapshot from {}",
                snapshot.instance_id, snapshot.timestamp
            );
            return false;
        }

        let came_online = !entry.instance.online;
        entry.instance.online = true;
        entry.instance.last_seen = Some(snapshot.timestamp);
        entry.snapshot = Some(snapshot.clone());

        if came_online {
            info!("instance {} is online", snapshot.instance_id);
        }
        came_online
    }

    /// Mark an instance offline, leaving `last_seen` untouched
    ///
    /// Returns true only for the call that performed the transition.
    pub fn mark_offline(&self, id: InstanceId) -> bool {
        let Some(mut entry) = self.entries.get_mut(&id) else {
            return false;
        };

        if !entry.instance.online {
            return false;
        }

        entry.instance.online = false;
        info!("instance {id} went offline");
        true
    }

    pub fn last_seen(&self, id: InstanceId) -> Option<DateTime<Utc>> {
        self.entries
            .get(&id)
            .and_then(|entry| entry.instance.last_seen)
    }

    /// Reconcile with the directory: add new ids, drop vanished ones and
    /// refresh name/address/token of the rest. Health state is preserved.
    pub fn sync(&self, descriptors: &[InstanceDescriptor]) -> SyncReport {
        let mut report = SyncReport::default();
        let wanted: HashSet<InstanceId> = descriptors.iter().map(|d| d.id).collect();

        for descriptor in descriptors {
            if self.register(descriptor.to_instance()) {
                report.added.push(descriptor.id);
                continue;
            }

            if let Some(mut entry) = self.entries.get_mut(&descriptor.id) {
                let instance = &mut entry.instance;
                if instance.name != descriptor.name
                    || instance.address != descriptor.address
                    || instance.token != descriptor.token
                {
                    instance.name = descriptor.name.clone();
                    instance.address = descriptor.address.clone();
                    instance.token = descriptor.token.clone();
                    report.updated.push(descriptor.id);
                }
            }
        }

        let stale: Vec<InstanceId> = self
            .entries
            .iter()
            .map(|entry| *entry.key())
            .filter(|id| !wanted.contains(id))
            .collect();

        for id in stale {
            self.entries.remove(&id);
            report.removed.push(id);
        }

        report.added.sort_unstable();
        report.removed.sort_unstable();
        report.updated.sort_unstable();

        if report != SyncReport::default() {
            info!(
                "instance directory sync: {} added, {} removed, {} updated",
                report.added.len(),
                report.removed.len(),
                report.updated.len()
            );
        }

        report
    }
}
