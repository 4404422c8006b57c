//! Broadcaster - fan-out of monitor events to live subscribers
//!
//! Each subscriber owns a bounded FIFO channel. `publish` never waits on a
//! subscriber: a full or closed channel counts as a delivery failure and is
//! handled without affecting the other subscribers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace, warn};

use crate::alerts::Alert;
use crate::scheduler::CycleReport;
use crate::{InstanceId, MonitorError, PerformanceSnapshot};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// State change pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    SnapshotUpdate {
        instance_id: InstanceId,
        snapshot: PerformanceSnapshot,
    },
    AlertRaised {
        alert: Alert,
    },
    AlertChanged {
        alert: Alert,
    },
    /// Online flag of an instance flipped
    InstanceStatus {
        instance_id: InstanceId,
        online: bool,
        last_seen: Option<DateTime<Utc>>,
    },
    CycleCompleted {
        summary: CycleReport,
    },
}

impl MonitorEvent {
    /// Instance the event belongs to; `None` for fleet-wide events
    pub fn instance_id(&self) -> Option<InstanceId> {
        match self {
            MonitorEvent::SnapshotUpdate { instance_id, .. }
            | MonitorEvent::InstanceStatus { instance_id, .. } => Some(*instance_id),
            MonitorEvent::AlertRaised { alert } | MonitorEvent::AlertChanged { alert } => {
                Some(alert.instance_id)
            }
            MonitorEvent::CycleCompleted { .. } => None,
        }
    }
}

/// Which instances a subscriber wants to hear about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interest {
    All,
    Instances(HashSet<InstanceId>),
}

impl Interest {
    pub fn instances(ids: impl IntoIterator<Item = InstanceId>) -> Self {
        Interest::Instances(ids.into_iter().collect())
    }

    /// Fleet-wide events match every interest
    pub fn matches(&self, instance_id: Option<InstanceId>) -> bool {
        match (self, instance_id) {
            (Interest::All, _) | (_, None) => true,
            (Interest::Instances(ids), Some(id)) => ids.contains(&id),
        }
    }
}

pub type SubscriptionToken = u64;

/// Receiving side handed to a subscriber
#[derive(Debug)]
pub struct Subscription {
    pub token: SubscriptionToken,
    pub receiver: mpsc::Receiver<MonitorEvent>,
}

#[derive(Debug)]
struct Subscriber {
    subscriber_id: String,
    interest: Interest,
    sender: mpsc::Sender<MonitorEvent>,
    consecutive_failures: AtomicU32,
}

#[derive(Debug)]
pub struct Broadcaster {
    subscribers: DashMap<SubscriptionToken, Subscriber>,
    next_token: AtomicU64,
    channel_capacity: usize,
    max_consecutive_failures: u32,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_CONSECUTIVE_FAILURES)
    }
}

impl Broadcaster {
    pub fn new(channel_capacity: usize, max_consecutive_failures: u32) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_token: AtomicU64::new(1),
            channel_capacity: channel_capacity.max(1),
            max_consecutive_failures: max_consecutive_failures.max(1),
        }
    }

    pub fn subscribe(&self, subscriber_id: impl Into<String>, interest: Interest) -> Subscription {
        let subscriber_id = subscriber_id.into();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.channel_capacity);

        debug!("subscriber {subscriber_id} subscribed ({interest:?}) as #{token}");

        self.subscribers.insert(
            token,
            Subscriber {
                subscriber_id,
                interest,
                sender,
                consecutive_failures: AtomicU32::new(0),
            },
        );

        Subscription { token, receiver }
    }

    /// Returns false if the token was unknown (already dropped)
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        match self.subscribers.remove(&token) {
            Some((_, subscriber)) => {
                debug!("subscriber {} unsubscribed", subscriber.subscriber_id);
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver `event` to every interested subscriber
    ///
    /// Returns the number of subscribers the event was delivered to.
    /// Delivery failures are logged, never returned.
    pub fn publish(&self, event: MonitorEvent) -> usize {
        let instance_id = event.instance_id();
        let mut delivered = 0;
        let mut dropped = Vec::new();

        for subscriber in self.subscribers.iter() {
            if !subscriber.interest.matches(instance_id) {
                continue;
            }

            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => {
                    subscriber.consecutive_failures.store(0, Ordering::Relaxed);
                    delivered += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    dropped.push(*subscriber.key());
                }
                Err(TrySendError::Full(_)) => {
                    let failures = subscriber
                        .consecutive_failures
                        .fetch_add(1, Ordering::Relaxed)
                        + 1;
                    let error = MonitorError::DeliveryFailure {
                        subscriber: subscriber.subscriber_id.clone(),
                        reason: format!(
                            "channel full ({failures}/{} consecutive failures)",
                            self.max_consecutive_failures
                        ),
                    };
                    warn!("{error}");

                    if failures >= self.max_consecutive_failures {
                        dropped.push(*subscriber.key());
                    }
                }
            }
        }

        for token in dropped {
            if let Some((_, subscriber)) = self.subscribers.remove(&token) {
                info!(
                    "dropping subscriber {} (#{token})",
                    subscriber.subscriber_id
                );
            }
        }

        trace!("published event for {instance_id:?} to {delivered} subscribers");
        delivered
    }
}
