//! Scheduler - periodic collection cycles
//!
//! One ticking loop per job kind. Ticks are measured from the job start
//! (`MissedTickBehavior::Skip`), so a slow cycle never shifts the schedule.
//!
//! ## Skip-if-busy
//!
//! ```text
//! tick ─▶ previous cycle finished? ──yes──▶ spawn cycle (own CancelScope)
//!                 │
//!                 no ──▶ skip, count, publish skipped report
//! ```
//!
//! A cycle fans out over the registered instances through a `JoinSet`
//! gated by a `Semaphore`. A failing or panicking instance pipeline is
//! recorded in the cycle report and never affects the others.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::InstanceId;
use crate::broadcast::MonitorEvent;
use crate::cancel::{CancelHandle, CancelScope};
use crate::monitor::Monitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Fast poll of every registered instance
    Performance,

    /// Directory refresh, full pipeline run and retention
    FullCollection,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Performance => write!(f, "performance"),
            JobKind::FullCollection => write!(f, "full-collection"),
        }
    }
}

/// What happened to one instance during a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InstanceOutcome {
    Collected {
        alerts_raised: usize,
        alerts_resolved: usize,
    },
    Unreachable {
        reason: String,
    },
    Cancelled,
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub job: JobKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// The tick was skipped because the previous cycle was still running
    pub skipped: bool,

    pub outcomes: BTreeMap<InstanceId, InstanceOutcome>,
}

impl CycleReport {
    pub fn skipped(job: JobKind, at: DateTime<Utc>) -> Self {
        Self {
            job,
            started_at: at,
            finished_at: at,
            skipped: true,
            outcomes: BTreeMap::new(),
        }
    }

    fn count(&self, predicate: impl Fn(&InstanceOutcome) -> bool) -> usize {
        self.outcomes.values().filter(|o| predicate(o)).count()
    }

    pub fn collected(&self) -> usize {
        self.count(|o| matches!(o, InstanceOutcome::Collected { .. }))
    }

    pub fn unreachable(&self) -> usize {
        self.count(|o| matches!(o, InstanceOutcome::Unreachable { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, InstanceOutcome::Failed { .. }))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, InstanceOutcome::Cancelled))
    }
}

/// Counters of one job kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub completed: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub performance: JobStats,
    pub full_collection: JobStats,
}

#[derive(Debug, Default)]
struct JobCounters {
    completed: AtomicU64,
    skipped: AtomicU64,
}

impl JobCounters {
    fn snapshot(&self) -> JobStats {
        JobStats {
            completed: self.completed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    performance: JobCounters,
    full_collection: JobCounters,
}

impl Counters {
    fn job(&self, job: JobKind) -> &JobCounters {
        match job {
            JobKind::Performance => &self.performance,
            JobKind::FullCollection => &self.full_collection,
        }
    }
}

pub struct Scheduler {
    stop: CancelHandle,
    loops: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl Scheduler {
    /// Start both jobs; the first cycle of each runs immediately
    pub fn start(monitor: Arc<Monitor>, fast: Duration, slow: Duration) -> Self {
        let (stop, scope) = CancelHandle::new();
        let counters = Arc::new(Counters::default());

        info!(
            "starting scheduler (performance every {}s, full collection every {}s)",
            fast.as_secs_f64(),
            slow.as_secs_f64()
        );

        let loops = [(JobKind::Performance, fast), (JobKind::FullCollection, slow)]
            .into_iter()
            .map(|(job, period)| {
                tokio::spawn(job_loop(
                    monitor.clone(),
                    job,
                    period,
                    counters.clone(),
                    scope.clone(),
                ))
            })
            .collect();

        Self {
            stop,
            loops,
            counters,
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            performance: self.counters.performance.snapshot(),
            full_collection: self.counters.full_collection.snapshot(),
        }
    }

    /// Cancel in-flight cycles and wait until they finished
    pub async fn stop(self) {
        debug!("stopping scheduler");
        self.stop.cancel();

        for handle in self.loops {
            if let Err(e) = handle.await {
                error!("scheduler loop failed: {e}");
            }
        }

        info!("scheduler stopped");
    }
}

#[instrument(skip(monitor, counters, stop))]
async fn job_loop(
    monitor: Arc<Monitor>,
    job: JobKind,
    period: Duration,
    counters: Arc<Counters>,
    mut stop: CancelScope,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut running: Option<(JoinHandle<CycleReport>, CancelHandle)> = None;

    loop {
        tokio::select! {
            biased;

            _ = stop.cancelled() => break,

            _ = interval.tick() => {
                if let Some((handle, _)) = &running
                    && !handle.is_finished()
                {
                    warn!("{job} cycle still running, skipping tick");
                    counters.job(job).skipped.fetch_add(1, Ordering::Relaxed);
                    monitor.broadcaster().publish(MonitorEvent::CycleCompleted {
                        summary: CycleReport::skipped(job, Utc::now()),
                    });
                    continue;
                }

                if let Some((handle, _)) = running.take() {
                    reap(job, handle).await;
                }

                let (cancel, scope) = CancelHandle::new();
                let cycle_monitor = monitor.clone();
                let cycle_counters = counters.clone();
                let handle = tokio::spawn(async move {
                    let report = run_cycle(&cycle_monitor, job, scope).await;
                    cycle_counters.job(job).completed.fetch_add(1, Ordering::Relaxed);
                    report
                });
                running = Some((handle, cancel));
            }
        }
    }

    if let Some((handle, cancel)) = running.take() {
        cancel.cancel();
        reap(job, handle).await;
    }

    debug!("{job} loop stopped");
}

async fn reap(job: JobKind, handle: JoinHandle<CycleReport>) {
    if let Err(e) = handle.await {
        error!("{job} cycle task failed: {e}");
    }
}

/// Run one cycle of `job` over every registered instance
///
/// The report is logged and published before it is returned.
#[instrument(skip(monitor, scope))]
pub async fn run_cycle(monitor: &Arc<Monitor>, job: JobKind, scope: CancelScope) -> CycleReport {
    let started_at = Utc::now();

    if job == JobKind::FullCollection
        && let Err(e) = monitor.sync_directory().await
    {
        warn!("instance directory unavailable, keeping current registry: {e:#}");
    }

    let outcomes = run_pipelines(monitor, &scope).await;

    if job == JobKind::FullCollection && !scope.is_cancelled() {
        if let Some(report) = monitor.apply_retention().await {
            debug!(
                "retention removed {} snapshots, {} alerts",
                report.snapshots_deleted, report.alerts_deleted
            );
        }
    }

    let report = CycleReport {
        job,
        started_at,
        finished_at: Utc::now(),
        skipped: false,
        outcomes,
    };

    info!(
        "{job} cycle finished in {}ms: {} collected, {} unreachable, {} failed, {} cancelled",
        (report.finished_at - report.started_at).num_milliseconds(),
        report.collected(),
        report.unreachable(),
        report.failed(),
        report.cancelled()
    );

    monitor.broadcaster().publish(MonitorEvent::CycleCompleted {
        summary: report.clone(),
    });

    report
}

async fn run_pipelines(
    monitor: &Arc<Monitor>,
    scope: &CancelScope,
) -> BTreeMap<InstanceId, InstanceOutcome> {
    let ids: Vec<InstanceId> = monitor
        .registry()
        .instances()
        .iter()
        .map(|instance| instance.id)
        .collect();

    let semaphore = Arc::new(Semaphore::new(monitor.workers()));
    let mut outcomes = BTreeMap::new();
    let mut tasks = JoinSet::new();
    let mut cancelled = scope.clone();

    for id in ids {
        let permit = tokio::select! {
            biased;
            _ = cancelled.cancelled() => {
                outcomes.insert(id, InstanceOutcome::Cancelled);
                continue;
            }
            permit = semaphore.clone().acquire_owned() => permit,
        };

        let Ok(permit) = permit else {
            outcomes.insert(
                id,
                InstanceOutcome::Failed {
                    reason: "worker pool closed".to_string(),
                },
            );
            continue;
        };

        let monitor = monitor.clone();
        let scope = scope.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let outcome = AssertUnwindSafe(monitor.process_instance(id, &scope))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let reason = panic_message(panic.as_ref());
                    error!("pipeline for instance {id} panicked: {reason}");
                    InstanceOutcome::Failed { reason }
                });
            (id, outcome)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((id, outcome)) => {
                outcomes.insert(id, outcome);
            }
            Err(e) => error!("pipeline task failed: {e}"),
        }
    }

    outcomes
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}
