//! Liveness Sweeper.
//!
//! Every `sweep_interval` (a third of the stale threshold by default):
//! 1. marks silent workers stale,
//! 2. interrupts jobs held by stale or vanished workers, releasing both
//!    sides so the jobs can be reassigned,
//! 3. evicts stale workers silent past the eviction threshold.
//!
//! A worker that goes silent therefore loses its job within one sweep
//! interval of crossing the stale threshold.

use std::sync::Arc;

use chrono::Utc;
use fleet_core::types::{DbId, Timestamp};
use fleet_core::worker_pool::LivenessPolicy;
use fleet_db::repositories::{JobRepo, WorkerRepo};
use sqlx::PgPool;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::engine::coordinator::AssignmentCoordinator;

/// What one sweep changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub marked_stale: Vec<DbId>,
    pub interrupted: Vec<DbId>,
    pub evicted: u64,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.marked_stale.is_empty() && self.interrupted.is_empty() && self.evicted == 0
    }
}

/// Run one sweep as of `now`.
pub async fn sweep_once(
    pool: &PgPool,
    policy: &LivenessPolicy,
    now: Timestamp,
) -> Result<SweepReport, sqlx::Error> {
    let marked_stale = WorkerRepo::mark_stale(pool, policy.stale_cutoff(now)).await?;
    let interrupted = JobRepo::interrupt_orphaned(pool).await?;
    let evicted = WorkerRepo::evict(pool, policy.eviction_cutoff(now)).await?;

    Ok(SweepReport {
        marked_stale,
        interrupted,
        evicted,
    })
}

/// Run the sweeper loop until `cancel` is triggered.
///
/// Wakes the coordinator whenever a sweep frees jobs for reassignment.
pub async fn run(
    pool: PgPool,
    policy: LivenessPolicy,
    coordinator: Arc<AssignmentCoordinator>,
    cancel: CancellationToken,
) {
    tracing::info!(
        sweep_interval_secs = policy.sweep_interval.as_secs(),
        stale_threshold_secs = policy.stale_threshold.as_secs(),
        eviction_threshold_secs = policy.eviction_threshold.as_secs(),
        "Liveness sweeper started"
    );

    let mut interval = tokio::time::interval(policy.sweep_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Liveness sweeper stopping");
                break;
            }
            _ = interval.tick() => {
                match sweep_once(&pool, &policy, Utc::now()).await {
                    Ok(report) if report.is_empty() => {
                        tracing::debug!("Liveness sweep: nothing to do");
                    }
                    Ok(report) => {
                        tracing::info!(
                            marked_stale = ?report.marked_stale,
                            interrupted = ?report.interrupted,
                            evicted = report.evicted,
                            "Liveness sweep finished"
                        );
                        if !report.interrupted.is_empty() {
                            coordinator.wake();
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Liveness sweep failed");
                    }
                }
            }
        }
    }
}
