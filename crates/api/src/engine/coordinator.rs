//! Assignment Coordinator.
//!
//! A single long-lived Tokio task that claims the oldest claimable job for
//! an idle worker and dispatches it. It polls every `poll_interval` and is
//! also woken through [`AssignmentCoordinator::wake`] whenever a handler or
//! the sweeper changes something that may make a claim possible.
//!
//! Pairing is done by [`JobRepo::claim_for_assignment`] under row locks, so
//! several controller instances may run this loop against one database.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleet_core::error::CoreError;
use fleet_core::lifecycle::{ensure_transition, DispatchKind};
use fleet_core::protocol::{ResumeCommand, StartCommand, StopCommand};
use fleet_core::status::JobStatus;
use fleet_core::types::DbId;
use fleet_core::worker_pool::LivenessPolicy;
use fleet_db::models::job::{Claim, Job};
use fleet_db::repositories::{JobRepo, WorkerRepo};
use sqlx::PgPool;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::engine::client::{CommandError, WorkerClient};
use crate::error::{AppError, AppResult};

/// What one claim-and-dispatch attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No claimable job, or no idle worker.
    NothingToClaim,
    Dispatched {
        job_id: DbId,
        worker_id: DbId,
        kind: DispatchKind,
    },
    /// The command could not be delivered; the claim was undone.
    RolledBack {
        job_id: DbId,
        worker_id: DbId,
        error: String,
    },
}

pub struct AssignmentCoordinator {
    pool: PgPool,
    client: Arc<dyn WorkerClient>,
    liveness: LivenessPolicy,
    poll_interval: Duration,
    notify: Notify,
}

impl AssignmentCoordinator {
    pub fn new(
        pool: PgPool,
        client: Arc<dyn WorkerClient>,
        liveness: LivenessPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pool,
            client,
            liveness,
            poll_interval,
            notify: Notify::new(),
        }
    }

    /// Request an assignment pass as soon as possible. Wakes issued while a
    /// pass is running are remembered and trigger one more pass.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Run the assignment loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Assignment coordinator started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Assignment coordinator shutting down");
                    break;
                }
                _ = ticker.tick() => {}
                _ = self.notify.notified() => {}
            }

            match self.assign_pending().await {
                Ok(0) => {}
                Ok(dispatched) => tracing::debug!(dispatched, "Assignment pass finished"),
                Err(e) => tracing::error!(error = %e, "Assignment pass failed"),
            }
        }
    }

    /// Claim and dispatch until nothing is claimable.
    ///
    /// Stops early after a failed dispatch: the released worker is likely
    /// the freshest idle one and would be picked again straight away.
    /// Returns the number of jobs dispatched.
    pub async fn assign_pending(&self) -> Result<usize, sqlx::Error> {
        let mut dispatched = 0;
        loop {
            match self.claim_and_dispatch_one().await? {
                DispatchOutcome::Dispatched { .. } => dispatched += 1,
                DispatchOutcome::RolledBack { .. } | DispatchOutcome::NothingToClaim => {
                    return Ok(dispatched)
                }
            }
        }
    }

    /// Claim one job for one worker and send the matching command.
    pub async fn claim_and_dispatch_one(&self) -> Result<DispatchOutcome, sqlx::Error> {
        let fresh_since = self.liveness.stale_cutoff(Utc::now());
        let Some(claim) = JobRepo::claim_for_assignment(&self.pool, fresh_since).await? else {
            return Ok(DispatchOutcome::NothingToClaim);
        };
        let (job_id, worker_id) = (claim.job.id, claim.worker.id);

        match self.dispatch(&claim).await {
            Ok(kind) => {
                tracing::info!(
                    job_id,
                    worker_id,
                    kind = ?kind,
                    attempt = claim.job.attempts,
                    "Job dispatched",
                );
                Ok(DispatchOutcome::Dispatched {
                    job_id,
                    worker_id,
                    kind,
                })
            }
            Err(e) => {
                tracing::warn!(job_id, worker_id, error = %e, "Dispatch failed, rolling back claim");
                if !JobRepo::rollback_claim(&self.pool, &claim).await? {
                    tracing::warn!(job_id, worker_id, "Claim changed before rollback; left as is");
                }
                Ok(DispatchOutcome::RolledBack {
                    job_id,
                    worker_id,
                    error: e.to_string(),
                })
            }
        }
    }

    async fn dispatch(&self, claim: &Claim) -> Result<DispatchKind, CommandError> {
        let job = &claim.job;
        match DispatchKind::for_prior_status(claim.prior_status) {
            Some(DispatchKind::Resume) => {
                let command = ResumeCommand {
                    job_id: job.id,
                    config_override: job.config_override.clone(),
                    input_refs: job.input_refs.clone(),
                    checkpoint_ref: job.checkpoint_ref.clone(),
                };
                self.client.resume(&claim.worker, &command).await?;
                Ok(DispatchKind::Resume)
            }
            _ => {
                let command = StartCommand {
                    job_id: job.id,
                    config_override: job.config_override.clone(),
                    input_refs: job.input_refs.clone(),
                };
                self.client.start(&claim.worker, &command).await?;
                Ok(DispatchKind::Start)
            }
        }
    }

    /// Pause a held job through its worker.
    ///
    /// The job must be `assigned` or `running`. On the worker's
    /// acknowledgement the job becomes `paused` (keeping any checkpoint the
    /// acknowledgement carries) and the worker idle. If the worker cannot be
    /// reached the job is left untouched; the sweeper deals with a holder
    /// that has actually gone.
    pub async fn stop_job(&self, job_id: DbId) -> AppResult<Job> {
        let job = JobRepo::find_by_id(&self.pool, job_id)
            .await?
            .ok_or_else(|| CoreError::unknown_job(job_id))?;

        ensure_transition(job_id, job.status, JobStatus::Paused)?;

        let holder = match job.assigned_worker_id {
            Some(worker_id) => WorkerRepo::find_by_id(&self.pool, worker_id).await?,
            None => None,
        };
        let Some(worker) = holder else {
            return Err(CoreError::Conflict(format!(
                "Job {job_id} has no live holder; it will be interrupted by the next sweep"
            ))
            .into());
        };

        let ack = self
            .client
            .stop(&worker, &StopCommand { job_id })
            .await
            .map_err(|e| match e {
                CommandError::Transport(e) => AppError::WorkerUnreachable(format!(
                    "Worker {} did not acknowledge stop: {e}",
                    worker.id
                )),
                CommandError::Rejected { status, body } => AppError::Core(CoreError::Conflict(
                    format!("Worker {} refused stop ({status}): {body}", worker.id),
                )),
            })?;

        let paused = JobRepo::pause(&self.pool, job_id, worker.id, ack.checkpoint_ref.as_deref())
            .await?
            .ok_or_else(|| {
                CoreError::Conflict(format!("Job {job_id} changed while it was being stopped"))
            })?;

        tracing::info!(
            job_id,
            worker_id = worker.id,
            checkpoint_ref = ?paused.checkpoint_ref,
            "Job paused",
        );

        self.wake();
        Ok(paused)
    }
}
