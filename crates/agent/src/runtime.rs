//! Agent runtime: identity, the single job slot, heartbeats.
//!
//! An agent runs at most one job at a time. Its identity is whatever the
//! controller handed out at the last registration; when the controller
//! stops recognising it, the agent drops its job and registers again from
//! scratch.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use fleet_core::config_merge::{merge_with, MergeOptions};
use fleet_core::protocol::{
    CompletionRequest, HeartbeatRequest, HeartbeatResponse, JobOutcome, RegisterRequest,
    ResumeCommand, StartCommand, StopAck, StopCommand,
};
use fleet_core::status::WorkerStatus;
use fleet_core::types::DbId;
use fleet_core::worker_pool::DEFAULT_HEARTBEAT_INTERVAL_SECS;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::controller::{ControllerLink, LinkError};
use crate::executor::{CheckpointSink, ExecutionResult, JobContext, JobExecutor};

/// Attempts made to deliver a completion report.
pub const COMPLETION_ATTEMPTS: u32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent is busy with job {running_job_id}")]
    Busy { running_job_id: DbId },

    #[error("Job {job_id} is not running on this agent")]
    NotRunning { job_id: DbId },

    #[error("Agent is not registered with the controller")]
    NotRegistered,
}

struct RunningJob {
    job_id: DbId,
    cancel: CancellationToken,
    /// Set once the executor returns.
    result: watch::Receiver<Option<ExecutionResult>>,
}

struct Identity {
    worker_id: DbId,
    heartbeat_interval: Duration,
}

pub struct Agent {
    link: Arc<dyn ControllerLink>,
    executor: Arc<dyn JobExecutor>,
    base_config: Value,
    merge_options: MergeOptions,
    advertise: RegisterRequest,
    retry_delay: Duration,
    identity: Mutex<Option<Identity>>,
    slot: Mutex<Option<RunningJob>>,
    /// Finished job whose completion report has not been delivered yet.
    reporting: Mutex<Option<DbId>>,
}

impl Agent {
    pub fn new(
        link: Arc<dyn ControllerLink>,
        executor: Arc<dyn JobExecutor>,
        base_config: Value,
        advertise: RegisterRequest,
        retry_delay: Duration,
    ) -> Self {
        Self {
            link,
            executor,
            base_config,
            merge_options: MergeOptions::default(),
            advertise,
            retry_delay,
            identity: Mutex::new(None),
            slot: Mutex::new(None),
            reporting: Mutex::new(None),
        }
    }

    /// Use `options` when merging job overrides onto the base config.
    pub fn with_merge_options(mut self, options: MergeOptions) -> Self {
        self.merge_options = options;
        self
    }

    fn identity(&self) -> MutexGuard<'_, Option<Identity>> {
        self.identity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self) -> MutexGuard<'_, Option<RunningJob>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reporting(&self) -> MutexGuard<'_, Option<DbId>> {
        self.reporting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn worker_id(&self) -> Option<DbId> {
        self.identity().as_ref().map(|i| i.worker_id)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.identity()
            .as_ref()
            .map(|i| i.heartbeat_interval)
            .unwrap_or(Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS))
    }

    pub fn current_job_id(&self) -> Option<DbId> {
        self.slot().as_ref().map(|r| r.job_id)
    }

    // ── Registration ─────────────────────────────────────────────────────

    /// One registration attempt. On success the new identity replaces any
    /// previous one.
    pub async fn register(&self) -> Result<DbId, LinkError> {
        let response = self.link.register(&self.advertise).await?;
        *self.identity() = Some(Identity {
            worker_id: response.worker_id,
            heartbeat_interval: Duration::from_secs(response.heartbeat_interval_secs.max(1)),
        });
        tracing::info!(
            worker_id = response.worker_id,
            heartbeat_interval_secs = response.heartbeat_interval_secs,
            "Registered with controller",
        );
        Ok(response.worker_id)
    }

    /// Register, retrying at a fixed delay until it works or `cancel`
    /// fires. Returns `None` when cancelled.
    pub async fn register_until_success(&self, cancel: &CancellationToken) -> Option<DbId> {
        loop {
            match self.register().await {
                Ok(worker_id) => return Some(worker_id),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_secs = self.retry_delay.as_secs(),
                        "Registration failed",
                    );
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }

    // ── Commands ─────────────────────────────────────────────────────────

    pub fn start(self: &Arc<Self>, command: StartCommand) -> Result<(), AgentError> {
        self.launch(
            command.job_id,
            &command.config_override,
            command.input_refs,
            None,
        )
    }

    pub fn resume(self: &Arc<Self>, command: ResumeCommand) -> Result<(), AgentError> {
        self.launch(
            command.job_id,
            &command.config_override,
            command.input_refs,
            command.checkpoint_ref,
        )
    }

    fn launch(
        self: &Arc<Self>,
        job_id: DbId,
        config_override: &Value,
        input_refs: Value,
        checkpoint_ref: Option<String>,
    ) -> Result<(), AgentError> {
        let worker_id = self.worker_id().ok_or(AgentError::NotRegistered)?;

        let cancel = CancellationToken::new();
        let (result_tx, result_rx) = watch::channel(None);
        {
            let mut slot = self.slot();
            if let Some(running) = slot.as_ref() {
                return Err(AgentError::Busy {
                    running_job_id: running.job_id,
                });
            }
            *slot = Some(RunningJob {
                job_id,
                cancel: cancel.clone(),
                result: result_rx,
            });
        }

        let ctx = JobContext {
            job_id,
            config: merge_with(&self.base_config, config_override, &self.merge_options),
            input_refs,
            checkpoint_ref,
            cancel,
            checkpoints: CheckpointSink::new(Arc::clone(&self.link), job_id, worker_id),
        };

        tracing::info!(
            job_id,
            worker_id,
            resume_from = ?ctx.checkpoint_ref,
            "Job accepted",
        );

        let agent = Arc::clone(self);
        tokio::spawn(async move { agent.run_job(ctx, worker_id, result_tx).await });
        Ok(())
    }

    async fn run_job(
        &self,
        ctx: JobContext,
        worker_id: DbId,
        result_tx: watch::Sender<Option<ExecutionResult>>,
    ) {
        let job_id = ctx.job_id;
        if let Err(e) = self.link.ack(job_id, worker_id).await {
            // The next heartbeat acknowledges the start as well.
            tracing::warn!(job_id, error = %e, "Failed to acknowledge job start");
        }

        let result = self.executor.execute(ctx).await;

        // Free the slot before telling anyone: the controller may dispatch
        // the next job as soon as it hears about this one. Heartbeats keep
        // naming the job until its report is delivered.
        let finished = matches!(result, ExecutionResult::Finished(_));
        let owned = self.release_slot(job_id, finished);
        result_tx.send_replace(Some(result.clone()));

        match result {
            ExecutionResult::Finished(outcome) if owned => {
                self.report_completion(job_id, worker_id, outcome).await;
                let mut reporting = self.reporting();
                if *reporting == Some(job_id) {
                    *reporting = None;
                }
            }
            ExecutionResult::Finished(_) => {
                tracing::debug!(job_id, "Abandoned job finished; outcome discarded");
            }
            ExecutionResult::Stopped { checkpoint_ref } => {
                tracing::info!(job_id, ?checkpoint_ref, "Job stopped");
            }
        }
    }

    /// Clear the slot if it still holds `job_id`. Returns whether it did.
    /// With `pending_report`, the job is remembered until its completion
    /// report goes out.
    fn release_slot(&self, job_id: DbId, pending_report: bool) -> bool {
        let mut slot = self.slot();
        match slot.as_ref() {
            Some(running) if running.job_id == job_id => {
                *slot = None;
                if pending_report {
                    *self.reporting() = Some(job_id);
                }
                true
            }
            _ => false,
        }
    }

    /// Stop the running job and wait for its final checkpoint.
    pub async fn stop(&self, command: StopCommand) -> Result<StopAck, AgentError> {
        let job_id = command.job_id;
        let (cancel, mut result) = match self.slot().as_ref() {
            Some(running) if running.job_id == job_id => {
                (running.cancel.clone(), running.result.clone())
            }
            _ => return Err(AgentError::NotRunning { job_id }),
        };

        tracing::info!(job_id, "Stopping job");
        cancel.cancel();

        let finished = result
            .wait_for(Option::is_some)
            .await
            .map(|r| r.clone())
            .ok()
            .flatten();

        match finished {
            Some(ExecutionResult::Stopped { checkpoint_ref }) => Ok(StopAck {
                job_id,
                checkpoint_ref,
            }),
            // Finished before the stop landed; its completion is reported
            // instead.
            _ => Err(AgentError::NotRunning { job_id }),
        }
    }

    /// Drop the running job without reporting anything about it.
    pub fn abandon(&self, job_id: DbId, reason: &str) {
        let running = {
            let mut slot = self.slot();
            match slot.as_ref() {
                Some(running) if running.job_id == job_id => slot.take(),
                _ => None,
            }
        };
        if let Some(running) = running {
            tracing::warn!(job_id, reason, "Abandoning job");
            running.cancel.cancel();
        }
    }

    async fn report_completion(&self, job_id: DbId, worker_id: DbId, outcome: JobOutcome) {
        let request = CompletionRequest {
            worker_id: Some(worker_id),
            outcome,
        };
        for attempt in 1..=COMPLETION_ATTEMPTS {
            match self.link.complete(job_id, &request).await {
                Ok(()) => {
                    tracing::info!(job_id, success = request.outcome.success, "Completion reported");
                    return;
                }
                Err(e) if e.is_retryable() && attempt < COMPLETION_ATTEMPTS => {
                    tracing::warn!(job_id, attempt, error = %e, "Completion report failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    tracing::error!(job_id, attempt, error = %e, "Giving up on completion report");
                    return;
                }
            }
        }
    }

    // ── Heartbeats ───────────────────────────────────────────────────────

    /// Send one heartbeat and act on the controller's answer: a local job
    /// the controller no longer expects is abandoned.
    ///
    /// A finished job still waiting on its completion report counts as
    /// held, so the controller does not interrupt it in the meantime.
    pub async fn heartbeat_once(&self) -> Result<HeartbeatResponse, LinkError> {
        let worker_id = self.worker_id().ok_or(LinkError::UnknownWorker)?;
        let current = self.current_job_id();
        let reported = current.or_else(|| *self.reporting());
        let request = HeartbeatRequest {
            status: if reported.is_some() {
                WorkerStatus::Working
            } else {
                WorkerStatus::Idle
            },
            current_job_id: reported,
            sent_at: Some(Utc::now()),
        };

        let response = self.link.heartbeat(worker_id, &request).await?;

        if let Some(local) = current {
            if response.expected_job_id != Some(local) {
                self.abandon(local, "controller no longer expects this job");
            }
        }
        Ok(response)
    }

    /// Heartbeat until `cancel` fires, re-registering whenever the
    /// controller has forgotten this worker.
    pub async fn run_heartbeats(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.heartbeat_interval()) => {}
            }

            match self.heartbeat_once().await {
                Ok(response) if !response.applied => {
                    tracing::debug!("Heartbeat arrived out of order");
                }
                Ok(_) => {}
                Err(LinkError::UnknownWorker) => {
                    tracing::warn!(
                        worker_id = ?self.worker_id(),
                        "Controller no longer knows this worker, registering again",
                    );
                    *self.identity() = None;
                    if let Some(job_id) = self.current_job_id() {
                        self.abandon(job_id, "worker identity lost");
                    }
                    if self.register_until_success(&cancel).await.is_none() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Heartbeat failed");
                }
            }
        }
        tracing::info!("Heartbeat loop stopped");
    }

    /// Abandon any running job and deregister. The controller interrupts
    /// the job so another worker can resume it.
    pub async fn shutdown(&self) {
        if let Some(job_id) = self.current_job_id() {
            self.abandon(job_id, "agent shutting down");
        }
        let Some(worker_id) = self.worker_id() else {
            return;
        };
        match self.link.deregister(worker_id).await {
            Ok(()) => tracing::info!(worker_id, "Deregistered from controller"),
            Err(e) => tracing::warn!(worker_id, error = %e, "Deregistration failed"),
        }
        *self.identity() = None;
    }
}
