//! Job execution seam.
//!
//! What a job actually does is outside the agent's concern. The runtime
//! hands a [`JobExecutor`] the effective configuration and a cancellation
//! token; the executor writes checkpoints through its [`CheckpointSink`]
//! and stops cooperatively when cancelled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::protocol::JobOutcome;
use fleet_core::types::DbId;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::controller::ControllerLink;

/// Everything an executor needs to run one job.
pub struct JobContext {
    pub job_id: DbId,
    /// Base configuration with the job's override merged on top.
    pub config: Value,
    pub input_refs: Value,
    /// Where to resume from. `None` runs the job from the start.
    pub checkpoint_ref: Option<String>,
    /// Triggered when the job must stop; the executor should write a final
    /// checkpoint and return [`ExecutionResult::Stopped`].
    pub cancel: CancellationToken,
    pub checkpoints: CheckpointSink,
}

/// How an execution ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    /// The job ran to the end, successfully or not.
    Finished(JobOutcome),
    /// The job was cancelled; carries the last checkpoint written.
    Stopped { checkpoint_ref: Option<String> },
}

#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, ctx: JobContext) -> ExecutionResult;
}

/// Forwards checkpoints to the controller. Failures are logged and
/// otherwise ignored; the final checkpoint also travels in the stop
/// acknowledgement.
#[derive(Clone)]
pub struct CheckpointSink {
    link: Arc<dyn ControllerLink>,
    job_id: DbId,
    worker_id: DbId,
}

impl CheckpointSink {
    pub fn new(link: Arc<dyn ControllerLink>, job_id: DbId, worker_id: DbId) -> Self {
        Self {
            link,
            job_id,
            worker_id,
        }
    }

    pub async fn record(&self, checkpoint_ref: &str) {
        if let Err(e) = self
            .link
            .checkpoint(self.job_id, self.worker_id, checkpoint_ref)
            .await
        {
            tracing::warn!(
                job_id = self.job_id,
                checkpoint_ref,
                error = %e,
                "Failed to report checkpoint",
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Simulated executor
// ---------------------------------------------------------------------------

/// Runs a fixed number of timed steps, checkpointing after each one.
///
/// Checkpoint references look like `job-{id}/step-{n}`; resuming from one
/// continues at step `n`.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    pub steps: u32,
    pub step_duration: Duration,
}

impl SimulatedExecutor {
    pub fn new(steps: u32, step_duration: Duration) -> Self {
        Self {
            steps,
            step_duration,
        }
    }

    pub fn checkpoint_ref(job_id: DbId, step: u32) -> String {
        format!("job-{job_id}/step-{step}")
    }

    /// Step to continue from. Unreadable references restart from zero.
    pub fn resume_step(job_id: DbId, checkpoint_ref: Option<&str>) -> u32 {
        let prefix = format!("job-{job_id}/step-");
        checkpoint_ref
            .and_then(|r| r.strip_prefix(&prefix))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }
}

#[async_trait]
impl JobExecutor for SimulatedExecutor {
    async fn execute(&self, ctx: JobContext) -> ExecutionResult {
        let start = Self::resume_step(ctx.job_id, ctx.checkpoint_ref.as_deref());
        let mut last_checkpoint = ctx.checkpoint_ref.clone();

        tracing::info!(job_id = ctx.job_id, start_step = start, steps = self.steps, "Simulated job started");

        for step in start..self.steps {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    return ExecutionResult::Stopped { checkpoint_ref: last_checkpoint };
                }
                _ = tokio::time::sleep(self.step_duration) => {}
            }

            let checkpoint = Self::checkpoint_ref(ctx.job_id, step + 1);
            ctx.checkpoints.record(&checkpoint).await;
            last_checkpoint = Some(checkpoint);
        }

        ExecutionResult::Finished(JobOutcome::succeeded(json!({
            "steps": self.steps,
            "resumed_from": start,
            "config": ctx.config,
        })))
    }
}
