#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fleet_agent::controller::{ControllerLink, LinkError};
use fleet_agent::executor::{ExecutionResult, JobContext, JobExecutor};
use fleet_agent::runtime::Agent;
use fleet_core::protocol::{
    CompletionRequest, HeartbeatRequest, HeartbeatResponse, JobOutcome, RegisterRequest,
    RegisterResponse,
};
use fleet_core::status::WorkerStatus;
use fleet_core::types::DbId;
use serde_json::{json, Value};

pub const WORKER_ID: DbId = 41;

/// A call the fake controller received.
#[derive(Debug, Clone)]
pub enum LinkCall {
    Register,
    Heartbeat(HeartbeatRequest),
    Deregister(DbId),
    Ack { job_id: DbId, worker_id: DbId },
    Checkpoint { job_id: DbId, checkpoint_ref: String },
    Complete { job_id: DbId, outcome: JobOutcome },
}

/// In-memory controller.
pub struct FakeLink {
    calls: Mutex<Vec<LinkCall>>,
    expected_job_id: Mutex<Option<DbId>>,
    forget_worker: Mutex<bool>,
    failing_completions: Mutex<u32>,
    failing_registrations: Mutex<u32>,
    heartbeat_interval_secs: Mutex<u64>,
}

impl Default for FakeLink {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            expected_job_id: Mutex::new(None),
            forget_worker: Mutex::new(false),
            failing_completions: Mutex::new(0),
            failing_registrations: Mutex::new(0),
            heartbeat_interval_secs: Mutex::new(15),
        }
    }
}

impl FakeLink {
    pub fn calls(&self) -> Vec<LinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn completions(&self) -> Vec<(DbId, JobOutcome)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                LinkCall::Complete { job_id, outcome } => Some((job_id, outcome)),
                _ => None,
            })
            .collect()
    }

    /// Job ID heartbeat responses claim the worker holds.
    pub fn expect_job(&self, job_id: Option<DbId>) {
        *self.expected_job_id.lock().unwrap() = job_id;
    }

    /// Make heartbeats answer as if the worker were unknown.
    pub fn forget_worker(&self) {
        *self.forget_worker.lock().unwrap() = true;
    }

    /// Fail the next `n` completion reports with a 503.
    pub fn fail_completions(&self, n: u32) {
        *self.failing_completions.lock().unwrap() = n;
    }

    /// Fail the next `n` registrations with a 503.
    pub fn fail_registrations(&self, n: u32) {
        *self.failing_registrations.lock().unwrap() = n;
    }

    /// Interval handed out in registration responses.
    pub fn set_heartbeat_interval_secs(&self, secs: u64) {
        *self.heartbeat_interval_secs.lock().unwrap() = secs;
    }

    pub fn register_attempts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, LinkCall::Register))
            .count()
    }

    pub fn heartbeats(&self) -> Vec<HeartbeatRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                LinkCall::Heartbeat(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: LinkCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ControllerLink for FakeLink {
    async fn register(&self, _request: &RegisterRequest) -> Result<RegisterResponse, LinkError> {
        self.record(LinkCall::Register);
        {
            let mut failing = self.failing_registrations.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(LinkError::Rejected {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
        }
        *self.forget_worker.lock().unwrap() = false;
        Ok(RegisterResponse {
            worker_id: WORKER_ID,
            heartbeat_interval_secs: *self.heartbeat_interval_secs.lock().unwrap(),
        })
    }

    async fn heartbeat(
        &self,
        _worker_id: DbId,
        request: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, LinkError> {
        self.record(LinkCall::Heartbeat(request.clone()));
        if *self.forget_worker.lock().unwrap() {
            return Err(LinkError::UnknownWorker);
        }
        let expected_job_id = *self.expected_job_id.lock().unwrap();
        Ok(HeartbeatResponse {
            applied: true,
            status: if expected_job_id.is_some() {
                WorkerStatus::Working
            } else {
                WorkerStatus::Idle
            },
            expected_job_id,
        })
    }

    async fn deregister(&self, worker_id: DbId) -> Result<(), LinkError> {
        self.record(LinkCall::Deregister(worker_id));
        Ok(())
    }

    async fn ack(&self, job_id: DbId, worker_id: DbId) -> Result<(), LinkError> {
        self.record(LinkCall::Ack { job_id, worker_id });
        Ok(())
    }

    async fn checkpoint(
        &self,
        job_id: DbId,
        _worker_id: DbId,
        checkpoint_ref: &str,
    ) -> Result<(), LinkError> {
        self.record(LinkCall::Checkpoint {
            job_id,
            checkpoint_ref: checkpoint_ref.to_string(),
        });
        Ok(())
    }

    async fn complete(&self, job_id: DbId, request: &CompletionRequest) -> Result<(), LinkError> {
        self.record(LinkCall::Complete {
            job_id,
            outcome: request.outcome.clone(),
        });
        let mut failing = self.failing_completions.lock().unwrap();
        if *failing > 0 {
            *failing -= 1;
            return Err(LinkError::Rejected {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

/// Executor that writes one checkpoint, then waits to be cancelled.
pub struct BlockingExecutor {
    pub checkpoint_ref: String,
}

#[async_trait]
impl JobExecutor for BlockingExecutor {
    async fn execute(&self, ctx: JobContext) -> ExecutionResult {
        ctx.checkpoints.record(&self.checkpoint_ref).await;
        ctx.cancel.cancelled().await;
        ExecutionResult::Stopped {
            checkpoint_ref: Some(self.checkpoint_ref.clone()),
        }
    }
}

/// Executor that finishes at once, echoing the effective configuration
/// and the checkpoint it resumed from.
pub struct EchoExecutor;

#[async_trait]
impl JobExecutor for EchoExecutor {
    async fn execute(&self, ctx: JobContext) -> ExecutionResult {
        ExecutionResult::Finished(JobOutcome::succeeded(json!({
            "config": ctx.config,
            "checkpoint_ref": ctx.checkpoint_ref,
        })))
    }
}

pub fn base_config() -> Value {
    json!({
        "llm": { "model": "base-model", "temperature": 0.2 },
        "output": { "dir": "/var/out" }
    })
}

/// An unregistered agent over `link` and `executor`.
pub fn agent(
    link: Arc<FakeLink>,
    executor: Arc<dyn JobExecutor>,
    retry_delay: Duration,
) -> Agent {
    Agent::new(
        link,
        executor,
        base_config(),
        RegisterRequest {
            hostname: "gpu-01".to_string(),
            port: 8081,
        },
        retry_delay,
    )
}

/// An agent over `link` and `executor`, already registered.
pub async fn registered_agent(
    link: Arc<FakeLink>,
    executor: Arc<dyn JobExecutor>,
) -> Arc<Agent> {
    let agent = Arc::new(agent(link, executor, Duration::from_millis(5)));
    agent.register().await.unwrap();
    agent
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually(check: impl FnMut() -> bool) {
    eventually_within(Duration::from_secs(1), check).await;
}

/// Poll `check` every 5ms until it holds or `timeout` passes.
pub async fn eventually_within(timeout: Duration, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    if !check() {
        panic!("condition not reached in time");
    }
}
