//! Messages exchanged between the controller and worker agents.
//!
//! Worker → controller bodies travel under `/api/v1`, wrapped in the usual
//! `{ "data": ... }` envelope on the way back. Controller → worker commands
//! are posted to the agent's command server at the paths below.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::status::WorkerStatus;
use crate::types::{DbId, Timestamp};

/// Agent path for the start command.
pub const COMMAND_START_PATH: &str = "/commands/start";

/// Agent path for the stop command.
pub const COMMAND_STOP_PATH: &str = "/commands/stop";

/// Agent path for the resume command.
pub const COMMAND_RESUME_PATH: &str = "/commands/resume";

// ---------------------------------------------------------------------------
// Worker → controller
// ---------------------------------------------------------------------------

/// `POST /workers/register`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub hostname: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub worker_id: DbId,
    pub heartbeat_interval_secs: u64,
}

/// `POST /workers/{id}/heartbeat`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// What the agent believes it is doing.
    pub status: WorkerStatus,
    pub current_job_id: Option<DbId>,
    /// Agent clock at send time. Heartbeats older than the last applied one
    /// are dropped.
    pub sent_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    /// `false` when the heartbeat arrived out of order and was ignored.
    pub applied: bool,
    /// The controller's view of this worker.
    pub status: WorkerStatus,
    /// The job the controller has assigned to this worker. Anything else the
    /// agent is running should be abandoned.
    pub expected_job_id: Option<DbId>,
}

/// `POST /jobs/{id}/ack`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckRequest {
    pub worker_id: DbId,
}

/// `POST /jobs/{id}/checkpoint`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRequest {
    pub worker_id: DbId,
    pub checkpoint_ref: String,
}

/// How a job ended, as reported by the worker that ran it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn succeeded(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// `POST /jobs/{id}/complete`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    #[serde(default)]
    pub worker_id: Option<DbId>,
    pub outcome: JobOutcome,
}

// ---------------------------------------------------------------------------
// Controller → worker
// ---------------------------------------------------------------------------

/// Default for omitted `input_refs`: an empty object, as stored in the
/// ledger.
pub fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// Begin a job that has never run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartCommand {
    pub job_id: DbId,
    pub config_override: Value,
    #[serde(default = "empty_object")]
    pub input_refs: Value,
}

/// Continue a paused or interrupted job. A missing checkpoint means the job
/// restarts from scratch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeCommand {
    pub job_id: DbId,
    pub config_override: Value,
    #[serde(default = "empty_object")]
    pub input_refs: Value,
    pub checkpoint_ref: Option<String>,
}

/// Pause a job gracefully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopCommand {
    pub job_id: DbId,
}

/// Agent acknowledgement of a stop, carrying the checkpoint written while
/// stopping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopAck {
    pub job_id: DbId,
    pub checkpoint_ref: Option<String>,
}
