//! Job lifecycle state machine.
//!
//! ```text
//! pending --claim--> assigned --ack--> running
//! assigned/running --stop ack--> paused
//! assigned/running --liveness failure--> interrupted
//! paused/interrupted --claim--> assigned
//! assigned/running/paused/interrupted --completion--> completed | failed
//! assigned --claim rollback--> pending | paused | interrupted
//! ```
//!
//! The repository layer enforces these transitions with conditional
//! updates; the functions here are the single description of which
//! transitions exist.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::status::JobStatus;
use crate::types::DbId;

/// Statuses a job can be claimed from.
pub const CLAIMABLE: [JobStatus; 3] = [
    JobStatus::Pending,
    JobStatus::Paused,
    JobStatus::Interrupted,
];

/// Statuses in which a job is held by exactly one worker.
pub const HELD: [JobStatus; 2] = [JobStatus::Assigned, JobStatus::Running];

/// Statuses that accept no further transitions.
pub const TERMINAL: [JobStatus; 2] = [JobStatus::Completed, JobStatus::Failed];

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        TERMINAL.contains(&self)
    }
}

/// Whether `from -> to` is an edge of the job state machine.
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;

    match (from, to) {
        (Pending | Paused | Interrupted, Assigned) => true,
        (Assigned, Running) => true,
        (Assigned | Running, Paused | Interrupted) => true,
        (Assigned | Running | Paused | Interrupted, Completed | Failed) => true,
        // Compensation after a failed dispatch.
        (Assigned, Pending) => true,
        _ => false,
    }
}

/// Like [`can_transition`] but produces a `Conflict` error naming both ends.
pub fn ensure_transition(job_id: DbId, from: JobStatus, to: JobStatus) -> Result<(), CoreError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(CoreError::Conflict(format!(
            "Job {job_id} cannot move from {from} to {to}"
        )))
    }
}

/// Which command a freshly claimed job is dispatched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchKind {
    Start,
    Resume,
}

impl DispatchKind {
    /// Pick the command for a job claimed out of `prior` status.
    ///
    /// Returns `None` for statuses that are never claimed.
    pub fn for_prior_status(prior: JobStatus) -> Option<Self> {
        match prior {
            JobStatus::Pending => Some(DispatchKind::Start),
            JobStatus::Paused | JobStatus::Interrupted => Some(DispatchKind::Resume),
            _ => None,
        }
    }
}

/// What to do with a completion report given the job's stored state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionDecision {
    /// Record the outcome and release the holder, if any.
    Apply,
    /// The job already finished; accept the report without changes.
    AlreadyTerminal,
    /// The report cannot be accepted.
    Reject(String),
}

/// Decide how to treat a completion report.
///
/// `reporter` is the worker that sent the report, when it identified itself.
/// A report from a worker that is not the current holder is rejected, since
/// the job has been handed to someone else. Reports for paused or
/// interrupted jobs are accepted: the work was done, nobody holds the job.
pub fn decide_completion(
    status: JobStatus,
    assigned_worker: Option<DbId>,
    reporter: Option<DbId>,
) -> CompletionDecision {
    if status.is_terminal() {
        return CompletionDecision::AlreadyTerminal;
    }
    if status == JobStatus::Pending {
        return CompletionDecision::Reject("job has not been started".to_string());
    }
    match (assigned_worker, reporter) {
        (Some(holder), Some(reporter)) if holder != reporter => CompletionDecision::Reject(
            format!("job is held by worker {holder}, not worker {reporter}"),
        ),
        _ => CompletionDecision::Apply,
    }
}
