//! Job ledger models and DTOs.

use fleet_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::status::JobStatus;
use crate::models::worker::Worker;

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    #[sqlx(rename = "status_id", try_from = "i16")]
    pub status: JobStatus,
    /// Name of the profile the override was resolved from, if any.
    pub profile: Option<String>,
    pub config_override: serde_json::Value,
    pub input_refs: serde_json::Value,
    pub assigned_worker_id: Option<DbId>,
    pub checkpoint_ref: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    /// Number of times the job has been claimed.
    pub attempts: i32,
    pub claimed_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for inserting a job. The override is already resolved and validated.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub profile: Option<String>,
    pub config_override: serde_json::Value,
    pub input_refs: serde_json::Value,
}

/// Query parameters for `GET /api/v1/jobs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobListQuery {
    pub status: Option<JobStatus>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

/// A job paired with a worker by [`claim_for_assignment`].
///
/// [`claim_for_assignment`]: crate::repositories::JobRepo::claim_for_assignment
#[derive(Debug, Clone)]
pub struct Claim {
    pub job: Job,
    pub worker: Worker,
    /// Status the job was claimed out of; restored if dispatch fails.
    pub prior_status: JobStatus,
}

/// Result of a completion report for an existing job.
#[derive(Debug, Clone)]
pub enum CompletionResult {
    /// Outcome stored; the holder, if any, was released.
    Recorded(Job),
    /// The job had already finished. Nothing changed.
    AlreadyTerminal(Job),
    Rejected { job: Job, reason: String },
}
