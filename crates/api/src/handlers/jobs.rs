//! Handlers for the job ledger.
//!
//! Client endpoints create, list, inspect and stop jobs. Worker endpoints
//! (`ack`, `checkpoint`, `complete`) report progress on a held job and are
//! accepted only from the job's current holder.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use fleet_core::error::CoreError;
use fleet_core::profiles::resolve_job_override;
use fleet_core::protocol::{empty_object, AckRequest, CheckpointRequest, CompletionRequest};
use fleet_core::types::DbId;
use fleet_db::models::job::{CompletionResult, Job, JobListQuery, NewJob};
use fleet_db::repositories::JobRepo;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for `POST /jobs`.
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    /// Named profile to take the override from.
    pub profile: Option<String>,
    /// Inline override document. Mutually exclusive with `profile`.
    pub config_override: Option<serde_json::Value>,
    /// Opaque references to the job's inputs, passed through to the worker.
    #[serde(default)]
    pub input_refs: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn ensure_job_exists(pool: &sqlx::PgPool, id: DbId) -> AppResult<Job> {
    JobRepo::find_by_id(pool, id)
        .await?
        .ok_or_else(|| CoreError::unknown_job(id).into())
}

/// Turn a guarded update that matched nothing into the right error: the
/// job is unknown, or it is not held by `worker_id`.
async fn not_held_error(pool: &sqlx::PgPool, job_id: DbId, worker_id: DbId) -> AppError {
    match JobRepo::find_by_id(pool, job_id).await {
        Ok(Some(job)) => CoreError::Conflict(format!(
            "Job {job_id} is {} and not held by worker {worker_id}",
            job.status
        ))
        .into(),
        Ok(None) => CoreError::unknown_job(job_id).into(),
        Err(e) => e.into(),
    }
}

// ---------------------------------------------------------------------------
// POST /jobs
// ---------------------------------------------------------------------------

/// Create a pending job. The override is resolved once here and stored
/// with the job; later profile edits do not affect it.
pub async fn create_job(
    State(state): State<AppState>,
    Json(input): Json<CreateJobRequest>,
) -> AppResult<impl IntoResponse> {
    let config_override = resolve_job_override(
        state.profiles.as_ref(),
        input.profile.as_deref(),
        input.config_override,
    )?;

    let new_job = NewJob {
        profile: input.profile,
        config_override,
        input_refs: input.input_refs.unwrap_or_else(empty_object),
    };
    let job = JobRepo::create(&state.pool, &new_job).await?;

    tracing::info!(job_id = job.id, profile = ?job.profile, "Job created");
    state.coordinator.wake();

    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// GET /jobs
// ---------------------------------------------------------------------------

/// List jobs, newest first, with optional `?status=&limit=&offset=`.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let jobs = JobRepo::list(&state.pool, &params).await?;
    Ok(Json(DataResponse { data: jobs }))
}

// ---------------------------------------------------------------------------
// GET /jobs/{id}
// ---------------------------------------------------------------------------

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = ensure_job_exists(&state.pool, id).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// POST /jobs/{id}/stop
// ---------------------------------------------------------------------------

/// Pause a held job through its worker. Returns the paused job.
pub async fn stop_job(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.coordinator.stop_job(id).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// POST /jobs/{id}/ack
// ---------------------------------------------------------------------------

/// The holder confirms it started the job: `assigned` → `running`.
pub async fn acknowledge_job(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(input): Json<AckRequest>,
) -> AppResult<impl IntoResponse> {
    let Some(job) = JobRepo::acknowledge(&state.pool, id, input.worker_id).await? else {
        return Err(not_held_error(&state.pool, id, input.worker_id).await);
    };

    tracing::info!(job_id = id, worker_id = input.worker_id, "Job running");
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// POST /jobs/{id}/checkpoint
// ---------------------------------------------------------------------------

pub async fn record_checkpoint(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(input): Json<CheckpointRequest>,
) -> AppResult<impl IntoResponse> {
    let checkpoint_ref = input.checkpoint_ref.trim();
    if checkpoint_ref.is_empty() {
        return Err(AppError::BadRequest(
            "checkpoint_ref must not be empty".to_string(),
        ));
    }

    let Some(job) =
        JobRepo::record_checkpoint(&state.pool, id, input.worker_id, checkpoint_ref).await?
    else {
        return Err(not_held_error(&state.pool, id, input.worker_id).await);
    };

    tracing::debug!(job_id = id, worker_id = input.worker_id, checkpoint_ref, "Checkpoint recorded");
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// POST /jobs/{id}/complete
// ---------------------------------------------------------------------------

/// Record a job's final outcome. A report for a job that already finished
/// is acknowledged without changes so agents can retry safely.
pub async fn complete_job(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(input): Json<CompletionRequest>,
) -> AppResult<impl IntoResponse> {
    let result = JobRepo::report_completion(&state.pool, id, input.worker_id, &input.outcome)
        .await?
        .ok_or_else(|| CoreError::unknown_job(id))?;

    let job = match result {
        CompletionResult::Recorded(job) => {
            tracing::info!(
                job_id = id,
                worker_id = ?input.worker_id,
                status = %job.status,
                "Job finished",
            );
            state.coordinator.wake();
            job
        }
        CompletionResult::AlreadyTerminal(job) => {
            tracing::debug!(job_id = id, status = %job.status, "Duplicate completion report ignored");
            job
        }
        CompletionResult::Rejected { reason, .. } => {
            tracing::warn!(job_id = id, worker_id = ?input.worker_id, %reason, "Completion rejected");
            return Err(CoreError::Conflict(reason).into());
        }
    };

    Ok(Json(DataResponse { data: job }))
}
