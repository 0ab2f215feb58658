//! Handlers for the worker registry.
//!
//! Provides:
//! - Agent endpoints: registration, heartbeat, deregistration.
//! - Read endpoints: list, get, fleet stats, health log.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;

use fleet_core::error::CoreError;
use fleet_core::protocol::{HeartbeatRequest, HeartbeatResponse, RegisterRequest, RegisterResponse};
use fleet_core::types::DbId;
use fleet_core::worker_pool;
use fleet_db::models::worker::{HeartbeatOutcome, Worker, WorkerListQuery};
use fleet_db::repositories::WorkerRepo;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Verify that a worker exists, returning the full Worker row.
async fn ensure_worker_exists(pool: &sqlx::PgPool, id: DbId) -> AppResult<Worker> {
    WorkerRepo::find_by_id(pool, id)
        .await?
        .ok_or_else(|| CoreError::unknown_worker(id).into())
}

// ---------------------------------------------------------------------------
// POST /workers/register
// ---------------------------------------------------------------------------

/// Register a worker. Every call yields a new identity; agents call this
/// on startup and again whenever the controller no longer knows them.
pub async fn register_worker(
    State(state): State<AppState>,
    Json(input): Json<RegisterRequest>,
) -> AppResult<impl IntoResponse> {
    worker_pool::validate_hostname(&input.hostname)?;
    worker_pool::validate_port(input.port)?;

    let worker = WorkerRepo::register(&state.pool, &input.hostname, input.port).await?;

    tracing::info!(
        worker_id = worker.id,
        hostname = %worker.hostname,
        port = worker.port,
        "Worker registered",
    );

    // A new idle worker may unblock waiting jobs.
    state.coordinator.wake();

    let response = RegisterResponse {
        worker_id: worker.id,
        heartbeat_interval_secs: state.config.liveness.heartbeat_interval.as_secs(),
    };
    Ok((StatusCode::CREATED, Json(DataResponse { data: response })))
}

// ---------------------------------------------------------------------------
// POST /workers/{id}/heartbeat
// ---------------------------------------------------------------------------

/// Record a heartbeat. The response carries the controller's view of the
/// worker so the agent can drop a job it is no longer assigned.
///
/// A job the worker holds but no longer reports is interrupted, unless it
/// was claimed within the last command timeout and its start may still be
/// on the way.
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(input): Json<HeartbeatRequest>,
) -> AppResult<impl IntoResponse> {
    let claimed_before = worker_pool::cutoff(Utc::now(), state.config.command_timeout());
    let outcome = WorkerRepo::heartbeat(&state.pool, id, &input, claimed_before)
        .await?
        .ok_or_else(|| CoreError::unknown_worker(id))?;

    match &outcome {
        HeartbeatOutcome::Applied {
            revived,
            acknowledged_job_id,
            released_job_id,
            ..
        } => {
            if *revived {
                tracing::info!(worker_id = id, "Stale worker resumed heartbeating");
            }
            if let Some(job_id) = acknowledged_job_id {
                tracing::info!(worker_id = id, job_id, "Job start acknowledged by heartbeat");
            }
            if let Some(job_id) = released_job_id {
                tracing::warn!(
                    worker_id = id,
                    job_id,
                    reported_job_id = ?input.current_job_id,
                    "Worker no longer reports its job; job interrupted",
                );
            }
            if *revived || released_job_id.is_some() {
                state.coordinator.wake();
            }
        }
        HeartbeatOutcome::OutOfOrder(_) => {
            tracing::debug!(worker_id = id, sent_at = ?input.sent_at, "Dropped out-of-order heartbeat");
        }
    }

    let worker = outcome.worker();
    if input.current_job_id.is_some() && input.current_job_id != worker.current_job_id {
        tracing::debug!(
            worker_id = id,
            reported_job_id = ?input.current_job_id,
            expected_job_id = ?worker.current_job_id,
            "Worker reports a job it does not hold",
        );
    }

    let response = HeartbeatResponse {
        applied: outcome.is_applied(),
        status: worker.status,
        expected_job_id: worker.current_job_id,
    };
    Ok(Json(DataResponse { data: response }))
}

// ---------------------------------------------------------------------------
// DELETE /workers/{id}
// ---------------------------------------------------------------------------

/// Deregister a worker, interrupting any job it holds.
pub async fn deregister_worker(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<StatusCode> {
    let result = WorkerRepo::deregister(&state.pool, id)
        .await?
        .ok_or_else(|| CoreError::unknown_worker(id))?;

    tracing::info!(
        worker_id = id,
        interrupted_jobs = ?result.interrupted_job_ids,
        "Worker deregistered",
    );

    if !result.interrupted_job_ids.is_empty() {
        state.coordinator.wake();
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// GET /workers
// ---------------------------------------------------------------------------

/// List workers, optionally filtered by `?status=`.
pub async fn list_workers(
    State(state): State<AppState>,
    Query(params): Query<WorkerListQuery>,
) -> AppResult<impl IntoResponse> {
    let workers = WorkerRepo::list(&state.pool, &params).await?;
    Ok(Json(DataResponse { data: workers }))
}

// ---------------------------------------------------------------------------
// GET /workers/{id}
// ---------------------------------------------------------------------------

pub async fn get_worker(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let worker = ensure_worker_exists(&state.pool, id).await?;
    Ok(Json(DataResponse { data: worker }))
}

// ---------------------------------------------------------------------------
// GET /workers/stats
// ---------------------------------------------------------------------------

pub async fn fleet_stats(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let stats = WorkerRepo::fleet_stats(&state.pool).await?;
    Ok(Json(DataResponse { data: stats }))
}

// ---------------------------------------------------------------------------
// GET /workers/{id}/health-log
// ---------------------------------------------------------------------------

/// Status transitions of one worker, most recent first.
pub async fn worker_health_log(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    ensure_worker_exists(&state.pool, id).await?;
    let log = WorkerRepo::get_health_log(&state.pool, id).await?;
    Ok(Json(DataResponse { data: log }))
}
