//! Route definitions for the job ledger.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET  /                 -> list_jobs
/// POST /                 -> create_job
/// GET  /{id}             -> get_job
/// POST /{id}/stop        -> stop_job
/// POST /{id}/ack         -> acknowledge_job
/// POST /{id}/checkpoint  -> record_checkpoint
/// POST /{id}/complete    -> complete_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::create_job))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/stop", post(jobs::stop_job))
        .route("/{id}/ack", post(jobs::acknowledge_job))
        .route("/{id}/checkpoint", post(jobs::record_checkpoint))
        .route("/{id}/complete", post(jobs::complete_job))
}
