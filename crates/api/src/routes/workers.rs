//! Route definitions for the worker registry.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::workers;
use crate::state::AppState;

/// Routes mounted at `/workers`.
///
/// `register`, `heartbeat` and `DELETE /{id}` are called by worker agents;
/// the rest are read endpoints for operators.
///
/// ```text
/// GET    /                  -> list_workers
/// POST   /register          -> register_worker
/// GET    /stats             -> fleet_stats
/// GET    /{id}              -> get_worker
/// DELETE /{id}              -> deregister_worker
/// POST   /{id}/heartbeat    -> heartbeat
/// GET    /{id}/health-log   -> worker_health_log
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(workers::list_workers))
        .route("/register", post(workers::register_worker))
        .route("/stats", get(workers::fleet_stats))
        .route(
            "/{id}",
            get(workers::get_worker).delete(workers::deregister_worker),
        )
        .route("/{id}/heartbeat", post(workers::heartbeat))
        .route("/{id}/health-log", get(workers::worker_health_log))
}
