pub mod health;
pub mod jobs;
pub mod workers;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /workers/register                   register (agent)
/// /workers/{id}/heartbeat             heartbeat (agent)
/// /workers/{id}                       get, deregister (DELETE, agent)
/// /workers                            list (?status=)
/// /workers/stats                      fleet counts by status
/// /workers/{id}/health-log            status transition history
///
/// /jobs                               list (?status=&limit=&offset=), create
/// /jobs/{id}                          get
/// /jobs/{id}/stop                     pause through the holder (POST)
/// /jobs/{id}/ack                      holder started the job (agent)
/// /jobs/{id}/checkpoint               holder wrote a checkpoint (agent)
/// /jobs/{id}/complete                 final outcome (agent)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/workers", workers::router())
        .nest("/jobs", jobs::router())
}
