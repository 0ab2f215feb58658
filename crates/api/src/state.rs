use std::sync::Arc;

use fleet_core::profiles::ProfileResolver;

use crate::config::ServerConfig;
use crate::engine::coordinator::AssignmentCoordinator;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: fleet_db::DbPool,
    /// Server configuration, including the liveness policy handed to workers.
    pub config: Arc<ServerConfig>,
    /// Pairs claimable jobs with idle workers; handlers wake it after any
    /// change that may make a claim possible.
    pub coordinator: Arc<AssignmentCoordinator>,
    /// Resolves profile names on job creation.
    pub profiles: Arc<dyn ProfileResolver>,
}
