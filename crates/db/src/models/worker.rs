//! Worker registry models and DTOs.

use fleet_core::types::{DbId, Timestamp};
use fleet_core::worker_pool::worker_base_url;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::status::WorkerStatus;

// ---------------------------------------------------------------------------
// Entity structs (match database tables)
// ---------------------------------------------------------------------------

/// A worker row from the `workers` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Worker {
    pub id: DbId,
    pub hostname: String,
    pub port: i32,
    #[sqlx(rename = "status_id", try_from = "i16")]
    pub status: WorkerStatus,
    pub current_job_id: Option<DbId>,
    pub registered_at: Timestamp,
    /// Controller clock. Drives staleness.
    pub last_heartbeat_at: Timestamp,
    /// Worker clock. Only compared against later heartbeats from the same
    /// worker.
    pub last_heartbeat_sent_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Worker {
    /// Base URL of the worker's command server.
    pub fn base_url(&self) -> String {
        // The CHECK constraint keeps port within u16 range.
        worker_base_url(&self.hostname, self.port as u16)
    }
}

/// A row from the `worker_health_log` table, with status names resolved.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WorkerHealthLogEntry {
    pub id: DbId,
    pub worker_id: DbId,
    pub from_status: Option<String>,
    pub to_status: String,
    pub reason: Option<String>,
    pub transitioned_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Input DTOs
// ---------------------------------------------------------------------------

/// DTO for inserting a worker health log entry.
#[derive(Debug, Clone)]
pub struct NewHealthLogEntry {
    pub worker_id: DbId,
    pub from_status: Option<WorkerStatus>,
    pub to_status: WorkerStatus,
    pub reason: Option<String>,
}

/// Query parameters for `GET /api/v1/workers`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerListQuery {
    pub status: Option<WorkerStatus>,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of applying a heartbeat to a known worker.
#[derive(Debug, Clone)]
pub enum HeartbeatOutcome {
    Applied {
        worker: Worker,
        /// The worker was stale and came back to idle.
        revived: bool,
        /// The heartbeat confirmed the start of the worker's assigned job.
        acknowledged_job_id: Option<DbId>,
        /// The worker no longer reported its job; the job is now
        /// `interrupted` and the worker idle.
        released_job_id: Option<DbId>,
    },
    /// `sent_at` predates the last applied heartbeat; nothing changed.
    OutOfOrder(Worker),
}

impl HeartbeatOutcome {
    pub fn worker(&self) -> &Worker {
        match self {
            HeartbeatOutcome::Applied { worker, .. } => worker,
            HeartbeatOutcome::OutOfOrder(worker) => worker,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, HeartbeatOutcome::Applied { .. })
    }
}

/// Result of removing a worker on request.
#[derive(Debug, Clone, Default)]
pub struct Deregistration {
    /// Jobs the worker held, now `interrupted`.
    pub interrupted_job_ids: Vec<DbId>,
}

// ---------------------------------------------------------------------------
// Aggregate DTOs
// ---------------------------------------------------------------------------

/// Worker counts per status.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FleetStats {
    pub total_workers: i64,
    pub idle_workers: i64,
    pub working_workers: i64,
    pub stale_workers: i64,
}
