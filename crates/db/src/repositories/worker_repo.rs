//! Repository for the `workers` and `worker_health_log` tables.

use fleet_core::protocol::HeartbeatRequest;
use fleet_core::types::{DbId, Timestamp};
use sqlx::{PgConnection, PgExecutor, PgPool};

use crate::models::status::{status_ids, JobStatus, StatusId, WorkerStatus};
use crate::models::worker::{
    Deregistration, FleetStats, HeartbeatOutcome, NewHealthLogEntry, Worker, WorkerHealthLogEntry,
    WorkerListQuery,
};
use crate::repositories::job_repo::JobRepo;

/// Column list for `workers` queries.
pub(crate) const COLUMNS: &str = "\
    id, hostname, port, status_id, current_job_id, registered_at, \
    last_heartbeat_at, last_heartbeat_sent_at, created_at, updated_at";

/// Column list for `worker_health_log` queries, joined to status names.
const HEALTH_COLUMNS: &str = "\
    l.id, l.worker_id, fs.name AS from_status, ts.name AS to_status, \
    l.reason, l.transitioned_at";

/// Provides registry operations for workers and health-log entries.
pub struct WorkerRepo;

impl WorkerRepo {
    // ── Registration ─────────────────────────────────────────────────────

    /// Register a new idle worker. Every call creates a fresh identity.
    pub async fn register(pool: &PgPool, hostname: &str, port: u16) -> Result<Worker, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO workers (hostname, port, status_id) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        let worker = sqlx::query_as::<_, Worker>(&query)
            .bind(hostname)
            .bind(i32::from(port))
            .bind(WorkerStatus::Idle.id())
            .fetch_one(&mut *tx)
            .await?;

        Self::log_transition(
            &mut *tx,
            &NewHealthLogEntry {
                worker_id: worker.id,
                from_status: None,
                to_status: WorkerStatus::Idle,
                reason: Some("registered".to_string()),
            },
        )
        .await?;

        tx.commit().await?;
        Ok(worker)
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Find a worker by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Worker>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workers WHERE id = $1");
        sqlx::query_as::<_, Worker>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List workers, optionally filtered by status, oldest registration first.
    pub async fn list(pool: &PgPool, params: &WorkerListQuery) -> Result<Vec<Worker>, sqlx::Error> {
        match params.status {
            Some(status) => {
                let query = format!(
                    "SELECT {COLUMNS} FROM workers WHERE status_id = $1 ORDER BY id ASC"
                );
                sqlx::query_as::<_, Worker>(&query)
                    .bind(status.id())
                    .fetch_all(pool)
                    .await
            }
            None => {
                let query = format!("SELECT {COLUMNS} FROM workers ORDER BY id ASC");
                sqlx::query_as::<_, Worker>(&query).fetch_all(pool).await
            }
        }
    }

    // ── Heartbeat ────────────────────────────────────────────────────────

    /// Apply a heartbeat.
    ///
    /// Returns `None` for an unknown worker. A heartbeat whose `sent_at`
    /// predates the last applied one is dropped without changes. Otherwise
    /// the controller-side heartbeat time is refreshed, a stale worker that
    /// holds no job is revived to idle, and a `working` report naming the
    /// job assigned to this worker acknowledges its start.
    ///
    /// A report that does not name the job the worker holds interrupts that
    /// job and frees the worker. An `assigned` job claimed at or after
    /// `claimed_before` is left alone: its start command may still be in
    /// flight. The reported status never assigns a job.
    pub async fn heartbeat(
        pool: &PgPool,
        worker_id: DbId,
        report: &HeartbeatRequest,
        claimed_before: Timestamp,
    ) -> Result<Option<HeartbeatOutcome>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        // Job rows first: both job updates are rolled back below if the
        // heartbeat turns out to be out of order.
        let mut acknowledged_job_id = None;
        if let (WorkerStatus::Working, Some(job_id)) = (report.status, report.current_job_id) {
            let acked = sqlx::query(
                "UPDATE jobs \
                 SET status_id = $3, started_at = COALESCE(started_at, NOW()) \
                 WHERE id = $1 AND assigned_worker_id = $2 AND status_id = $4",
            )
            .bind(job_id)
            .bind(worker_id)
            .bind(JobStatus::Running.id())
            .bind(JobStatus::Assigned.id())
            .execute(&mut *tx)
            .await?;
            if acked.rows_affected() > 0 {
                acknowledged_job_id = Some(job_id);
            }
        }

        let released_job_id = JobRepo::interrupt_unreported(
            &mut *tx,
            worker_id,
            report.current_job_id,
            claimed_before,
        )
        .await?;

        let query = format!("SELECT {COLUMNS} FROM workers WHERE id = $1 FOR UPDATE");
        let Some(current) = sqlx::query_as::<_, Worker>(&query)
            .bind(worker_id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        if let (Some(sent_at), Some(last_sent_at)) =
            (report.sent_at, current.last_heartbeat_sent_at)
        {
            if sent_at < last_sent_at {
                tx.rollback().await?;
                return Ok(Some(HeartbeatOutcome::OutOfOrder(current)));
            }
        }

        let query = format!(
            "UPDATE workers SET \
                last_heartbeat_at = NOW(), \
                last_heartbeat_sent_at = COALESCE($2, last_heartbeat_sent_at), \
                status_id = CASE \
                    WHEN status_id = $3 AND current_job_id IS NULL THEN $4 \
                    ELSE status_id \
                END \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        let worker = sqlx::query_as::<_, Worker>(&query)
            .bind(worker_id)
            .bind(report.sent_at)
            .bind(WorkerStatus::Stale.id())
            .bind(WorkerStatus::Idle.id())
            .fetch_one(&mut *tx)
            .await?;

        let revived = current.status == WorkerStatus::Stale && worker.status == WorkerStatus::Idle;
        if revived {
            Self::log_transition(
                &mut *tx,
                &NewHealthLogEntry {
                    worker_id,
                    from_status: Some(WorkerStatus::Stale),
                    to_status: WorkerStatus::Idle,
                    reason: Some("heartbeat resumed".to_string()),
                },
            )
            .await?;
        }

        tx.commit().await?;
        Ok(Some(HeartbeatOutcome::Applied {
            worker,
            revived,
            acknowledged_job_id,
            released_job_id,
        }))
    }

    // ── Liveness ─────────────────────────────────────────────────────────

    /// Mark every non-stale worker whose last heartbeat is older than
    /// `cutoff` as stale, in one statement. Rows locked by a concurrent
    /// transaction are skipped and picked up on the next sweep.
    ///
    /// Returns the IDs of the workers that became stale.
    pub async fn mark_stale(pool: &PgPool, cutoff: Timestamp) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "WITH candidates AS ( \
                 SELECT id, status_id FROM workers \
                 WHERE status_id <> $1 AND last_heartbeat_at < $2 \
                 FOR UPDATE SKIP LOCKED \
             ), updated AS ( \
                 UPDATE workers w SET status_id = $1 \
                 FROM candidates c \
                 WHERE w.id = c.id \
                 RETURNING w.id, c.status_id AS from_status_id \
             ), logged AS ( \
                 INSERT INTO worker_health_log (worker_id, from_status_id, to_status_id, reason) \
                 SELECT id, from_status_id, $1, $3 FROM updated \
             ) \
             SELECT id FROM updated ORDER BY id",
        )
        .bind(WorkerStatus::Stale.id())
        .bind(cutoff)
        .bind("heartbeat timeout")
        .fetch_all(pool)
        .await
    }

    /// Delete stale workers silent since before `cutoff` that hold no job.
    ///
    /// Health-log rows go with them (ON DELETE CASCADE).
    pub async fn evict(pool: &PgPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM workers \
             WHERE status_id = $1 AND last_heartbeat_at < $2 AND current_job_id IS NULL",
        )
        .bind(WorkerStatus::Stale.id())
        .bind(cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Remove a worker on request.
    ///
    /// Any job it holds is interrupted first, in the same transaction, so
    /// the job is immediately reassignable. Returns `None` for an unknown
    /// worker.
    pub async fn deregister(
        pool: &PgPool,
        worker_id: DbId,
    ) -> Result<Option<Deregistration>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let interrupted_job_ids = sqlx::query_scalar::<_, DbId>(
            "UPDATE jobs SET status_id = $2, assigned_worker_id = NULL \
             WHERE assigned_worker_id = $1 AND status_id = ANY($3) \
             RETURNING id",
        )
        .bind(worker_id)
        .bind(JobStatus::Interrupted.id())
        .bind(status_ids(&fleet_core::lifecycle::HELD))
        .fetch_all(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM workers WHERE id = $1")
            .bind(worker_id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;
        Ok(Some(Deregistration {
            interrupted_job_ids,
        }))
    }

    // ── Fleet stats ──────────────────────────────────────────────────────

    /// Worker counts per status.
    pub async fn fleet_stats(pool: &PgPool) -> Result<FleetStats, sqlx::Error> {
        sqlx::query_as::<_, FleetStats>(
            "SELECT \
                COUNT(*) AS total_workers, \
                COUNT(*) FILTER (WHERE status_id = $1) AS idle_workers, \
                COUNT(*) FILTER (WHERE status_id = $2) AS working_workers, \
                COUNT(*) FILTER (WHERE status_id = $3) AS stale_workers \
            FROM workers",
        )
        .bind(WorkerStatus::Idle.id())
        .bind(WorkerStatus::Working.id())
        .bind(WorkerStatus::Stale.id())
        .fetch_one(pool)
        .await
    }

    // ── Health log ───────────────────────────────────────────────────────

    /// Insert a health-log entry recording a status transition.
    pub async fn log_transition<'e, E: PgExecutor<'e>>(
        executor: E,
        entry: &NewHealthLogEntry,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO worker_health_log (worker_id, from_status_id, to_status_id, reason) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(entry.worker_id)
        .bind(entry.from_status.map(StatusId::from))
        .bind(entry.to_status.id())
        .bind(&entry.reason)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Get the health log for a worker, most recent first.
    pub async fn get_health_log(
        pool: &PgPool,
        worker_id: DbId,
    ) -> Result<Vec<WorkerHealthLogEntry>, sqlx::Error> {
        let query = format!(
            "SELECT {HEALTH_COLUMNS} FROM worker_health_log l \
             LEFT JOIN worker_statuses fs ON fs.id = l.from_status_id \
             JOIN worker_statuses ts ON ts.id = l.to_status_id \
             WHERE l.worker_id = $1 \
             ORDER BY l.transitioned_at DESC, l.id DESC"
        );
        sqlx::query_as::<_, WorkerHealthLogEntry>(&query)
            .bind(worker_id)
            .fetch_all(pool)
            .await
    }

    // ── Shared with JobRepo ──────────────────────────────────────────────

    /// Detach `job_id` from `worker_id` inside a caller's transaction.
    ///
    /// A working worker returns to idle; a stale one stays stale. No-op if
    /// the worker no longer holds that job. Returns whether it did.
    pub(crate) async fn release(
        conn: &mut PgConnection,
        worker_id: DbId,
        job_id: DbId,
        reason: &str,
    ) -> Result<bool, sqlx::Error> {
        let previous: Option<StatusId> = sqlx::query_scalar(
            "SELECT status_id FROM workers \
             WHERE id = $1 AND current_job_id = $2 \
             FOR UPDATE",
        )
        .bind(worker_id)
        .bind(job_id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(previous) = previous else {
            return Ok(false);
        };

        sqlx::query(
            "UPDATE workers SET \
                current_job_id = NULL, \
                status_id = CASE WHEN status_id = $2 THEN $3 ELSE status_id END \
             WHERE id = $1",
        )
        .bind(worker_id)
        .bind(WorkerStatus::Working.id())
        .bind(WorkerStatus::Idle.id())
        .execute(&mut *conn)
        .await?;

        if previous == WorkerStatus::Working.id() {
            Self::log_transition(
                &mut *conn,
                &NewHealthLogEntry {
                    worker_id,
                    from_status: Some(WorkerStatus::Working),
                    to_status: WorkerStatus::Idle,
                    reason: Some(reason.to_string()),
                },
            )
            .await?;
        }

        Ok(true)
    }
}
