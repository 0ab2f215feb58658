//! Repository for the `jobs` table.
//!
//! Every transition is a conditional update guarded by the job's expected
//! prior status (and holder, where one exists). A guard that matches no row
//! means a concurrent change won; callers decide what that means.

use fleet_core::lifecycle::{decide_completion, CompletionDecision, CLAIMABLE, HELD};
use fleet_core::protocol::JobOutcome;
use fleet_core::types::{DbId, Timestamp};
use sqlx::{PgConnection, PgPool};

use crate::models::job::{Claim, CompletionResult, Job, JobListQuery, NewJob};
use crate::models::status::{status_ids, JobStatus, WorkerStatus};
use crate::models::worker::{NewHealthLogEntry, Worker};
use crate::repositories::worker_repo::{self, WorkerRepo};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, status_id, profile, config_override, input_refs, assigned_worker_id, \
    checkpoint_ref, result, error_message, attempts, \
    claimed_at, started_at, completed_at, created_at, updated_at";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

/// Provides ledger operations for jobs.
pub struct JobRepo;

impl JobRepo {
    // ── Creation & queries ───────────────────────────────────────────────

    /// Create a new pending job.
    pub async fn create(pool: &PgPool, input: &NewJob) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (status_id, profile, config_override, input_refs) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Pending.id())
            .bind(&input.profile)
            .bind(&input.config_override)
            .bind(&input.input_refs)
            .fetch_one(pool)
            .await
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List jobs, newest first, with optional status filter and pagination.
    pub async fn list(pool: &PgPool, params: &JobListQuery) -> Result<Vec<Job>, sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = params.offset.unwrap_or(0).max(0);

        let (where_clause, bind_idx) = if params.status.is_some() {
            ("WHERE status_id = $1", 2)
        } else {
            ("", 1)
        };

        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             {where_clause} \
             ORDER BY created_at DESC, id DESC \
             LIMIT ${bind_idx} OFFSET ${}",
            bind_idx + 1,
        );

        let mut q = sqlx::query_as::<_, Job>(&query);
        if let Some(status) = params.status {
            q = q.bind(status.id());
        }
        q.bind(limit).bind(offset).fetch_all(pool).await
    }

    // ── Assignment ───────────────────────────────────────────────────────

    /// Atomically pair the oldest claimable job with an idle worker.
    ///
    /// Both rows are selected `FOR UPDATE SKIP LOCKED`, so concurrent
    /// claimers (including other controller instances) never see the same
    /// job or worker. Only workers heard from at or after `fresh_since` are
    /// considered; most recently heard first.
    ///
    /// Returns `None` when either side is empty.
    pub async fn claim_for_assignment(
        pool: &PgPool,
        fresh_since: Timestamp,
    ) -> Result<Option<Claim>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status_id = ANY($1) \
             ORDER BY created_at ASC, id ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED"
        );
        let Some(job) = sqlx::query_as::<_, Job>(&query)
            .bind(status_ids(&CLAIMABLE))
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let query = format!(
            "SELECT {} FROM workers \
             WHERE status_id = $1 AND current_job_id IS NULL AND last_heartbeat_at >= $2 \
             ORDER BY last_heartbeat_at DESC, id ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED",
            worker_repo::COLUMNS
        );
        let Some(worker) = sqlx::query_as::<_, Worker>(&query)
            .bind(WorkerStatus::Idle.id())
            .bind(fresh_since)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let query = format!(
            "UPDATE jobs SET \
                status_id = $3, assigned_worker_id = $2, \
                claimed_at = NOW(), attempts = attempts + 1 \
             WHERE id = $1 AND status_id = $4 AND assigned_worker_id IS NULL \
             RETURNING {COLUMNS}"
        );
        let Some(claimed_job) = sqlx::query_as::<_, Job>(&query)
            .bind(job.id)
            .bind(worker.id)
            .bind(JobStatus::Assigned.id())
            .bind(job.status.id())
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let query = format!(
            "UPDATE workers SET status_id = $3, current_job_id = $2 \
             WHERE id = $1 AND status_id = $4 AND current_job_id IS NULL \
             RETURNING {}",
            worker_repo::COLUMNS
        );
        let Some(claimed_worker) = sqlx::query_as::<_, Worker>(&query)
            .bind(worker.id)
            .bind(job.id)
            .bind(WorkerStatus::Working.id())
            .bind(WorkerStatus::Idle.id())
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        WorkerRepo::log_transition(
            &mut *tx,
            &NewHealthLogEntry {
                worker_id: worker.id,
                from_status: Some(WorkerStatus::Idle),
                to_status: WorkerStatus::Working,
                reason: Some(format!("assigned job {}", job.id)),
            },
        )
        .await?;

        tx.commit().await?;
        Ok(Some(Claim {
            job: claimed_job,
            worker: claimed_worker,
            prior_status: job.status,
        }))
    }

    /// Undo a claim whose dispatch failed.
    ///
    /// The job returns to the status it was claimed out of and the worker
    /// is released, both only if they are still paired with each other.
    /// Returns `false` if something else already moved either one.
    pub async fn rollback_claim(pool: &PgPool, claim: &Claim) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let reverted = sqlx::query(
            "UPDATE jobs SET status_id = $3, assigned_worker_id = NULL \
             WHERE id = $1 AND assigned_worker_id = $2 AND status_id = $4",
        )
        .bind(claim.job.id)
        .bind(claim.worker.id)
        .bind(claim.prior_status.id())
        .bind(JobStatus::Assigned.id())
        .execute(&mut *tx)
        .await?;

        if reverted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        WorkerRepo::release(&mut *tx, claim.worker.id, claim.job.id, "dispatch failed").await?;

        tx.commit().await?;
        Ok(true)
    }

    // ── Worker-driven transitions ────────────────────────────────────────

    /// Confirm that `worker_id` started the job: `assigned` → `running`.
    ///
    /// Idempotent while the job is already running on the same worker.
    /// Returns `None` if the job is not held by that worker.
    pub async fn acknowledge(
        pool: &PgPool,
        job_id: DbId,
        worker_id: DbId,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs SET status_id = $3, started_at = COALESCE(started_at, NOW()) \
             WHERE id = $1 AND assigned_worker_id = $2 AND status_id = ANY($4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .bind(worker_id)
            .bind(JobStatus::Running.id())
            .bind(status_ids(&HELD))
            .fetch_optional(pool)
            .await
    }

    /// Store a new checkpoint reference written by the job's holder.
    ///
    /// Returns `None` if the job is not held by that worker.
    pub async fn record_checkpoint(
        pool: &PgPool,
        job_id: DbId,
        worker_id: DbId,
        checkpoint_ref: &str,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs SET checkpoint_ref = $3 \
             WHERE id = $1 AND assigned_worker_id = $2 AND status_id = ANY($4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .bind(worker_id)
            .bind(checkpoint_ref)
            .bind(status_ids(&HELD))
            .fetch_optional(pool)
            .await
    }

    /// Record an acknowledged stop: job → `paused`, worker → idle.
    ///
    /// A checkpoint carried by the acknowledgement replaces the stored one;
    /// without one the previous checkpoint is kept. Returns `None` if the
    /// job is no longer held by that worker.
    pub async fn pause(
        pool: &PgPool,
        job_id: DbId,
        worker_id: DbId,
        checkpoint_ref: Option<&str>,
    ) -> Result<Option<Job>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE jobs SET \
                status_id = $3, assigned_worker_id = NULL, \
                checkpoint_ref = COALESCE($4, checkpoint_ref) \
             WHERE id = $1 AND assigned_worker_id = $2 AND status_id = ANY($5) \
             RETURNING {COLUMNS}"
        );
        let Some(job) = sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .bind(worker_id)
            .bind(JobStatus::Paused.id())
            .bind(checkpoint_ref)
            .bind(status_ids(&HELD))
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        WorkerRepo::release(&mut *tx, worker_id, job_id, "job paused").await?;

        tx.commit().await?;
        Ok(Some(job))
    }

    // ── Liveness ─────────────────────────────────────────────────────────

    /// Interrupt every held job whose holder is stale or gone.
    ///
    /// Each job is released in its own transaction: job → `interrupted`
    /// with `assigned_worker_id` cleared, and the holder's `current_job_id`
    /// cleared. Both updates are guarded by the state observed when the job
    /// was selected. Returns the IDs of the interrupted jobs.
    pub async fn interrupt_orphaned(pool: &PgPool) -> Result<Vec<DbId>, sqlx::Error> {
        let candidates: Vec<(DbId, Option<DbId>)> = sqlx::query_as(
            "SELECT j.id, j.assigned_worker_id FROM jobs j \
             LEFT JOIN workers w ON w.id = j.assigned_worker_id \
             WHERE j.status_id = ANY($1) AND (w.id IS NULL OR w.status_id = $2) \
             ORDER BY j.id",
        )
        .bind(status_ids(&HELD))
        .bind(WorkerStatus::Stale.id())
        .fetch_all(pool)
        .await?;

        let mut interrupted = Vec::with_capacity(candidates.len());
        for (job_id, worker_id) in candidates {
            let mut tx = pool.begin().await?;
            if Self::interrupt_one(&mut *tx, job_id, worker_id).await? {
                tx.commit().await?;
                interrupted.push(job_id);
            } else {
                tx.rollback().await?;
            }
        }
        Ok(interrupted)
    }

    async fn interrupt_one(
        conn: &mut PgConnection,
        job_id: DbId,
        worker_id: Option<DbId>,
    ) -> Result<bool, sqlx::Error> {
        let updated = sqlx::query(
            "UPDATE jobs SET status_id = $3, assigned_worker_id = NULL \
             WHERE id = $1 \
               AND status_id = ANY($4) \
               AND assigned_worker_id IS NOT DISTINCT FROM $2 \
               AND NOT EXISTS ( \
                   SELECT 1 FROM workers \
                   WHERE id = $2 AND status_id <> $5 \
               )",
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(JobStatus::Interrupted.id())
        .bind(status_ids(&HELD))
        .bind(WorkerStatus::Stale.id())
        .execute(&mut *conn)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        if let Some(worker_id) = worker_id {
            WorkerRepo::release(conn, worker_id, job_id, "job interrupted").await?;
        }
        Ok(true)
    }

    /// Interrupt the job `worker_id` holds when its heartbeat no longer
    /// reports it.
    ///
    /// A `running` job is released at once. An `assigned` job is released
    /// only once it was claimed before `claimed_before`, so a start command
    /// still in flight is not cancelled. Returns the interrupted job's ID.
    pub(crate) async fn interrupt_unreported(
        conn: &mut PgConnection,
        worker_id: DbId,
        reported_job_id: Option<DbId>,
        claimed_before: Timestamp,
    ) -> Result<Option<DbId>, sqlx::Error> {
        let job_id: Option<DbId> = sqlx::query_scalar(
            "UPDATE jobs SET status_id = $3, assigned_worker_id = NULL \
             WHERE assigned_worker_id = $1 \
               AND id IS DISTINCT FROM $2 \
               AND (status_id = $4 OR (status_id = $5 AND claimed_at < $6)) \
             RETURNING id",
        )
        .bind(worker_id)
        .bind(reported_job_id)
        .bind(JobStatus::Interrupted.id())
        .bind(JobStatus::Running.id())
        .bind(JobStatus::Assigned.id())
        .bind(claimed_before)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(job_id) = job_id {
            WorkerRepo::release(conn, worker_id, job_id, "job no longer reported by worker")
                .await?;
        }
        Ok(job_id)
    }

    // ── Completion ───────────────────────────────────────────────────────

    /// Record a job's outcome and release its holder.
    ///
    /// `reporter` is the worker that sent the report, when it identified
    /// itself. Returns `None` for an unknown job.
    pub async fn report_completion(
        pool: &PgPool,
        job_id: DbId,
        reporter: Option<DbId>,
        outcome: &JobOutcome,
    ) -> Result<Option<CompletionResult>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE");
        let Some(job) = sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        match decide_completion(job.status, job.assigned_worker_id, reporter) {
            CompletionDecision::AlreadyTerminal => {
                tx.rollback().await?;
                return Ok(Some(CompletionResult::AlreadyTerminal(job)));
            }
            CompletionDecision::Reject(reason) => {
                tx.rollback().await?;
                return Ok(Some(CompletionResult::Rejected { job, reason }));
            }
            CompletionDecision::Apply => {}
        }

        let status = if outcome.success {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };

        let query = format!(
            "UPDATE jobs SET \
                status_id = $2, result = $3, error_message = $4, \
                assigned_worker_id = NULL, completed_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        let recorded = sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .bind(status.id())
            .bind(&outcome.result)
            .bind(&outcome.error)
            .fetch_one(&mut *tx)
            .await?;

        if let Some(holder) = job.assigned_worker_id {
            WorkerRepo::release(&mut *tx, holder, job_id, "job finished").await?;
        }

        tx.commit().await?;
        Ok(Some(CompletionResult::Recorded(recorded)))
    }
}
