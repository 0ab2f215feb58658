//! Tests for the long-running coordinator and sweeper loops.
//!
//! The coordinator polls every 5 seconds in the test harness, so anything
//! observed well within that window was driven by a wake-up.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    build_test_harness, create_job, eventually, post_json, register_worker, SentCommand, TestApp,
};
use fleet_api::background::liveness_sweeper;
use fleet_core::worker_pool::LivenessPolicy;
use serde_json::json;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

fn spawn_coordinator(harness: &TestApp, cancel: &CancellationToken) {
    let coordinator = Arc::clone(&harness.coordinator);
    let cancel = cancel.clone();
    tokio::spawn(async move { coordinator.run(cancel).await });
}

fn sent_contains(harness: &TestApp, command: &SentCommand) -> bool {
    harness.client.sent().contains(command)
}

// ---------------------------------------------------------------------------
// Test: creating a job wakes the running coordinator
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn coordinator_dispatches_new_job_without_manual_pass(pool: PgPool) {
    let harness = build_test_harness(pool);
    let app = &harness.router;
    let cancel = CancellationToken::new();
    spawn_coordinator(&harness, &cancel);

    // Let the loop take its first, immediate tick.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let worker_id = register_worker(app, "gpu-01", 8081).await;
    let job_id = create_job(app, json!({})).await;

    eventually(|| sent_contains(&harness, &SentCommand::Start { worker_id, job_id })).await;
    cancel.cancel();
}

// ---------------------------------------------------------------------------
// Test: a completion frees the worker and wakes the coordinator
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn completion_wakes_coordinator_for_queued_job(pool: PgPool) {
    let harness = build_test_harness(pool);
    let app = &harness.router;
    let cancel = CancellationToken::new();
    spawn_coordinator(&harness, &cancel);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let worker_id = register_worker(app, "gpu-01", 8081).await;
    let first = create_job(app, json!({})).await;
    eventually(|| sent_contains(&harness, &SentCommand::Start { worker_id, job_id: first })).await;

    // The only worker is busy: the second job waits.
    let second = create_job(app, json!({})).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!sent_contains(&harness, &SentCommand::Start { worker_id, job_id: second }));

    post_json(
        app,
        &format!("/api/v1/jobs/{first}/complete"),
        json!({ "worker_id": worker_id, "outcome": { "success": true } }),
    )
    .await;

    eventually(|| sent_contains(&harness, &SentCommand::Start { worker_id, job_id: second })).await;
    cancel.cancel();
}

// ---------------------------------------------------------------------------
// Test: a stop frees the worker and the paused job is resumed
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn stop_wakes_coordinator_to_resume_paused_job(pool: PgPool) {
    let harness = build_test_harness(pool);
    let app = &harness.router;
    let cancel = CancellationToken::new();
    spawn_coordinator(&harness, &cancel);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let worker_id = register_worker(app, "gpu-01", 8081).await;
    let job_id = create_job(app, json!({})).await;
    eventually(|| sent_contains(&harness, &SentCommand::Start { worker_id, job_id })).await;
    post_json(
        app,
        &format!("/api/v1/jobs/{job_id}/ack"),
        json!({ "worker_id": worker_id }),
    )
    .await;

    harness.client.set_stop_checkpoint(Some("ckpt/3"));
    post_json(app, &format!("/api/v1/jobs/{job_id}/stop"), json!({})).await;

    let resumed = SentCommand::Resume {
        worker_id,
        job_id,
        checkpoint_ref: Some("ckpt/3".to_string()),
    };
    eventually(|| sent_contains(&harness, &resumed)).await;
    cancel.cancel();
}

// ---------------------------------------------------------------------------
// Test: the sweeper loop interrupts a silent worker's job and wakes the
// coordinator to hand it to another worker
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn sweeper_loop_hands_silent_workers_job_to_another(pool: PgPool) {
    let harness = build_test_harness(pool.clone());
    let app = &harness.router;

    let silent = register_worker(app, "gpu-01", 8081).await;
    let job_id = create_job(app, json!({})).await;
    assert_eq!(harness.coordinator.assign_pending().await.unwrap(), 1);
    let replacement = register_worker(app, "gpu-02", 8081).await;

    let cancel = CancellationToken::new();
    spawn_coordinator(&harness, &cancel);
    tokio::time::sleep(Duration::from_millis(50)).await;

    sqlx::query("UPDATE workers SET last_heartbeat_at = NOW() - INTERVAL '10 minutes' WHERE id = $1")
        .bind(silent)
        .execute(&pool)
        .await
        .unwrap();

    let policy = LivenessPolicy {
        sweep_interval: Duration::from_millis(50),
        ..LivenessPolicy::default()
    };
    tokio::spawn(liveness_sweeper::run(
        pool.clone(),
        policy,
        Arc::clone(&harness.coordinator),
        cancel.clone(),
    ));

    let resumed = SentCommand::Resume {
        worker_id: replacement,
        job_id,
        checkpoint_ref: None,
    };
    eventually(|| sent_contains(&harness, &resumed)).await;
    cancel.cancel();
}
