//! Integration tests for the worker registry endpoints.

mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::{body_json, delete, get, post_json, register_worker};
use fleet_api::background::liveness_sweeper::sweep_once;
use fleet_core::worker_pool::LivenessPolicy;
use serde_json::json;
use sqlx::PgPool;

/// Push a worker's last heartbeat into the past.
async fn backdate_heartbeat(pool: &PgPool, worker_id: i64, secs: i64) {
    sqlx::query("UPDATE workers SET last_heartbeat_at = NOW() - make_interval(secs => $2) WHERE id = $1")
        .bind(worker_id)
        .bind(secs as f64)
        .execute(pool)
        .await
        .unwrap();
}

// ---------------------------------------------------------------------------
// Test: registration returns an identity and the heartbeat interval
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn register_returns_worker_id_and_interval(pool: PgPool) {
    let app = common::build_test_app(pool);

    let response = post_json(
        &app,
        "/api/v1/workers/register",
        json!({ "hostname": "gpu-01.lan", "port": 8081 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    let worker_id = json["data"]["worker_id"].as_i64().unwrap();
    assert_eq!(json["data"]["heartbeat_interval_secs"], 15);

    let worker = body_json(get(&app, &format!("/api/v1/workers/{worker_id}")).await).await;
    assert_eq!(worker["data"]["status"], "idle");
    assert_eq!(worker["data"]["hostname"], "gpu-01.lan");
    assert!(worker["data"]["current_job_id"].is_null());
}

// ---------------------------------------------------------------------------
// Test: re-registering the same host yields a fresh identity
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn reregistration_creates_new_identity(pool: PgPool) {
    let app = common::build_test_app(pool);

    let first = register_worker(&app, "gpu-01", 8081).await;
    let second = register_worker(&app, "gpu-01", 8081).await;

    assert_ne!(first, second);
}

// ---------------------------------------------------------------------------
// Test: invalid hostname and port are rejected
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn register_rejects_invalid_input(pool: PgPool) {
    let app = common::build_test_app(pool);

    let response = post_json(
        &app,
        "/api/v1/workers/register",
        json!({ "hostname": "", "port": 8081 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");

    let response = post_json(
        &app,
        "/api/v1/workers/register",
        json!({ "hostname": "gpu-01", "port": 0 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Test: heartbeat from an unknown worker returns UNKNOWN_WORKER
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn heartbeat_from_unknown_worker_returns_404(pool: PgPool) {
    let app = common::build_test_app(pool);

    let response = post_json(
        &app,
        "/api/v1/workers/999999/heartbeat",
        json!({ "status": "idle" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "UNKNOWN_WORKER");
}

// ---------------------------------------------------------------------------
// Test: heartbeat is applied and reports the controller's view
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn heartbeat_reports_expected_job(pool: PgPool) {
    let app = common::build_test_app(pool);
    let worker_id = register_worker(&app, "gpu-01", 8081).await;

    let response = post_json(
        &app,
        &format!("/api/v1/workers/{worker_id}/heartbeat"),
        json!({ "status": "idle", "current_job_id": null, "sent_at": Utc::now() }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["data"]["applied"], true);
    assert_eq!(json["data"]["status"], "idle");
    assert!(json["data"]["expected_job_id"].is_null());
}

// ---------------------------------------------------------------------------
// Test: an older heartbeat than the last applied one is dropped
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn out_of_order_heartbeat_is_not_applied(pool: PgPool) {
    let app = common::build_test_app(pool);
    let worker_id = register_worker(&app, "gpu-01", 8081).await;
    let uri = format!("/api/v1/workers/{worker_id}/heartbeat");
    let now = Utc::now();

    let response = post_json(&app, &uri, json!({ "status": "idle", "sent_at": now })).await;
    assert_eq!(body_json(response).await["data"]["applied"], true);

    let earlier = now - Duration::seconds(30);
    let response = post_json(&app, &uri, json!({ "status": "idle", "sent_at": earlier })).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["applied"], false);
}

// ---------------------------------------------------------------------------
// Test: a stale worker is revived by its next heartbeat
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn stale_worker_revived_by_heartbeat(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let worker_id = register_worker(&app, "gpu-01", 8081).await;

    backdate_heartbeat(&pool, worker_id, 600).await;
    let report = sweep_once(&pool, &LivenessPolicy::default(), Utc::now())
        .await
        .unwrap();
    assert_eq!(report.marked_stale, vec![worker_id]);

    let response = post_json(
        &app,
        &format!("/api/v1/workers/{worker_id}/heartbeat"),
        json!({ "status": "idle" }),
    )
    .await;
    assert_eq!(body_json(response).await["data"]["status"], "idle");

    let log = body_json(get(&app, &format!("/api/v1/workers/{worker_id}/health-log")).await).await;
    let entries = log["data"].as_array().unwrap();
    assert_eq!(entries[0]["from_status"], "stale");
    assert_eq!(entries[0]["to_status"], "idle");
}

// ---------------------------------------------------------------------------
// Test: list filters by status, stats count by status
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn list_and_stats_reflect_statuses(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let alive = register_worker(&app, "gpu-01", 8081).await;
    let silent = register_worker(&app, "gpu-02", 8081).await;

    backdate_heartbeat(&pool, silent, 600).await;
    sweep_once(&pool, &LivenessPolicy::default(), Utc::now())
        .await
        .unwrap();

    let json = body_json(get(&app, "/api/v1/workers?status=idle").await).await;
    let ids: Vec<i64> = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![alive]);

    let stats = body_json(get(&app, "/api/v1/workers/stats").await).await;
    assert_eq!(stats["data"]["total_workers"], 2);
    assert_eq!(stats["data"]["idle_workers"], 1);
    assert_eq!(stats["data"]["stale_workers"], 1);
    assert_eq!(stats["data"]["working_workers"], 0);
}

// ---------------------------------------------------------------------------
// Test: deregistration removes the worker
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn deregister_removes_worker(pool: PgPool) {
    let app = common::build_test_app(pool);
    let worker_id = register_worker(&app, "gpu-01", 8081).await;

    let response = delete(&app, &format!("/api/v1/workers/{worker_id}")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = get(&app, &format!("/api/v1/workers/{worker_id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = delete(&app, &format!("/api/v1/workers/{worker_id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "UNKNOWN_WORKER");
}

// ---------------------------------------------------------------------------
// Test: health log of an unknown worker is a 404
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn health_log_of_unknown_worker_returns_404(pool: PgPool) {
    let app = common::build_test_app(pool);

    let response = get(&app, "/api/v1/workers/424242/health-log").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
