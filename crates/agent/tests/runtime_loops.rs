//! Tests for the agent's registration and heartbeat loops.

mod common;

use std::sync::Arc;
use std::time::Duration;

use fleet_core::protocol::StartCommand;
use fleet_core::status::WorkerStatus;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{
    agent, eventually_within, registered_agent, BlockingExecutor, EchoExecutor, FakeLink,
    WORKER_ID,
};

// ---------------------------------------------------------------------------
// Test: registration is retried until the controller accepts it
// ---------------------------------------------------------------------------

#[tokio::test]
async fn registration_is_retried_until_accepted() {
    let link = Arc::new(FakeLink::default());
    link.fail_registrations(3);
    let agent = agent(Arc::clone(&link), Arc::new(EchoExecutor), Duration::from_millis(5));

    let worker_id = agent.register_until_success(&CancellationToken::new()).await;

    assert_eq!(worker_id, Some(WORKER_ID));
    assert_eq!(link.register_attempts(), 4);
    assert_eq!(agent.worker_id(), Some(WORKER_ID));
}

// ---------------------------------------------------------------------------
// Test: cancellation ends the registration loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn registration_loop_stops_when_cancelled() {
    let link = Arc::new(FakeLink::default());
    link.fail_registrations(u32::MAX);
    let agent = agent(Arc::clone(&link), Arc::new(EchoExecutor), Duration::from_secs(60));
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert_eq!(agent.register_until_success(&cancel).await, None);
    assert_eq!(link.register_attempts(), 1);
    assert_eq!(agent.worker_id(), None);
}

// ---------------------------------------------------------------------------
// Test: a forgotten worker drops its job and registers again
// ---------------------------------------------------------------------------

#[tokio::test]
async fn heartbeat_loop_registers_again_after_worker_is_forgotten() {
    let link = Arc::new(FakeLink::default());
    link.set_heartbeat_interval_secs(1);
    let agent = registered_agent(
        Arc::clone(&link),
        Arc::new(BlockingExecutor {
            checkpoint_ref: "ckpt/a".to_string(),
        }),
    )
    .await;

    agent
        .start(StartCommand {
            job_id: 6,
            config_override: json!({}),
            input_refs: json!({}),
        })
        .unwrap();
    link.expect_job(Some(6));
    link.forget_worker();

    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let agent = Arc::clone(&agent);
        let cancel = cancel.clone();
        async move { agent.run_heartbeats(cancel).await }
    });

    eventually_within(Duration::from_secs(3), || link.register_attempts() == 2).await;
    assert_eq!(agent.worker_id(), Some(WORKER_ID));
    assert_eq!(agent.current_job_id(), None);

    let first = &link.heartbeats()[0];
    assert_eq!(first.status, WorkerStatus::Working);
    assert_eq!(first.current_job_id, Some(6));

    // The loop carries on under the new identity, now idle.
    link.expect_job(None);
    eventually_within(Duration::from_secs(3), || link.heartbeats().len() >= 2).await;
    let second = &link.heartbeats()[1];
    assert_eq!(second.status, WorkerStatus::Idle);
    assert_eq!(second.current_job_id, None);

    cancel.cancel();
    handle.await.unwrap();
    assert!(link.completions().is_empty(), "an abandoned job is not completed");
}
