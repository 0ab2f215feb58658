#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::PgPool;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use fleet_api::config::ServerConfig;
use fleet_api::engine::client::{CommandError, WorkerClient};
use fleet_api::engine::coordinator::AssignmentCoordinator;
use fleet_api::routes;
use fleet_api::state::AppState;
use fleet_core::profiles::StaticProfiles;
use fleet_core::protocol::{ResumeCommand, StartCommand, StopAck, StopCommand};
use fleet_core::types::DbId;
use fleet_core::worker_pool::LivenessPolicy;
use fleet_db::models::worker::Worker;

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default)
/// and a 30-second request timeout.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        liveness: LivenessPolicy::default(),
        assign_interval_secs: 5,
        command_timeout_secs: 10,
        profiles_path: None,
    }
}

/// Profiles available to every test app.
pub fn test_profiles() -> StaticProfiles {
    StaticProfiles::from_json(
        r#"{
            "fast-preview": { "sampler": { "steps": 4 }, "output": { "format": "webp" } },
            "high-quality": { "sampler": { "steps": 60 } }
        }"#,
    )
    .unwrap()
}

// ---------------------------------------------------------------------------
// Fake worker client
// ---------------------------------------------------------------------------

/// A command the fake client received.
#[derive(Debug, Clone, PartialEq)]
pub enum SentCommand {
    Start { worker_id: DbId, job_id: DbId },
    Resume {
        worker_id: DbId,
        job_id: DbId,
        checkpoint_ref: Option<String>,
    },
    Stop { worker_id: DbId, job_id: DbId },
}

/// How the fake answers a command.
#[derive(Debug, Clone)]
pub enum FakeReply {
    Accept,
    /// Answer with a non-2xx status.
    Reject(u16),
    /// Behave as if the agent could not be reached.
    Unreachable,
}

/// In-memory [`WorkerClient`] recording every command it is sent.
pub struct FakeWorkerClient {
    sent: Mutex<Vec<SentCommand>>,
    reply: Mutex<FakeReply>,
    stop_checkpoint: Mutex<Option<String>>,
}

impl Default for FakeWorkerClient {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            reply: Mutex::new(FakeReply::Accept),
            stop_checkpoint: Mutex::new(None),
        }
    }
}

impl FakeWorkerClient {
    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_reply(&self, reply: FakeReply) {
        *self.reply.lock().unwrap() = reply;
    }

    /// Checkpoint reference returned in stop acknowledgements.
    pub fn set_stop_checkpoint(&self, checkpoint_ref: Option<&str>) {
        *self.stop_checkpoint.lock().unwrap() = checkpoint_ref.map(str::to_string);
    }

    fn answer(&self, command: SentCommand) -> Result<(), CommandError> {
        self.sent.lock().unwrap().push(command);
        match self.reply.lock().unwrap().clone() {
            FakeReply::Accept => Ok(()),
            FakeReply::Reject(status) => Err(CommandError::Rejected {
                status,
                body: "rejected by fake".to_string(),
            }),
            FakeReply::Unreachable => Err(unreachable_error()),
        }
    }
}

/// A transport error without touching the network: `reqwest` errors
/// cannot be built directly, but an invalid URL yields one.
fn unreachable_error() -> CommandError {
    let err = reqwest::Client::new()
        .get("not a url")
        .build()
        .expect_err("invalid URL must fail to build");
    CommandError::Transport(err)
}

#[async_trait]
impl WorkerClient for FakeWorkerClient {
    async fn start(&self, worker: &Worker, command: &StartCommand) -> Result<(), CommandError> {
        self.answer(SentCommand::Start {
            worker_id: worker.id,
            job_id: command.job_id,
        })
    }

    async fn resume(&self, worker: &Worker, command: &ResumeCommand) -> Result<(), CommandError> {
        self.answer(SentCommand::Resume {
            worker_id: worker.id,
            job_id: command.job_id,
            checkpoint_ref: command.checkpoint_ref.clone(),
        })
    }

    async fn stop(&self, worker: &Worker, command: &StopCommand) -> Result<StopAck, CommandError> {
        self.answer(SentCommand::Stop {
            worker_id: worker.id,
            job_id: command.job_id,
        })?;
        Ok(StopAck {
            job_id: command.job_id,
            checkpoint_ref: self.stop_checkpoint.lock().unwrap().clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// App construction
// ---------------------------------------------------------------------------

/// A test app plus handles on the pieces tests drive directly.
pub struct TestApp {
    pub router: Router,
    pub client: Arc<FakeWorkerClient>,
    pub coordinator: Arc<AssignmentCoordinator>,
    pub pool: PgPool,
}

/// Build the full application router with all middleware layers, using the
/// given database pool.
///
/// This mirrors the router construction in `main.rs` so integration tests
/// exercise the same middleware stack (CORS, request ID, timeout, tracing,
/// panic recovery) that production uses.
pub fn build_test_app(pool: PgPool) -> Router {
    build_test_harness(pool).router
}

/// Like [`build_test_app`], also exposing the fake worker client and the
/// coordinator. No background loops run; tests call
/// [`AssignmentCoordinator::assign_pending`] themselves.
pub fn build_test_harness(pool: PgPool) -> TestApp {
    let config = test_config();
    let client = Arc::new(FakeWorkerClient::default());
    let coordinator = Arc::new(AssignmentCoordinator::new(
        pool.clone(),
        Arc::clone(&client) as Arc<dyn WorkerClient>,
        config.liveness,
        config.assign_interval(),
    ));

    let state = AppState {
        pool: pool.clone(),
        config: Arc::new(config),
        coordinator: Arc::clone(&coordinator),
        profiles: Arc::new(test_profiles()),
    };

    let cors = CorsLayer::new()
        .allow_origin(["http://localhost:5173".parse().unwrap()])
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600));

    let request_id_header = HeaderName::from_static("x-request-id");

    let router = Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes())
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(state);

    TestApp {
        router,
        client,
        coordinator,
        pool,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: &Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn post_json(app: &Router, uri: &str, body: Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn delete(app: &Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Register a worker through the API and return its ID.
pub async fn register_worker(app: &Router, hostname: &str, port: u16) -> DbId {
    let response = post_json(
        app,
        "/api/v1/workers/register",
        json!({ "hostname": hostname, "port": port }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["data"]["worker_id"].as_i64().unwrap()
}

/// Create a job through the API and return its ID.
pub async fn create_job(app: &Router, body: Value) -> DbId {
    let response = post_json(app, "/api/v1/jobs", body).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["data"]["id"].as_i64().unwrap()
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
