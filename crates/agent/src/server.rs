//! Command server: the controller → agent half of the protocol.
//!
//! ```text
//! POST /commands/start   -> start   (202)
//! POST /commands/resume  -> resume  (202)
//! POST /commands/stop    -> stop    (200, { checkpoint_ref })
//! ```

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use fleet_core::protocol::{
    ResumeCommand, StartCommand, StopCommand, COMMAND_RESUME_PATH, COMMAND_START_PATH,
    COMMAND_STOP_PATH,
};
use fleet_core::types::DbId;
use serde::Serialize;
use serde_json::json;

use crate::runtime::{Agent, AgentError};

#[derive(Debug, Serialize)]
struct DataResponse<T: Serialize> {
    data: T,
}

#[derive(Debug, Serialize)]
struct Accepted {
    job_id: DbId,
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AgentError::Busy { .. } => (StatusCode::CONFLICT, "BUSY"),
            AgentError::NotRunning { .. } => (StatusCode::CONFLICT, "NOT_RUNNING"),
            AgentError::NotRegistered => (StatusCode::SERVICE_UNAVAILABLE, "NOT_REGISTERED"),
        };
        tracing::debug!(error = %self, code, "Command refused");
        let body = json!({
            "error": self.to_string(),
            "code": code,
        });
        (status, Json(body)).into_response()
    }
}

async fn start(
    State(agent): State<Arc<Agent>>,
    Json(command): Json<StartCommand>,
) -> Result<impl IntoResponse, AgentError> {
    let job_id = command.job_id;
    agent.start(command)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: Accepted { job_id },
        }),
    ))
}

async fn resume(
    State(agent): State<Arc<Agent>>,
    Json(command): Json<ResumeCommand>,
) -> Result<impl IntoResponse, AgentError> {
    let job_id = command.job_id;
    agent.resume(command)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: Accepted { job_id },
        }),
    ))
}

async fn stop(
    State(agent): State<Arc<Agent>>,
    Json(command): Json<StopCommand>,
) -> Result<impl IntoResponse, AgentError> {
    let ack = agent.stop(command).await?;
    Ok(Json(DataResponse { data: ack }))
}

pub fn router(agent: Arc<Agent>) -> Router {
    Router::new()
        .route(COMMAND_START_PATH, post(start))
        .route(COMMAND_RESUME_PATH, post(resume))
        .route(COMMAND_STOP_PATH, post(stop))
        .with_state(agent)
}
