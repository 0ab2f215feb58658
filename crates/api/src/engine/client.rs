//! Controller → worker command transport.
//!
//! [`WorkerClient`] is the seam the coordinator talks through; production
//! uses [`HttpWorkerClient`] against each agent's command server, tests
//! substitute an in-memory fake.

use std::time::Duration;

use async_trait::async_trait;
use fleet_core::protocol::{
    ResumeCommand, StartCommand, StopAck, StopCommand, COMMAND_RESUME_PATH, COMMAND_START_PATH,
    COMMAND_STOP_PATH,
};
use fleet_db::models::worker::Worker;
use serde::Deserialize;

/// Errors from sending a command to a worker agent.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The HTTP request itself failed (connect, DNS, timeout, etc.).
    #[error("Worker request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The agent answered with a non-2xx status code.
    #[error("Worker rejected command ({status}): {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// Sends start, resume and stop commands to worker agents.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    async fn start(&self, worker: &Worker, command: &StartCommand) -> Result<(), CommandError>;

    async fn resume(&self, worker: &Worker, command: &ResumeCommand) -> Result<(), CommandError>;

    /// Ask the worker to pause. Resolves once the worker has stopped and
    /// written its final checkpoint.
    async fn stop(&self, worker: &Worker, command: &StopCommand) -> Result<StopAck, CommandError>;
}

/// `{ "data": T }` as returned by the agent's command server.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// [`WorkerClient`] over HTTP, one shared connection pool for all agents.
pub struct HttpWorkerClient {
    client: reqwest::Client,
}

impl HttpWorkerClient {
    /// Build a client whose every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, CommandError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn post<B: serde::Serialize + Sync>(
        &self,
        worker: &Worker,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, CommandError> {
        let response = self
            .client
            .post(format!("{}{path}", worker.base_url()))
            .json(body)
            .send()
            .await?;
        Self::ensure_success(response).await
    }

    /// Map non-2xx responses to [`CommandError::Rejected`].
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, CommandError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(CommandError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn start(&self, worker: &Worker, command: &StartCommand) -> Result<(), CommandError> {
        self.post(worker, COMMAND_START_PATH, command).await?;
        Ok(())
    }

    async fn resume(&self, worker: &Worker, command: &ResumeCommand) -> Result<(), CommandError> {
        self.post(worker, COMMAND_RESUME_PATH, command).await?;
        Ok(())
    }

    async fn stop(&self, worker: &Worker, command: &StopCommand) -> Result<StopAck, CommandError> {
        let response = self.post(worker, COMMAND_STOP_PATH, command).await?;
        let envelope: Envelope<StopAck> = response.json().await?;
        Ok(envelope.data)
    }
}
