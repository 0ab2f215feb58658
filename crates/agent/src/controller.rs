//! Worker → controller calls.
//!
//! [`ControllerLink`] is what the runtime talks through; production uses
//! [`HttpControllerLink`] against the controller's `/api/v1` routes.

use std::time::Duration;

use async_trait::async_trait;
use fleet_core::protocol::{
    AckRequest, CheckpointRequest, CompletionRequest, HeartbeatRequest, HeartbeatResponse,
    RegisterRequest, RegisterResponse,
};
use fleet_core::types::DbId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Per-request timeout for controller calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The request never got an answer (connect, DNS, timeout, etc.).
    #[error("Controller request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The controller does not know this worker; register again.
    #[error("Controller does not know this worker")]
    UnknownWorker,

    #[error("Controller does not know job {0}")]
    UnknownJob(DbId),

    /// Any other non-2xx answer.
    #[error("Controller rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl LinkError {
    /// Whether repeating the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::Transport(_) => true,
            LinkError::Rejected { status, .. } => *status >= 500,
            LinkError::UnknownWorker | LinkError::UnknownJob(_) => false,
        }
    }
}

#[async_trait]
pub trait ControllerLink: Send + Sync {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, LinkError>;

    async fn heartbeat(
        &self,
        worker_id: DbId,
        request: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, LinkError>;

    async fn deregister(&self, worker_id: DbId) -> Result<(), LinkError>;

    async fn ack(&self, job_id: DbId, worker_id: DbId) -> Result<(), LinkError>;

    async fn checkpoint(
        &self,
        job_id: DbId,
        worker_id: DbId,
        checkpoint_ref: &str,
    ) -> Result<(), LinkError>;

    async fn complete(&self, job_id: DbId, request: &CompletionRequest) -> Result<(), LinkError>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    code: String,
}

/// [`ControllerLink`] over HTTP.
pub struct HttpControllerLink {
    client: reqwest::Client,
    /// `{controller_url}/api/v1`
    api_base: String,
}

impl HttpControllerLink {
    pub fn new(controller_url: &str) -> Result<Self, LinkError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_base: format!("{}/api/v1", controller_url.trim_end_matches('/')),
        })
    }

    async fn post<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
        job_id: Option<DbId>,
    ) -> Result<reqwest::Response, LinkError> {
        let response = self
            .client
            .post(format!("{}{path}", self.api_base))
            .json(body)
            .send()
            .await?;
        Self::ensure_success(response, job_id).await
    }

    async fn post_for<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, LinkError> {
        let envelope: Envelope<T> = self.post(path, body, None).await?.json().await?;
        Ok(envelope.data)
    }

    /// Map non-2xx responses to a [`LinkError`] using the `code` field of
    /// the controller's error body.
    async fn ensure_success(
        response: reqwest::Response,
        job_id: Option<DbId>,
    ) -> Result<reqwest::Response, LinkError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body: ErrorBody = response.json().await.unwrap_or_default();
        Err(match (body.code.as_str(), job_id) {
            ("UNKNOWN_WORKER", _) => LinkError::UnknownWorker,
            ("UNKNOWN_JOB", Some(job_id)) => LinkError::UnknownJob(job_id),
            _ => LinkError::Rejected {
                status: status.as_u16(),
                message: body.error,
            },
        })
    }
}

#[async_trait]
impl ControllerLink for HttpControllerLink {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, LinkError> {
        self.post_for("/workers/register", request).await
    }

    async fn heartbeat(
        &self,
        worker_id: DbId,
        request: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, LinkError> {
        self.post_for(&format!("/workers/{worker_id}/heartbeat"), request)
            .await
    }

    async fn deregister(&self, worker_id: DbId) -> Result<(), LinkError> {
        let response = self
            .client
            .delete(format!("{}/workers/{worker_id}", self.api_base))
            .send()
            .await?;
        Self::ensure_success(response, None).await?;
        Ok(())
    }

    async fn ack(&self, job_id: DbId, worker_id: DbId) -> Result<(), LinkError> {
        self.post(
            &format!("/jobs/{job_id}/ack"),
            &AckRequest { worker_id },
            Some(job_id),
        )
        .await?;
        Ok(())
    }

    async fn checkpoint(
        &self,
        job_id: DbId,
        worker_id: DbId,
        checkpoint_ref: &str,
    ) -> Result<(), LinkError> {
        let body = CheckpointRequest {
            worker_id,
            checkpoint_ref: checkpoint_ref.to_string(),
        };
        self.post(&format!("/jobs/{job_id}/checkpoint"), &body, Some(job_id))
            .await?;
        Ok(())
    }

    async fn complete(&self, job_id: DbId, request: &CompletionRequest) -> Result<(), LinkError> {
        self.post(&format!("/jobs/{job_id}/complete"), request, Some(job_id))
            .await?;
        Ok(())
    }
}
