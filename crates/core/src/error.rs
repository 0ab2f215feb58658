use crate::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The referenced worker or job does not exist. Workers treat this as
    /// a signal to re-register from scratch.
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// A conditional update lost against a concurrent change. Callers retry
    /// the higher-level operation; they never overwrite blindly.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn unknown_worker(id: DbId) -> Self {
        Self::NotFound {
            entity: "Worker",
            id,
        }
    }

    pub fn unknown_job(id: DbId) -> Self {
        Self::NotFound { entity: "Job", id }
    }
}
