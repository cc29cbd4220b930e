//! Task worker error definitions

use crate::{db::error::DbError, enrichment::EnrichmentError, queue::error::TaskQueueError};

/// Task worker errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// An error interacting with the database
    #[error("db error: {0}")]
    Db(#[from] DbError),
    /// An error interacting with the task queue
    #[error("task queue error: {0}")]
    Queue(#[from] TaskQueueError),
    /// An error from an enrichment upstream
    #[error("enrichment error: {0}")]
    Enrichment(#[from] EnrichmentError),
    /// An error de/serializing a task payload
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// An error applying a job lifecycle change
    #[error("job control error: {0}")]
    JobControl(String),
}

#[allow(clippy::needless_pass_by_value)]
impl WorkerError {
    /// Create a new job control error
    pub fn job_control<T: ToString>(msg: T) -> Self {
        Self::JobControl(msg.to_string())
    }
}
