//! Event router error definitions

use crate::{db::error::DbError, queue::error::TaskQueueError};

/// Event router errors
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// An error interacting with the database
    #[error("db error: {0}")]
    Db(#[from] DbError),
    /// An error enqueuing a task
    #[error("task queue error: {0}")]
    Queue(#[from] TaskQueueError),
}
