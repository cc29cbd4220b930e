//! Task queue error definitions

/// Task queue errors
#[derive(Debug, thiserror::Error)]
pub enum TaskQueueError {
    /// An error sending a task
    #[error("error sending task: {0}")]
    Send(String),
    /// An error polling tasks
    #[error("error polling tasks: {0}")]
    Poll(String),
    /// An error deferring a task's redelivery
    #[error("error deferring task redelivery: {0}")]
    Redeliver(String),
    /// An error deleting a task
    #[error("error deleting task: {0}")]
    Delete(String),
    /// An error de/serializing a value
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[allow(clippy::needless_pass_by_value)]
impl TaskQueueError {
    /// Create a new send error
    pub fn send<T: ToString>(msg: T) -> Self {
        Self::Send(msg.to_string())
    }

    /// Create a new poll error
    pub fn poll<T: ToString>(msg: T) -> Self {
        Self::Poll(msg.to_string())
    }

    /// Create a new redelivery error
    pub fn redeliver<T: ToString>(msg: T) -> Self {
        Self::Redeliver(msg.to_string())
    }

    /// Create a new delete error
    pub fn delete<T: ToString>(msg: T) -> Self {
        Self::Delete(msg.to_string())
    }
}
