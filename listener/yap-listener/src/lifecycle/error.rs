//! Error types emitted by the job lifecycle manager

use crate::{
    abi::AbiError, db::error::DbError, poller::error::PollerError, queue::error::TaskQueueError,
    registry::RegistryError, transport::error::TransportError,
};

/// An error in the job lifecycle manager
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// A subscription request failed validation
    #[error("invalid subscription request: {0}")]
    Validation(String),
    /// An error validating a job's ABI or event names
    #[error("abi error: {0}")]
    Abi(#[from] AbiError),
    /// An error from the chain registry
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    /// A database error
    #[error("db error: {0}")]
    Db(#[from] DbError),
    /// An error from a chain poller
    #[error("poller error: {0}")]
    Poller(#[from] PollerError),
    /// An error enqueuing a task
    #[error("queue error: {0}")]
    Queue(#[from] TaskQueueError),
    /// An error constructing a chain transport
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

#[allow(clippy::needless_pass_by_value)]
impl LifecycleError {
    /// Create a new validation error
    pub fn validation<T: ToString>(msg: T) -> Self {
        Self::Validation(msg.to_string())
    }

    /// Whether the error is a fault in the request rather than the service
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Abi(_) | Self::Registry(RegistryError::UnknownChain(_))
        )
    }
}
