//! Poller error definitions

use crate::transport::error::TransportError;

/// Per-chain poller errors
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    /// An error from the chain transport
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// An error handing events to the sink
    #[error("event sink error: {0}")]
    Sink(String),
    /// An error reading or writing the chain's cursor
    #[error("cursor store error: {0}")]
    Cursor(String),
    /// The poller's command channel is closed, meaning the poller has shut
    /// down
    #[error("poller for chain {0} is not running")]
    NotRunning(u64),
}

#[allow(clippy::needless_pass_by_value)]
impl PollerError {
    /// Create a new sink error
    pub fn sink<T: ToString>(msg: T) -> Self {
        Self::Sink(msg.to_string())
    }

    /// Create a new cursor error
    pub fn cursor<T: ToString>(msg: T) -> Self {
        Self::Cursor(msg.to_string())
    }
}
