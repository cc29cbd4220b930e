//! Chain transport error definitions

use std::fmt::Display;

/// Chain transport errors.
///
/// All variants are transient infrastructure failures from the poller's
/// perspective; the poller's backoff & failover logic decides how to react.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// An RPC call exceeded its timeout
    #[error("RPC call timed out: {0}")]
    Timeout(String),
    /// An error from the RPC endpoint
    #[error("RPC error: {0}")]
    Rpc(String),
    /// An invalid endpoint URL
    #[error("invalid RPC URL: {0}")]
    InvalidUrl(String),
}

#[allow(clippy::needless_pass_by_value)]
impl TransportError {
    /// Create a new timeout error
    pub fn timeout<T: ToString>(msg: T) -> Self {
        Self::Timeout(msg.to_string())
    }

    /// Create a new RPC error
    pub fn rpc<T: ToString>(msg: T) -> Self {
        Self::Rpc(msg.to_string())
    }

    /// Create a new invalid URL error
    pub fn invalid_url<T: ToString>(msg: T) -> Self {
        Self::InvalidUrl(msg.to_string())
    }
}

impl<E: Display> From<alloy::transports::RpcError<E>> for TransportError {
    fn from(e: alloy::transports::RpcError<E>) -> Self {
        TransportError::Rpc(e.to_string())
    }
}
