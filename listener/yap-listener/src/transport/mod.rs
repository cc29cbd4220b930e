//! The chain transport: a narrow, endpoint-agnostic interface over a chain's
//! JSON-RPC surface
//!
//! The poller's state machine is written entirely against this trait, so
//! either an HTTP-polling or a push-based transport can back it, and tests
//! substitute a scripted fake. The poller decides *which* endpoint (primary
//! or backup) to use; a transport is bound to exactly one endpoint.

use alloy::rpc::types::Log;
use alloy_primitives::{Address, B256};
use async_trait::async_trait;

use crate::transport::error::TransportError;

pub mod error;
pub mod http;

/// The interface a chain transport exposes to the poller
#[async_trait]
pub trait ChainTransport: Send + Sync {
    /// The current chain head block number
    async fn get_block_number(&self) -> Result<u64, TransportError>;

    /// The logs emitted by any of the given contracts in the (inclusive)
    /// block range, filtered by topic0 when `topics` is non-empty
    async fn get_logs(
        &self,
        addresses: &[Address],
        topics: &[B256],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, TransportError>;
}
