//! Chain transport implementation over an alloy HTTP provider

use std::time::Duration;

use alloy::{
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::{Filter, Log},
};
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use tokio::time::timeout;

use crate::transport::{ChainTransport, error::TransportError};

// -------------
// | Constants |
// -------------

/// The timeout applied to every outbound RPC call.
///
/// A hung endpoint must fail the call rather than stall the chain's poll
/// loop; expiry counts as a transient failure.
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

// ------------------
// | HTTP Transport |
// ------------------

/// A chain transport bound to a single HTTP JSON-RPC endpoint
#[derive(Clone)]
pub struct HttpTransport {
    /// The underlying RPC provider
    provider: DynProvider,
    /// The endpoint URL, kept for log context
    url: String,
}

impl HttpTransport {
    /// Create a new transport for the given endpoint URL
    pub fn new(url: &str) -> Result<Self, TransportError> {
        let parsed = url.parse().map_err(TransportError::invalid_url)?;
        let provider = ProviderBuilder::new().connect_http(parsed);

        Ok(Self { provider: DynProvider::new(provider), url: url.to_string() })
    }

    /// The endpoint URL this transport is bound to
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ChainTransport for HttpTransport {
    async fn get_block_number(&self) -> Result<u64, TransportError> {
        let block_number = timeout(RPC_TIMEOUT, self.provider.get_block_number())
            .await
            .map_err(|_| TransportError::timeout(format!("getBlockNumber ({})", self.url)))??;

        Ok(block_number)
    }

    async fn get_logs(
        &self,
        addresses: &[Address],
        topics: &[B256],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, TransportError> {
        let mut filter =
            Filter::new().address(addresses.to_vec()).from_block(from_block).to_block(to_block);

        if !topics.is_empty() {
            filter = filter.event_signature(topics.to_vec());
        }

        let logs = timeout(RPC_TIMEOUT, self.provider.get_logs(&filter)).await.map_err(|_| {
            TransportError::timeout(format!("getLogs({from_block}-{to_block}) ({})", self.url))
        })??;

        Ok(logs)
    }
}
