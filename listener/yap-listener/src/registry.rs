//! The chain registry: static per-chain configuration
//!
//! Loaded once at startup from a JSON config file and treated as immutable
//! for the lifetime of the process. The registry is an explicit object owned
//! by the lifecycle manager and injected wherever chain lookup is needed.

use std::{collections::HashMap, fs, path::Path};

use alloy_primitives::Address;
use serde::Deserialize;
use serde_json::Value;

// -------------
// | Constants |
// -------------

/// The default per-chain poll interval, in milliseconds
const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;

/// The default lag threshold above which a falling-behind alert is emitted
const DEFAULT_ALERT_THRESHOLD: u64 = 50;

// ----------
// | Errors |
// ----------

/// Chain registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The requested chain is not configured
    #[error("no chain configured with ID {0}")]
    UnknownChain(u64),
    /// An error reading the chain config file
    #[error("error reading chain config: {0}")]
    Io(String),
    /// An error parsing the chain config file
    #[error("error parsing chain config: {0}")]
    Parse(#[from] serde_json::Error),
}

// ---------
// | Types |
// ---------

/// The escrow contract tracked on a chain.
///
/// When configured, the chain's poller watches this contract for the creation
/// event independently of job subscriptions.
#[derive(Clone, Debug, Deserialize)]
pub struct EscrowConfig {
    /// The escrow contract address
    pub address: Address,
    /// The escrow contract's ABI as a JSON document
    pub abi: Value,
    /// The name of the tracked creation event
    pub creation_event: String,
}

/// The static configuration for one chain
#[derive(Clone, Debug, Deserialize)]
pub struct ChainConfig {
    /// The chain ID
    pub chain_id: u64,
    /// The primary JSON-RPC endpoint
    pub rpc_url: String,
    /// The backup JSON-RPC endpoint, used after consecutive primary failures
    #[serde(default)]
    pub backup_rpc_url: Option<String>,
    /// The poll interval in milliseconds; fast chains tick sub-second
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// The lag threshold above which a falling-behind alert is emitted
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: u64,
    /// The escrow contract watched on this chain, if any
    #[serde(default)]
    pub escrow: Option<EscrowConfig>,
}

/// The default poll interval
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

/// The default alert threshold
fn default_alert_threshold() -> u64 {
    DEFAULT_ALERT_THRESHOLD
}

// ------------
// | Registry |
// ------------

/// A pure lookup table of per-chain configuration
#[derive(Clone, Debug)]
pub struct ChainRegistry {
    /// The configured chains, keyed by chain ID
    chains: HashMap<u64, ChainConfig>,
}

impl ChainRegistry {
    /// Build a registry from a list of chain configs
    pub fn new(configs: Vec<ChainConfig>) -> Self {
        let chains = configs.into_iter().map(|c| (c.chain_id, c)).collect();
        Self { chains }
    }

    /// Load a registry from a JSON config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let contents = fs::read_to_string(path).map_err(|e| RegistryError::Io(e.to_string()))?;
        let configs: Vec<ChainConfig> = serde_json::from_str(&contents)?;

        Ok(Self::new(configs))
    }

    /// Look up the config for a chain
    pub fn get(&self, chain_id: u64) -> Result<&ChainConfig, RegistryError> {
        self.chains.get(&chain_id).ok_or(RegistryError::UnknownChain(chain_id))
    }

    /// The IDs of all configured chains
    pub fn chain_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.chains.keys().copied()
    }

    /// The configs of all chains with an escrow contract configured
    pub fn escrow_chains(&self) -> impl Iterator<Item = &ChainConfig> {
        self.chains.values().filter(|c| c.escrow.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal registry config parses with defaults applied
    #[test]
    fn test_parse_with_defaults() {
        let json = r#"[{"chain_id": 8453, "rpc_url": "http://localhost:8545"}]"#;
        let configs: Vec<ChainConfig> = serde_json::from_str(json).unwrap();
        let registry = ChainRegistry::new(configs);

        let config = registry.get(8453).unwrap();
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.alert_threshold, DEFAULT_ALERT_THRESHOLD);
        assert!(config.backup_rpc_url.is_none());
        assert!(config.escrow.is_none());
    }

    /// Unknown chains are rejected at lookup
    #[test]
    fn test_unknown_chain() {
        let registry = ChainRegistry::new(vec![]);
        assert!(matches!(registry.get(1), Err(RegistryError::UnknownChain(1))));
    }
}
