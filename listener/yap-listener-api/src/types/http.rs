//! HTTP request & response types for the yap listener API
//!
//! These are the in-process types the external API layer maps onto its wire
//! surface; the listener itself exposes no HTTP routes beyond a healthcheck.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request to subscribe a job to a contract's events
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscribeJobRequest {
    /// The job's 21-character identifier, assigned by the API layer
    pub job_id: String,
    /// The contract address to listen on, hex-encoded
    pub contract_address: String,
    /// The chain the contract is deployed on
    pub chain_id: u64,
    /// The contract's ABI as a JSON document
    pub abi: Value,
    /// The event names to listen for; an empty list subscribes to all events
    pub events: Vec<String>,
    /// When the job's activity window closes, if time-boxed
    pub ends_at: Option<DateTime<Utc>>,
}

/// The response to a successful job subscription
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscribeJobResponse {
    /// The confirmed job ID
    pub job_id: String,
    /// The confirmed contract address
    pub contract_address: String,
}

/// The response to a job unsubscription
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnsubscribeJobResponse {
    /// Whether a job with the given ID was found and deactivated
    pub found: bool,
}
