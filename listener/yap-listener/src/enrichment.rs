//! Clients for the external enrichment APIs: the off-chain yapper registry,
//! the social graph, and the name service
//!
//! These upstreams are treated as unreliable. Every lookup is time-boxed and
//! degrades to an empty result on failure, so a flaky enrichment source makes
//! a yapper's cluster smaller, never absent, and never stalls a worker. The
//! one exception is the creation-event notification, whose failure must
//! surface so the queue's retry policy applies.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use alloy_primitives::Address;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;
use yap_listener_api::types::{Yapper, tasks::EventCreatedTask};

// -------------
// | Constants |
// -------------

/// The timeout applied to every outbound enrichment API call
const API_TIMEOUT: Duration = Duration::from_secs(10);

/// The API key header expected by the yap API
const API_KEY_HEADER: &str = "x-api-key";

// ----------
// | Errors |
// ----------

/// Enrichment errors
#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    /// An error building the HTTP client
    #[error("error setting up enrichment client: {0}")]
    Setup(String),
    /// An error calling an upstream API
    #[error("enrichment API error: {0}")]
    Api(String),
}

#[allow(clippy::needless_pass_by_value)]
impl EnrichmentError {
    /// Create a new setup error
    pub fn setup<T: ToString>(msg: T) -> Self {
        Self::Setup(msg.to_string())
    }

    /// Create a new API error
    pub fn api<T: ToString>(msg: T) -> Self {
        Self::Api(msg.to_string())
    }
}

// --------------------
// | Trait Definition |
// --------------------

/// The enrichment interface consumed by the workers
#[async_trait]
pub trait Enricher: Send + Sync {
    /// The yappers enrolled in a job, per the off-chain registry.
    /// Best-effort: failures return an empty list.
    async fn get_job_yappers(&self, job_id: &str) -> Vec<Yapper>;

    /// The addresses socially connected to a yapper.
    /// Best-effort: failures return an empty list.
    async fn get_connected_addresses(&self, yapper: &Yapper) -> Vec<Address>;

    /// The addresses resolved from the yapper's registered onchain names.
    /// Best-effort: failures return an empty list.
    async fn resolve_named_addresses(&self, yapper: &Yapper) -> Vec<Address>;

    /// Notify the upstream yap API of an observed creation event.
    /// Unlike the lookups, a failure here is surfaced so the task retries.
    async fn notify_event_created(&self, task: &EventCreatedTask) -> Result<(), EnrichmentError>;
}

/// A shared, type-erased enricher
pub type DynEnricher = Arc<dyn Enricher>;

// -------------------
// | Response Shapes |
// -------------------

/// The yapper registry's enrollment response
#[derive(Deserialize)]
struct YappersResponse {
    /// The enrolled yappers
    yappers: Vec<Yapper>,
}

/// An address-list response shared by the social graph and name service
#[derive(Deserialize)]
struct AddressesResponse {
    /// The returned addresses
    addresses: Vec<Address>,
}

// -----------------
// | HTTP Enricher |
// -----------------

/// An enricher backed by the HTTP enrichment APIs
pub struct HttpEnricher {
    /// The HTTP client, shared across upstreams
    client: reqwest::Client,
    /// The yap API base URL
    yap_api_url: String,
    /// The yap API key, if required
    yap_api_key: Option<String>,
    /// The social graph API base URL
    social_api_url: String,
    /// The name service base URL
    name_service_url: String,
}

impl HttpEnricher {
    /// Create a new HTTP enricher
    pub fn new(
        yap_api_url: String,
        yap_api_key: Option<String>,
        social_api_url: String,
        name_service_url: String,
    ) -> Result<Self, EnrichmentError> {
        let client = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .map_err(EnrichmentError::setup)?;

        Ok(Self { client, yap_api_url, yap_api_key, social_api_url, name_service_url })
    }

    /// Fetch and parse a JSON document, for the best-effort lookups
    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: String) -> Result<T, EnrichmentError> {
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(EnrichmentError::api)?;

        response.json::<T>().await.map_err(EnrichmentError::api)
    }
}

#[async_trait]
impl Enricher for HttpEnricher {
    async fn get_job_yappers(&self, job_id: &str) -> Vec<Yapper> {
        let url = format!("{}/jobs/{job_id}/yappers", self.yap_api_url);
        match self.get_json::<YappersResponse>(url).await {
            Ok(response) => response.yappers,
            Err(e) => {
                warn!("yapper registry lookup failed for job {job_id}: {e}");
                vec![]
            },
        }
    }

    async fn get_connected_addresses(&self, yapper: &Yapper) -> Vec<Address> {
        let url =
            format!("{}/connections/{}/addresses", self.social_api_url, yapper.social_username);
        match self.get_json::<AddressesResponse>(url).await {
            Ok(response) => response.addresses,
            Err(e) => {
                warn!("social graph lookup failed for yapper {}: {e}", yapper.yapper_id);
                vec![]
            },
        }
    }

    async fn resolve_named_addresses(&self, yapper: &Yapper) -> Vec<Address> {
        let url = format!("{}/resolve/{}", self.name_service_url, yapper.wallet_address);
        match self.get_json::<AddressesResponse>(url).await {
            Ok(response) => response.addresses,
            Err(e) => {
                warn!("name service lookup failed for yapper {}: {e}", yapper.yapper_id);
                vec![]
            },
        }
    }

    async fn notify_event_created(&self, task: &EventCreatedTask) -> Result<(), EnrichmentError> {
        let url = format!("{}/events/created", self.yap_api_url);

        let mut request = self.client.post(&url).json(task);
        if let Some(key) = &self.yap_api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(EnrichmentError::api)?;

        Ok(())
    }
}

// --------------------
// | Cluster Assembly |
// --------------------

/// Assemble a yapper's address cluster from their own wallet and the
/// enrichment sources, deduplicated and with the zero address excluded
pub fn cluster_addresses<I: IntoIterator<Item = Address>>(
    wallet: Option<Address>,
    sources: I,
) -> BTreeSet<Address> {
    wallet
        .into_iter()
        .chain(sources)
        .filter(|address| *address != Address::ZERO)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The cluster contains the wallet and sourced addresses exactly once,
    /// and never the zero address
    #[test]
    fn test_cluster_assembly() {
        let wallet = Address::with_last_byte(1);
        let connected = Address::with_last_byte(2);

        let cluster = cluster_addresses(
            Some(wallet),
            vec![connected, connected, wallet, Address::ZERO],
        );

        assert_eq!(cluster.len(), 2);
        assert!(cluster.contains(&wallet));
        assert!(cluster.contains(&connected));
        assert!(!cluster.contains(&Address::ZERO));
    }

    /// A missing wallet yields a cluster of only the sourced addresses
    #[test]
    fn test_cluster_without_wallet() {
        let cluster = cluster_addresses(None, vec![Address::with_last_byte(2)]);
        assert_eq!(cluster.len(), 1);
    }
}
