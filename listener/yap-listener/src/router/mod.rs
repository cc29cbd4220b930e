//! The event router: fans decoded events out to the active jobs subscribed
//! to their contract, and forwards escrow creation events to the work queue
//!
//! Routed events are persisted as append-only `ContractEvent` rows; the rows
//! for one batch are inserted in a single statement so a crash mid-fan-out
//! cannot leave partial routing. Redelivered rows are acceptable: dedup
//! happens downstream, before events affect derived state.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use tracing::{debug, info};
use yap_listener_api::types::{
    EventFilter,
    tasks::{EventCreatedTask, TaskMessage},
};

use crate::{
    db::{
        client::DbClient,
        models::{JobModel, NewContractEvent},
    },
    poller::{CreationEvent, EventSink, error::PollerError},
    queue::{ListenerQueue, enqueue_task},
    router::error::RouterError,
    types::NormalizedEvent,
};

pub mod error;

// ----------------
// | Event Router |
// ----------------

/// Routes decoded events to job subscriptions and the work queue.
///
/// Shared across every chain's poller; it holds no per-chain state.
#[derive(Clone)]
pub struct EventRouter {
    /// The database client
    db: DbClient,
    /// The work queue
    queue: ListenerQueue,
}

impl EventRouter {
    /// Create a new event router
    pub fn new(db: DbClient, queue: ListenerQueue) -> Self {
        Self { db, queue }
    }

    /// Route a batch of normalized events to the active jobs subscribed to
    /// their contracts.
    ///
    /// Zero matches is not an error: an event no active job wants is simply
    /// dropped.
    pub async fn route_events(
        &self,
        chain_id: u64,
        events: Vec<NormalizedEvent>,
    ) -> Result<(), RouterError> {
        let mut conn = self.db.get_db_conn().await?;

        // Batches routinely repeat contracts, so cache the job lookup per
        // contract across the batch
        let mut jobs_by_contract: HashMap<String, Vec<JobModel>> = HashMap::new();
        let mut rows = Vec::new();

        for event in &events {
            let contract = format!("{:#x}", event.contract);
            if !jobs_by_contract.contains_key(&contract) {
                let jobs =
                    self.db.get_active_jobs_for_contract(chain_id, &contract, &mut conn).await?;
                jobs_by_contract.insert(contract.clone(), jobs);
            }

            let jobs = &jobs_by_contract[&contract];
            for job in matching_jobs(jobs, &event.name) {
                rows.push(NewContractEvent::from_normalized(&job.id, chain_id, event));
            }
        }

        if rows.is_empty() {
            debug!("chain {chain_id}: no active job matched {} events", events.len());
            return Ok(());
        }

        let n_rows = rows.len();
        self.db.insert_contract_events(rows, &mut conn).await?;
        debug!("chain {chain_id}: routed {} events into {n_rows} job rows", events.len());

        Ok(())
    }

    /// Forward an escrow creation event to the work queue for upstream
    /// notification
    pub async fn route_creation(
        &self,
        chain_id: u64,
        creation: CreationEvent,
    ) -> Result<(), RouterError> {
        let fields = creation.fields;
        info!(
            "chain {chain_id}: escrow creation for job {} (domain {}) at block {}",
            fields.job_id, fields.domain_id, creation.block_number
        );

        let task = TaskMessage::EventCreated(EventCreatedTask {
            job_id: fields.job_id,
            domain_id: fields.domain_id,
            creator: fields.creator,
            asset: fields.asset,
            budget: fields.budget,
            fee: fields.fee,
            chain_id,
            transaction_hash: creation.transaction_hash,
            block_number: creation.block_number,
        });

        enqueue_task(&self.queue, task, Duration::ZERO).await?;
        Ok(())
    }
}

/// The active jobs whose event filter matches the given event name
fn matching_jobs<'a>(jobs: &'a [JobModel], event_name: &str) -> Vec<&'a JobModel> {
    jobs.iter()
        .filter(|job| EventFilter::from_names(&job.events).matches(event_name))
        .collect()
}

// -----------------------------------
// | Event Sink Trait Implementation |
// -----------------------------------

#[async_trait]
impl EventSink for EventRouter {
    async fn handle_contract_events(
        &self,
        chain_id: u64,
        events: Vec<NormalizedEvent>,
    ) -> Result<(), PollerError> {
        self.route_events(chain_id, events).await.map_err(PollerError::sink)
    }

    async fn handle_creation_event(
        &self,
        chain_id: u64,
        event: CreationEvent,
    ) -> Result<(), PollerError> {
        self.route_creation(chain_id, event).await.map_err(PollerError::sink)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;

    /// A job model subscribed to the given event names
    fn job(id: &str, events: &[&str]) -> JobModel {
        JobModel {
            id: id.to_string(),
            contract_address: "0x00".to_string(),
            chain_id: 8453,
            events: events.iter().map(|s| s.to_string()).collect(),
            event_addresses: None,
            abi: json!([]),
            ends_at: None,
            created_at: Utc::now(),
            is_active: true,
        }
    }

    /// Named filters match their members; empty filters match everything
    #[test]
    fn test_matching_jobs() {
        let jobs = vec![job("j1", &["Transfer"]), job("j2", &[]), job("j3", &["Approval"])];

        let matched: Vec<&str> =
            matching_jobs(&jobs, "Transfer").iter().map(|j| j.id.as_str()).collect();
        assert_eq!(matched, vec!["j1", "j2"]);

        // An event no job subscribes to matches only the all-events job
        let matched: Vec<&str> =
            matching_jobs(&jobs, "Burn").iter().map(|j| j.id.as_str()).collect();
        assert_eq!(matched, vec!["j2"]);
    }
}
