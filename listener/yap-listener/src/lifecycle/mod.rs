//! The job lifecycle manager
//!
//! Owns the subscribe/unsubscribe flows and the set of running chain
//! pollers. Subscriptions are persisted before any poller state changes, so
//! a crash between the two leaves the database authoritative and the
//! poller set is rebuilt from it at startup.

pub mod error;

use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
    time::{interval, sleep},
};
use tracing::{error, info, warn};
use yap_listener_api::types::{
    EventFilter,
    http::{SubscribeJobRequest, SubscribeJobResponse},
    tasks::{StopJobTask, TaskMessage, UpdateLeaderboardTask},
};

use crate::{
    abi::AbiDescriber,
    alert::AlertManager,
    db::{
        client::DbClient,
        error::DbError,
        models::{ContractListenerModel, JobModel, NewJob},
    },
    lifecycle::error::LifecycleError,
    poller::{
        ChainPoller, ContractSubscription, CursorStore, EventSink, PollerHandle, PollerState,
        SubscriptionKind, error::PollerError,
    },
    queue::{ListenerQueue, enqueue_task},
    registry::ChainRegistry,
    router::EventRouter,
    transport::{ChainTransport, http::HttpTransport},
    worker::{JobControl, error::WorkerError},
};

// -------------
// | Constants |
// -------------

/// The interval between health check sweeps over the running pollers
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// The age of a poller's last successful poll above which it is reported
/// stale
const STALE_POLL_THRESHOLD: Duration = Duration::from_secs(120);

/// The interval at which a time-boxed job's leaderboard is recomputed, in
/// seconds
const LEADERBOARD_INTERVAL_SECS: u64 = 300;

// ---------------
// | Store Trait |
// ---------------

/// The persistence surface the lifecycle manager mutates.
///
/// Split into a trait so the subscription flows are testable with fakes, the
/// same way the pollers abstract their cursor storage.
#[async_trait]
pub trait ListenerStore: Send + Sync {
    /// Get a job record by ID
    async fn get_job(&self, job_id: &str) -> Result<Option<JobModel>, DbError>;

    /// Insert a job record
    async fn insert_job(&self, job: NewJob) -> Result<(), DbError>;

    /// Deactivate a job, recording its distinct counterparty addresses
    async fn deactivate_job(
        &self,
        job_id: &str,
        event_addresses: Vec<String>,
    ) -> Result<(), DbError>;

    /// Get all active job records
    async fn get_active_jobs(&self) -> Result<Vec<JobModel>, DbError>;

    /// Get the active jobs subscribed to a (chain, contract) pair
    async fn get_active_jobs_for_contract(
        &self,
        chain_id: u64,
        contract_address: &str,
    ) -> Result<Vec<JobModel>, DbError>;

    /// Get the distinct counterparty addresses observed across a job's events
    async fn get_distinct_job_addresses(&self, job_id: &str) -> Result<Vec<String>, DbError>;

    /// Get a contract listener record by (chain, contract)
    async fn get_contract_listener(
        &self,
        chain_id: u64,
        contract_address: &str,
    ) -> Result<Option<ContractListenerModel>, DbError>;

    /// Upsert a contract listener record
    async fn upsert_contract_listener(
        &self,
        listener: ContractListenerModel,
    ) -> Result<(), DbError>;

    /// Delete a contract listener record
    async fn delete_contract_listener(
        &self,
        chain_id: u64,
        contract_address: &str,
    ) -> Result<(), DbError>;

    /// Get all active contract listener records
    async fn get_active_contract_listeners(&self) -> Result<Vec<ContractListenerModel>, DbError>;

    /// Delete a chain's persisted cursor
    async fn delete_cursor(&self, chain_id: u64) -> Result<(), DbError>;
}

// ---------------------
// | Lifecycle Manager |
// ---------------------

/// The job lifecycle manager
pub struct ListenerManager {
    /// The static per-chain configuration
    registry: ChainRegistry,
    /// The persisted job and listener state
    store: Arc<dyn ListenerStore>,
    /// The cursor storage handed to spawned pollers
    cursors: Arc<dyn CursorStore>,
    /// The task queue jobs' scheduled work is enqueued onto
    queue: ListenerQueue,
    /// The event sink shared by all chain pollers
    sink: Arc<dyn EventSink>,
    /// The running chain pollers, keyed by chain ID
    pollers: RwLock<HashMap<u64, PollerHandle>>,
    /// The in-process timers for jobs with a scheduled end, keyed by job ID
    stop_timers: Mutex<HashMap<String, JoinHandle<()>>>,
    /// Serializes subscription mutations.
    ///
    /// The listener-row merge is a read-modify-write across several
    /// statements; interleaved subscribes to one contract would drop each
    /// other's jobs from the aggregated row.
    subscriptions: Mutex<()>,
    /// The alert manager for operator-facing notifications
    alerts: Arc<AlertManager>,
}

impl ListenerManager {
    /// Create a new lifecycle manager over the listener database
    pub fn new(
        registry: ChainRegistry,
        db: DbClient,
        queue: ListenerQueue,
        alerts: Arc<AlertManager>,
    ) -> Arc<Self> {
        let sink: Arc<dyn EventSink> = Arc::new(EventRouter::new(db.clone(), queue.clone()));
        let store: Arc<dyn ListenerStore> = Arc::new(db.clone());
        let cursors: Arc<dyn CursorStore> = Arc::new(db);

        Self::from_parts(registry, store, cursors, queue, sink, alerts)
    }

    /// Assemble a manager from its component parts
    fn from_parts(
        registry: ChainRegistry,
        store: Arc<dyn ListenerStore>,
        cursors: Arc<dyn CursorStore>,
        queue: ListenerQueue,
        sink: Arc<dyn EventSink>,
        alerts: Arc<AlertManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            store,
            cursors,
            queue,
            sink,
            pollers: RwLock::new(HashMap::new()),
            stop_timers: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(()),
            alerts,
        })
    }

    // -------------
    // | Subscribe |
    // -------------

    /// Subscribe a job to a contract's events.
    ///
    /// Jobs are create-once: a request reusing an existing job ID is
    /// rejected rather than merged.
    pub async fn subscribe(
        &self,
        req: SubscribeJobRequest,
    ) -> Result<SubscribeJobResponse, LifecycleError> {
        let config = self.registry.get(req.chain_id)?;
        let contract = Address::from_str(&req.contract_address)
            .map_err(|_| LifecycleError::validation("malformed contract address"))?;
        let contract_str = format!("{contract:#x}");

        let describer = AbiDescriber::from_json(&req.abi)?;
        describer.validate_events(&req.events)?;
        let filter = EventFilter::from_names(&req.events);

        if let Some(ends_at) = req.ends_at {
            if ends_at <= Utc::now() {
                return Err(LifecycleError::validation("endsAt is already in the past"));
            }
        }

        let _guard = self.subscriptions.lock().await;

        // Persist the job and the merged listener row before touching any
        // poller state
        if self.store.get_job(&req.job_id).await?.is_some() {
            return Err(LifecycleError::validation(format!(
                "job {} already exists",
                req.job_id
            )));
        }

        self.store
            .insert_job(NewJob {
                id: req.job_id.clone(),
                contract_address: contract_str.clone(),
                chain_id: req.chain_id as i64,
                events: req.events.clone(),
                abi: req.abi.clone(),
                ends_at: req.ends_at,
                created_at: Utc::now(),
                is_active: true,
            })
            .await?;

        let existing = self.store.get_contract_listener(req.chain_id, &contract_str).await?;
        let (subscribed_jobs, aggregated, start_time) = match existing {
            Some(listener) => {
                let mut jobs = listener.subscribed_jobs;
                if !jobs.contains(&req.job_id) {
                    jobs.push(req.job_id.clone());
                }
                let aggregated =
                    EventFilter::from_stored(&listener.events_being_listened).union(&filter);
                (jobs, aggregated, listener.start_time)
            },
            None => (vec![req.job_id.clone()], filter, Utc::now()),
        };

        self.store
            .upsert_contract_listener(ContractListenerModel {
                chain_id: req.chain_id as i64,
                contract_address: contract_str.clone(),
                abi: req.abi.clone(),
                subscribed_jobs,
                events_being_listened: aggregated.to_stored(),
                start_time,
                is_active: true,
            })
            .await?;

        // Apply the new subscription to the chain's poller, spawning one if
        // the chain is not yet being polled
        self.ensure_poller(req.chain_id).await?;
        self.track(
            req.chain_id,
            ContractSubscription {
                address: contract,
                describer,
                filter: aggregated,
                kind: SubscriptionKind::Job,
            },
        )
        .await?;

        if let Some(ends_at) = req.ends_at {
            self.schedule_job_stop(req.job_id.clone(), ends_at).await;
            enqueue_task(
                &self.queue,
                TaskMessage::UpdateLeaderboard(UpdateLeaderboardTask {
                    job_id: req.job_id.clone(),
                    interval_secs: LEADERBOARD_INTERVAL_SECS,
                }),
                Duration::from_secs(LEADERBOARD_INTERVAL_SECS),
            )
            .await?;
        }

        info!(
            "subscribed job {} to {contract_str} on chain {} (poll interval {}ms)",
            req.job_id, req.chain_id, config.poll_interval_ms
        );

        Ok(SubscribeJobResponse { job_id: req.job_id, contract_address: contract_str })
    }

    // ---------------
    // | Unsubscribe |
    // ---------------

    /// Unsubscribe a job, tearing down whatever listener state it was the
    /// last user of.
    ///
    /// Returns false only if no job with the given ID exists; stopping an
    /// already-inactive job is a no-op.
    pub async fn unsubscribe(&self, job_id: &str) -> Result<bool, LifecycleError> {
        let _guard = self.subscriptions.lock().await;

        let Some(job) = self.store.get_job(job_id).await? else {
            return Ok(false);
        };
        if !job.is_active {
            return Ok(true);
        }

        let contract_str = job.contract_address.clone();
        let chain_id = job.chain_id as u64;

        // Snapshot the job's distinct counterparties before deactivating it,
        // excluding the contract itself and the zero address
        let zero = format!("{:#x}", Address::ZERO);
        let mut addresses = self.store.get_distinct_job_addresses(job_id).await?;
        addresses.retain(|addr| *addr != contract_str && *addr != zero);
        self.store.deactivate_job(job_id, addresses).await?;

        let survivors = self.store.get_active_jobs_for_contract(chain_id, &contract_str).await?;
        let contract = Address::from_str(&contract_str)
            .map_err(|_| LifecycleError::validation("malformed contract address"))?;

        if survivors.is_empty() {
            // Last subscriber: remove the listener row and stop tracking the
            // contract
            self.store.delete_contract_listener(chain_id, &contract_str).await?;
            self.untrack(chain_id, contract).await?;
        } else {
            // Narrow the aggregated filter to the surviving jobs' union
            let filters: Vec<EventFilter> =
                survivors.iter().map(|j| EventFilter::from_names(&j.events)).collect();
            let aggregated = EventFilter::union_all(&filters);
            let survivor_ids = survivors.iter().map(|j| j.id.clone()).collect();

            if let Some(listener) =
                self.store.get_contract_listener(chain_id, &contract_str).await?
            {
                self.store
                    .upsert_contract_listener(ContractListenerModel {
                        subscribed_jobs: survivor_ids,
                        events_being_listened: aggregated.to_stored(),
                        ..listener
                    })
                    .await?;
            }

            let pollers = self.pollers.read().await;
            if let Some(handle) = pollers.get(&chain_id) {
                handle.set_contract_filter(contract, aggregated).await?;
            }
        }

        if let Some(timer) = self.stop_timers.lock().await.remove(job_id) {
            timer.abort();
        }

        info!("unsubscribed job {job_id} from {contract_str} on chain {chain_id}");
        Ok(true)
    }

    // -----------
    // | Startup |
    // -----------

    /// Rebuild the poller set from persisted state.
    ///
    /// Spawns pollers for all escrow-configured chains, re-tracks every
    /// active contract listener, and rehydrates scheduled-stop timers from
    /// active jobs' end times. Jobs whose window closed while the service
    /// was down are stopped through the queue immediately. Listeners left
    /// behind with no active jobs are torn down instead of rehydrated, and
    /// chains left with nothing to poll release their cursors.
    pub async fn initialize_from_persisted_state(&self) -> Result<(), LifecycleError> {
        let _guard = self.subscriptions.lock().await;

        let escrow_chains: Vec<u64> = self.registry.escrow_chains().map(|c| c.chain_id).collect();
        let mut live_chains: HashSet<u64> = escrow_chains.iter().copied().collect();
        for chain_id in escrow_chains {
            self.ensure_poller(chain_id).await?;
        }

        let listeners = self.store.get_active_contract_listeners().await?;
        let jobs = self.store.get_active_jobs().await?;

        let mut restored = 0;
        let mut orphaned_chains = HashSet::new();
        for listener in listeners {
            let chain_id = listener.chain_id as u64;
            if self.registry.get(chain_id).is_err() {
                warn!(
                    "skipping persisted listener for {} on unconfigured chain {chain_id}",
                    listener.contract_address
                );
                continue;
            }

            // Unsubscribe deactivates the job and removes the listener row in
            // separate writes; a crash between them leaves a listener with no
            // jobs, which is removed here rather than rehydrated
            let has_active_jobs = jobs.iter().any(|job| {
                job.chain_id == listener.chain_id
                    && job.contract_address == listener.contract_address
            });
            if !has_active_jobs {
                warn!(
                    "removing persisted listener for {} on chain {chain_id}: no active jobs \
                     remain",
                    listener.contract_address
                );
                self.store.delete_contract_listener(chain_id, &listener.contract_address).await?;
                orphaned_chains.insert(chain_id);
                continue;
            }

            let Ok(contract) = Address::from_str(&listener.contract_address) else {
                warn!("skipping persisted listener with bad address {}", listener.contract_address);
                continue;
            };
            let describer = match AbiDescriber::from_json(&listener.abi) {
                Ok(describer) => describer,
                Err(e) => {
                    warn!(
                        "skipping persisted listener for {}: unparseable abi: {e}",
                        listener.contract_address
                    );
                    continue;
                },
            };
            let filter = EventFilter::from_stored(&listener.events_being_listened);

            self.ensure_poller(chain_id).await?;
            self.track(
                chain_id,
                ContractSubscription {
                    address: contract,
                    describer,
                    filter,
                    kind: SubscriptionKind::Job,
                },
            )
            .await?;
            live_chains.insert(chain_id);
            restored += 1;
        }

        // Chains that lost their last listener have no cursor to resume from
        for chain_id in orphaned_chains.difference(&live_chains) {
            self.store.delete_cursor(*chain_id).await?;
        }

        let now = Utc::now();
        for job in jobs {
            if let Some(ends_at) = job.ends_at {
                if ends_at <= now {
                    enqueue_task(
                        &self.queue,
                        TaskMessage::StopJob(StopJobTask { job_id: job.id.clone() }),
                        Duration::ZERO,
                    )
                    .await?;
                } else {
                    self.schedule_job_stop(job.id.clone(), ends_at).await;
                }
            }
        }

        info!("restored {restored} contract listeners from persisted state");
        Ok(())
    }

    // ------------
    // | Shutdown |
    // ------------

    /// Stop all pollers and cancel all scheduled-stop timers
    pub async fn stop_all(&self) {
        for (_, timer) in self.stop_timers.lock().await.drain() {
            timer.abort();
        }

        let handles: Vec<(u64, PollerHandle)> = self.pollers.write().await.drain().collect();
        for (chain_id, handle) in handles {
            if let Err(e) = handle.stop().await {
                warn!("chain {chain_id}: error stopping poller: {e}");
            }
        }

        info!("all chain pollers stopped");
    }

    // ----------------
    // | Health Check |
    // ----------------

    /// Periodically log every poller's status and alert on stopped, stale,
    /// or lagging chains
    pub async fn run_health_loop(self: Arc<Self>) {
        let mut ticker = interval(HEALTH_CHECK_INTERVAL);
        loop {
            ticker.tick().await;
            let pollers = self.pollers.read().await;
            for (chain_id, handle) in pollers.iter() {
                let status = handle.status().await;
                let poll_age = status.last_success.map(|t| t.elapsed());
                info!(
                    "chain {chain_id}: state {:?}, cursor {:?}, lag {}, last poll {poll_age:?} ago, errors {}, backup {}",
                    status.state,
                    status.last_processed_block,
                    status.lag,
                    status.consecutive_errors,
                    status.on_backup
                );

                if status.state == PollerState::Stopped {
                    self.alerts
                        .alert(
                            &format!("chain-{chain_id}-stopped"),
                            &format!(
                                "chain {chain_id} listener stopped after repeated errors and requires a restart"
                            ),
                        )
                        .await;
                    continue;
                }

                if poll_age.is_some_and(|age| age > STALE_POLL_THRESHOLD) {
                    self.alerts
                        .alert(
                            &format!("chain-{chain_id}-stale"),
                            &format!("chain {chain_id} has not polled successfully in {poll_age:?}"),
                        )
                        .await;
                }

                let threshold =
                    self.registry.get(*chain_id).map(|c| c.alert_threshold).unwrap_or(u64::MAX);
                if status.lag > threshold {
                    self.alerts
                        .alert(
                            &format!("chain-{chain_id}-lag"),
                            &format!(
                                "chain {chain_id} is {} blocks behind head (threshold {threshold})",
                                status.lag
                            ),
                        )
                        .await;
                }
            }
        }
    }

    // -----------
    // | Helpers |
    // -----------

    /// Spawn a poller for the chain if one is not already running.
    ///
    /// Chains with an escrow contract configured start tracking it
    /// immediately; the escrow subscription keeps the poller alive through
    /// job teardown.
    async fn ensure_poller(&self, chain_id: u64) -> Result<(), LifecycleError> {
        let mut pollers = self.pollers.write().await;
        if pollers.contains_key(&chain_id) {
            return Ok(());
        }

        let config = self.registry.get(chain_id)?;

        let mut contracts = Vec::new();
        if let Some(escrow) = &config.escrow {
            let describer = AbiDescriber::from_json(&escrow.abi)?;
            // A creation event name absent from the escrow ABI would listen
            // for nothing; reject the config instead
            describer.validate_events(std::slice::from_ref(&escrow.creation_event))?;
            contracts.push(ContractSubscription {
                address: escrow.address,
                describer,
                filter: EventFilter::from_names(std::slice::from_ref(&escrow.creation_event)),
                kind: SubscriptionKind::Escrow { creation_event: escrow.creation_event.clone() },
            });
        }

        let primary: Arc<dyn ChainTransport> = Arc::new(HttpTransport::new(&config.rpc_url)?);
        let backup = match &config.backup_rpc_url {
            Some(url) => Some(Arc::new(HttpTransport::new(url)?) as Arc<dyn ChainTransport>),
            None => None,
        };

        let handle = ChainPoller::spawn(
            chain_id,
            Duration::from_millis(config.poll_interval_ms),
            primary,
            backup,
            contracts,
            self.sink.clone(),
            self.cursors.clone(),
        );
        pollers.insert(chain_id, handle);

        info!("started poller for chain {chain_id}");
        Ok(())
    }

    /// Apply a contract subscription to the chain's running poller
    async fn track(
        &self,
        chain_id: u64,
        subscription: ContractSubscription,
    ) -> Result<(), LifecycleError> {
        let pollers = self.pollers.read().await;
        let handle = pollers.get(&chain_id).ok_or(PollerError::NotRunning(chain_id))?;
        handle.track_contract(subscription).await?;

        Ok(())
    }

    /// Stop tracking a contract, stopping the chain's poller entirely and
    /// clearing its cursor when nothing tracked remains
    async fn untrack(&self, chain_id: u64, contract: Address) -> Result<(), LifecycleError> {
        let remaining = {
            let pollers = self.pollers.read().await;
            match pollers.get(&chain_id) {
                Some(handle) => Some(handle.untrack_contract(contract).await?),
                None => None,
            }
        };

        if remaining == Some(0) {
            let handle = self.pollers.write().await.remove(&chain_id);
            if let Some(handle) = handle {
                handle.stop().await?;
            }

            self.store.delete_cursor(chain_id).await?;
            info!("chain {chain_id}: poller stopped, no tracked contracts remain");
        }

        Ok(())
    }

    /// Schedule an in-process timer that enqueues a stop-job task when the
    /// job's activity window closes
    async fn schedule_job_stop(&self, job_id: String, ends_at: DateTime<Utc>) {
        let delay = stop_delay(ends_at, Utc::now());
        let queue = self.queue.clone();
        let id = job_id.clone();
        let timer = tokio::spawn(async move {
            sleep(delay).await;
            let task = TaskMessage::StopJob(StopJobTask { job_id: id.clone() });
            if let Err(e) = enqueue_task(&queue, task, Duration::ZERO).await {
                error!("failed to enqueue scheduled stop for job {id}: {e}");
            }
        });

        if let Some(previous) = self.stop_timers.lock().await.insert(job_id, timer) {
            previous.abort();
        }
    }
}

/// The delay until a job's scheduled end, zero if it already passed
fn stop_delay(ends_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (ends_at - now).to_std().unwrap_or(Duration::ZERO)
}

// ------------------------------------
// | Job Control Trait Implementation |
// ------------------------------------

#[async_trait]
impl JobControl for ListenerManager {
    async fn stop_job(&self, job_id: &str) -> Result<bool, WorkerError> {
        self.unsubscribe(job_id).await.map_err(WorkerError::job_control)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use serde_json::json;

    use super::*;
    use crate::{
        alert::LogAlertSink,
        poller::CreationEvent,
        queue::{DynTaskQueue, mock_task_queue::MockTaskQueue},
        registry::{ChainConfig, EscrowConfig},
        types::NormalizedEvent,
    };

    /// The chain ID used across tests
    const CHAIN_ID: u64 = 8453;

    /// A minimal ABI with Transfer and Approval events
    fn test_abi() -> serde_json::Value {
        json!([
            {
                "type": "event",
                "name": "Transfer",
                "inputs": [
                    {"name": "from", "type": "address", "indexed": true},
                    {"name": "to", "type": "address", "indexed": true},
                    {"name": "value", "type": "uint256", "indexed": false}
                ],
                "anonymous": false
            },
            {
                "type": "event",
                "name": "Approval",
                "inputs": [
                    {"name": "owner", "type": "address", "indexed": true},
                    {"name": "spender", "type": "address", "indexed": true},
                    {"name": "value", "type": "uint256", "indexed": false}
                ],
                "anonymous": false
            }
        ])
    }

    /// The lowercase hex form of the test contract address
    fn test_contract() -> String {
        format!("{:#x}", Address::from([1u8; 20]))
    }

    /// An in-memory listener store
    #[derive(Default)]
    struct FakeStore {
        /// The job records, keyed by ID
        jobs: Mutex<HashMap<String, JobModel>>,
        /// The listener records, keyed by (chain, contract)
        listeners: Mutex<HashMap<(i64, String), ContractListenerModel>>,
        /// The chains whose cursors were deleted
        deleted_cursors: Mutex<Vec<u64>>,
    }

    impl FakeStore {
        /// Seed a job record
        async fn seed_job(&self, id: &str, events: Vec<String>, is_active: bool) {
            let job = JobModel {
                id: id.to_string(),
                contract_address: test_contract(),
                chain_id: CHAIN_ID as i64,
                events,
                event_addresses: None,
                abi: test_abi(),
                ends_at: None,
                created_at: Utc::now(),
                is_active,
            };
            self.jobs.lock().await.insert(id.to_string(), job);
        }

        /// Seed a listener record for the test contract
        async fn seed_listener(&self, subscribed_jobs: Vec<String>, events: Vec<String>) {
            let listener = ContractListenerModel {
                chain_id: CHAIN_ID as i64,
                contract_address: test_contract(),
                abi: test_abi(),
                subscribed_jobs,
                events_being_listened: events,
                start_time: Utc::now(),
                is_active: true,
            };
            self.listeners.lock().await.insert((CHAIN_ID as i64, test_contract()), listener);
        }
    }

    #[async_trait]
    impl ListenerStore for FakeStore {
        async fn get_job(&self, job_id: &str) -> Result<Option<JobModel>, DbError> {
            Ok(self.jobs.lock().await.get(job_id).cloned())
        }

        async fn insert_job(&self, job: NewJob) -> Result<(), DbError> {
            let model = JobModel {
                id: job.id.clone(),
                contract_address: job.contract_address,
                chain_id: job.chain_id,
                events: job.events,
                event_addresses: None,
                abi: job.abi,
                ends_at: job.ends_at,
                created_at: job.created_at,
                is_active: job.is_active,
            };
            self.jobs.lock().await.insert(job.id, model);
            Ok(())
        }

        async fn deactivate_job(
            &self,
            job_id: &str,
            event_addresses: Vec<String>,
        ) -> Result<(), DbError> {
            if let Some(job) = self.jobs.lock().await.get_mut(job_id) {
                job.is_active = false;
                job.event_addresses = Some(event_addresses);
            }
            Ok(())
        }

        async fn get_active_jobs(&self) -> Result<Vec<JobModel>, DbError> {
            Ok(self.jobs.lock().await.values().filter(|j| j.is_active).cloned().collect())
        }

        async fn get_active_jobs_for_contract(
            &self,
            chain_id: u64,
            contract_address: &str,
        ) -> Result<Vec<JobModel>, DbError> {
            Ok(self
                .jobs
                .lock()
                .await
                .values()
                .filter(|j| {
                    j.is_active
                        && j.chain_id == chain_id as i64
                        && j.contract_address == contract_address
                })
                .cloned()
                .collect())
        }

        async fn get_distinct_job_addresses(&self, _job_id: &str) -> Result<Vec<String>, DbError> {
            Ok(vec![])
        }

        async fn get_contract_listener(
            &self,
            chain_id: u64,
            contract_address: &str,
        ) -> Result<Option<ContractListenerModel>, DbError> {
            let key = (chain_id as i64, contract_address.to_string());
            Ok(self.listeners.lock().await.get(&key).cloned())
        }

        async fn upsert_contract_listener(
            &self,
            listener: ContractListenerModel,
        ) -> Result<(), DbError> {
            let key = (listener.chain_id, listener.contract_address.clone());
            self.listeners.lock().await.insert(key, listener);
            Ok(())
        }

        async fn delete_contract_listener(
            &self,
            chain_id: u64,
            contract_address: &str,
        ) -> Result<(), DbError> {
            let key = (chain_id as i64, contract_address.to_string());
            self.listeners.lock().await.remove(&key);
            Ok(())
        }

        async fn get_active_contract_listeners(
            &self,
        ) -> Result<Vec<ContractListenerModel>, DbError> {
            Ok(self.listeners.lock().await.values().filter(|l| l.is_active).cloned().collect())
        }

        async fn delete_cursor(&self, chain_id: u64) -> Result<(), DbError> {
            self.deleted_cursors.lock().await.push(chain_id);
            Ok(())
        }
    }

    /// An event sink that drops everything
    struct NullSink;

    #[async_trait]
    impl EventSink for NullSink {
        async fn handle_contract_events(
            &self,
            _chain_id: u64,
            _events: Vec<NormalizedEvent>,
        ) -> Result<(), PollerError> {
            Ok(())
        }

        async fn handle_creation_event(
            &self,
            _chain_id: u64,
            _event: CreationEvent,
        ) -> Result<(), PollerError> {
            Ok(())
        }
    }

    /// A cursor store that persists nothing
    struct NullCursors;

    #[async_trait]
    impl CursorStore for NullCursors {
        async fn load_cursor(&self, _chain_id: u64) -> Result<Option<u64>, PollerError> {
            Ok(None)
        }

        async fn store_cursor(&self, _chain_id: u64, _block: u64) -> Result<(), PollerError> {
            Ok(())
        }
    }

    /// Build a registry configuring only the test chain
    fn test_registry(escrow: Option<EscrowConfig>) -> ChainRegistry {
        ChainRegistry::new(vec![ChainConfig {
            chain_id: CHAIN_ID,
            rpc_url: "http://localhost:8545".to_string(),
            backup_rpc_url: None,
            poll_interval_ms: 60_000,
            alert_threshold: 50,
            escrow,
        }])
    }

    /// Build a manager over the given fake store
    fn test_manager(store: Arc<FakeStore>, registry: ChainRegistry) -> Arc<ListenerManager> {
        let queue = DynTaskQueue::new(MockTaskQueue::default());
        let alerts = Arc::new(AlertManager::new(Arc::new(LogAlertSink)));

        ListenerManager::from_parts(
            registry,
            store,
            Arc::new(NullCursors),
            queue,
            Arc::new(NullSink),
            alerts,
        )
    }

    /// A subscription request for the test contract
    fn subscribe_request(job_id: &str, events: Vec<String>) -> SubscribeJobRequest {
        SubscribeJobRequest {
            job_id: job_id.to_string(),
            contract_address: test_contract(),
            chain_id: CHAIN_ID,
            abi: test_abi(),
            events,
            ends_at: None,
        }
    }

    /// A past end time schedules an immediate stop
    #[test]
    fn test_stop_delay_past_due() {
        let now = Utc::now();
        assert_eq!(stop_delay(now - TimeDelta::seconds(10), now), Duration::ZERO);
    }

    /// A future end time schedules the remaining window
    #[test]
    fn test_stop_delay_future() {
        let now = Utc::now();
        let delay = stop_delay(now + TimeDelta::seconds(90), now);
        assert_eq!(delay, Duration::from_secs(90));
    }

    /// Unsubscribing the last job deletes the listener row and deactivates
    /// the job
    #[tokio::test]
    async fn test_unsubscribe_teardown_last_job() {
        let store = Arc::new(FakeStore::default());
        store.seed_job("job-1", vec!["Transfer".to_string()], true).await;
        store.seed_listener(vec!["job-1".to_string()], vec!["Transfer".to_string()]).await;

        let manager = test_manager(store.clone(), test_registry(None));
        assert!(manager.unsubscribe("job-1").await.unwrap());

        assert!(!store.jobs.lock().await.get("job-1").unwrap().is_active);
        assert!(store.listeners.lock().await.is_empty());

        // Unknown jobs report false; repeated stops are no-ops
        assert!(!manager.unsubscribe("job-2").await.unwrap());
        assert!(manager.unsubscribe("job-1").await.unwrap());
    }

    /// Unsubscribing one of several jobs narrows the aggregated filter to
    /// the survivors' union
    #[tokio::test]
    async fn test_unsubscribe_narrows_to_survivors() {
        let store = Arc::new(FakeStore::default());
        store.seed_job("job-1", vec!["Transfer".to_string()], true).await;
        store.seed_job("job-2", vec!["Approval".to_string()], true).await;
        store
            .seed_listener(
                vec!["job-1".to_string(), "job-2".to_string()],
                vec!["Approval".to_string(), "Transfer".to_string()],
            )
            .await;

        let manager = test_manager(store.clone(), test_registry(None));
        assert!(manager.unsubscribe("job-1").await.unwrap());

        let listeners = store.listeners.lock().await;
        let listener = listeners.get(&(CHAIN_ID as i64, test_contract())).unwrap();
        assert_eq!(listener.subscribed_jobs, vec!["job-2".to_string()]);
        assert_eq!(listener.events_being_listened, vec!["Approval".to_string()]);
    }

    /// Concurrent subscribes to one contract both land in the listener row
    #[tokio::test]
    async fn test_concurrent_subscribes_merge() {
        let store = Arc::new(FakeStore::default());
        let manager = test_manager(store.clone(), test_registry(None));

        let first = manager.subscribe(subscribe_request("job-1", vec!["Transfer".to_string()]));
        let second = manager.subscribe(subscribe_request("job-2", vec!["Approval".to_string()]));
        let (first, second) = tokio::join!(first, second);
        first.unwrap();
        second.unwrap();

        let listeners = store.listeners.lock().await;
        let listener = listeners.get(&(CHAIN_ID as i64, test_contract())).unwrap();
        let mut jobs = listener.subscribed_jobs.clone();
        jobs.sort();
        assert_eq!(jobs, vec!["job-1".to_string(), "job-2".to_string()]);
        assert_eq!(
            listener.events_being_listened,
            vec!["Approval".to_string(), "Transfer".to_string()]
        );
    }

    /// Startup removes listeners whose jobs were all deactivated and clears
    /// the orphaned chain's cursor
    #[tokio::test]
    async fn test_startup_reconciles_orphaned_listener() {
        let store = Arc::new(FakeStore::default());
        store.seed_job("job-1", vec!["Transfer".to_string()], false).await;
        store.seed_listener(vec!["job-1".to_string()], vec!["Transfer".to_string()]).await;

        let manager = test_manager(store.clone(), test_registry(None));
        manager.initialize_from_persisted_state().await.unwrap();

        assert!(store.listeners.lock().await.is_empty());
        assert_eq!(*store.deleted_cursors.lock().await, vec![CHAIN_ID]);
        assert!(manager.pollers.read().await.is_empty());
    }

    /// An escrow creation event absent from the escrow ABI is rejected at
    /// poller startup
    #[tokio::test]
    async fn test_escrow_creation_event_validated() {
        let escrow = EscrowConfig {
            address: Address::from([2u8; 20]),
            abi: test_abi(),
            creation_event: "ContentCreated".to_string(),
        };
        let manager = test_manager(Arc::new(FakeStore::default()), test_registry(Some(escrow)));

        let result = manager.ensure_poller(CHAIN_ID).await;
        assert!(matches!(result, Err(LifecycleError::Abi(..))));
        assert!(manager.pollers.read().await.is_empty());
    }
}
