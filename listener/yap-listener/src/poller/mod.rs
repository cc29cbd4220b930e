//! The per-chain poller: a timer-driven state machine that advances a chain's
//! cursor, fetches logs for the tracked contracts, decodes them, and hands
//! them to an event sink
//!
//! One poller runs per chain, as its own tokio task. Ticks are strictly
//! sequential: a tick never starts before the prior tick's fetch, dispatch,
//! and cursor persist complete. Tracked-contract mutations arrive over a
//! command channel and are applied between ticks, so a tick never observes a
//! half-updated contract map.
//!
//! The cursor write is the commit point: a crash after dispatch but before
//! the persist replays the range on restart, and downstream consumers
//! deduplicate.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use alloy_primitives::{Address, B256, TxHash};
use async_trait::async_trait;
use itertools::Itertools;
use tokio::{
    sync::{RwLock, mpsc, oneshot},
    task::JoinHandle,
    time::sleep_until,
};
use tracing::{error, info, warn};
use yap_listener_api::types::EventFilter;

use crate::{
    abi::{AbiDescriber, CreationFields},
    poller::error::PollerError,
    transport::ChainTransport,
    types::NormalizedEvent,
};

pub mod error;

// -------------
// | Constants |
// -------------

/// The number of consecutive tick failures after which a chain's poller
/// transitions to the terminal stopped state
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// The number of consecutive tick failures after which the poller swaps to
/// the backup RPC endpoint, if one is configured
const BACKUP_SWAP_THRESHOLD: u32 = 2;

/// The remaining lag above which the poller ticks again in catch-up mode
/// instead of waiting the full poll interval
const CATCH_UP_LAG: u64 = 10;

/// The lag beyond which a persisted cursor is considered stale at startup
/// and reseeded at head
const STALE_CURSOR_LAG: u64 = 50;

/// The ceiling on the catch-up tick delay
const CATCH_UP_DELAY: Duration = Duration::from_millis(500);

/// The command channel's buffer size
const COMMAND_CHANNEL_SIZE: usize = 32;

// ---------
// | Types |
// ---------

/// The role a tracked contract plays on its chain
#[derive(Clone, Debug)]
pub enum SubscriptionKind {
    /// A job-subscribed contract whose matching events are routed to jobs
    Job,
    /// The chain's escrow contract, watched for its creation event
    Escrow {
        /// The name of the creation event
        creation_event: String,
    },
}

/// One tracked contract on a chain: its ABI, the aggregated event filter
/// across subscribers, and its role
#[derive(Clone, Debug)]
pub struct ContractSubscription {
    /// The contract address
    pub address: Address,
    /// The contract's ABI describer
    pub describer: AbiDescriber,
    /// The aggregated event filter
    pub filter: EventFilter,
    /// The role the contract plays
    pub kind: SubscriptionKind,
}

/// A decoded escrow creation event, paired with its on-chain location
#[derive(Clone, Debug)]
pub struct CreationEvent {
    /// The decoded creation fields
    pub fields: CreationFields,
    /// The transaction the event was emitted in
    pub transaction_hash: TxHash,
    /// The block the event was emitted in
    pub block_number: u64,
}

/// The poller's lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollerState {
    /// The poller is initializing its cursor
    Starting,
    /// The poller is ticking normally
    Polling,
    /// The poller hit a transient error and is waiting out the interval
    Backoff,
    /// The poller hit the consecutive-error ceiling and requires manual
    /// restart
    Stopped,
}

/// A point-in-time snapshot of a poller's health, shared with the health
/// check loop
#[derive(Clone, Debug)]
pub struct PollerStatus {
    /// The lifecycle state
    pub state: PollerState,
    /// The last fully processed block
    pub last_processed_block: Option<u64>,
    /// When the last successful tick completed
    pub last_success: Option<Instant>,
    /// The remaining lag observed at the last successful tick
    pub lag: u64,
    /// The current consecutive-error count
    pub consecutive_errors: u32,
    /// Whether the poller is currently using the backup endpoint
    pub on_backup: bool,
}

impl PollerStatus {
    /// The initial status for a freshly spawned poller
    fn starting() -> Self {
        Self {
            state: PollerState::Starting,
            last_processed_block: None,
            last_success: None,
            lag: 0,
            consecutive_errors: 0,
            on_backup: false,
        }
    }
}

/// Commands applied to a poller between ticks
enum PollerCommand {
    /// Track a new contract
    TrackContract(ContractSubscription, oneshot::Sender<()>),
    /// Replace a tracked contract's aggregated event filter
    SetContractFilter(Address, EventFilter, oneshot::Sender<()>),
    /// Stop tracking a contract, replying with the number of contracts still
    /// tracked
    UntrackContract(Address, oneshot::Sender<usize>),
    /// Stop the poller
    Stop(oneshot::Sender<()>),
}

// -----------------
// | Poller Traits |
// -----------------

/// The sink decoded events are handed to before the cursor advances
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Handle the batch of normalized job-contract events decoded in one tick
    async fn handle_contract_events(
        &self,
        chain_id: u64,
        events: Vec<NormalizedEvent>,
    ) -> Result<(), PollerError>;

    /// Handle an escrow creation event
    async fn handle_creation_event(
        &self,
        chain_id: u64,
        event: CreationEvent,
    ) -> Result<(), PollerError>;
}

/// Durable storage for per-chain cursors
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load a chain's persisted cursor, if any
    async fn load_cursor(&self, chain_id: u64) -> Result<Option<u64>, PollerError>;

    /// Persist a chain's cursor
    async fn store_cursor(&self, chain_id: u64, block_number: u64) -> Result<(), PollerError>;
}

// -----------------
// | Poller Handle |
// -----------------

/// A handle to a running chain poller, used by the lifecycle manager to
/// mutate its tracked contracts and to stop it
pub struct PollerHandle {
    /// The chain the poller runs on
    chain_id: u64,
    /// The command channel into the poller task
    commands: mpsc::Sender<PollerCommand>,
    /// The shared status snapshot
    status: Arc<RwLock<PollerStatus>>,
    /// The poller's task handle
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// The chain this poller runs on
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// A snapshot of the poller's current status
    pub async fn status(&self) -> PollerStatus {
        self.status.read().await.clone()
    }

    /// Track a new contract, waiting for the poller to apply the change
    pub async fn track_contract(&self, subscription: ContractSubscription) -> Result<(), PollerError> {
        let (ack, done) = oneshot::channel();
        self.send(PollerCommand::TrackContract(subscription, ack)).await?;
        done.await.map_err(|_| PollerError::NotRunning(self.chain_id))
    }

    /// Replace a tracked contract's aggregated event filter
    pub async fn set_contract_filter(
        &self,
        address: Address,
        filter: EventFilter,
    ) -> Result<(), PollerError> {
        let (ack, done) = oneshot::channel();
        self.send(PollerCommand::SetContractFilter(address, filter, ack)).await?;
        done.await.map_err(|_| PollerError::NotRunning(self.chain_id))
    }

    /// Stop tracking a contract, returning the number of contracts still
    /// tracked on the chain
    pub async fn untrack_contract(&self, address: Address) -> Result<usize, PollerError> {
        let (ack, done) = oneshot::channel();
        self.send(PollerCommand::UntrackContract(address, ack)).await?;
        done.await.map_err(|_| PollerError::NotRunning(self.chain_id))
    }

    /// Stop the poller, waiting for its task to halt before returning so no
    /// tick can fire against torn-down state
    pub async fn stop(self) -> Result<(), PollerError> {
        let (ack, done) = oneshot::channel();
        self.send(PollerCommand::Stop(ack)).await?;
        done.await.map_err(|_| PollerError::NotRunning(self.chain_id))?;

        let _ = self.task.await;
        Ok(())
    }

    /// Send a command to the poller task
    async fn send(&self, command: PollerCommand) -> Result<(), PollerError> {
        self.commands.send(command).await.map_err(|_| PollerError::NotRunning(self.chain_id))
    }
}

// ----------------
// | Chain Poller |
// ----------------

/// The per-chain polling state machine
pub struct ChainPoller {
    /// The chain being polled
    chain_id: u64,
    /// The poll interval
    poll_interval: Duration,
    /// The primary chain transport
    primary: Arc<dyn ChainTransport>,
    /// The backup chain transport, if configured
    backup: Option<Arc<dyn ChainTransport>>,
    /// Whether the poller is currently using the backup endpoint
    on_backup: bool,
    /// The tracked contracts, keyed by address
    contracts: HashMap<Address, ContractSubscription>,
    /// The last fully processed block, if known
    cursor: Option<u64>,
    /// Whether the poller has yet to complete its first successful tick
    first_tick: bool,
    /// The consecutive tick failure count
    consecutive_errors: u32,
    /// The sink decoded events are dispatched to
    sink: Arc<dyn EventSink>,
    /// The durable cursor store
    cursor_store: Arc<dyn CursorStore>,
    /// The shared status snapshot
    status: Arc<RwLock<PollerStatus>>,
    /// The command channel out of the handle
    commands: mpsc::Receiver<PollerCommand>,
}

impl ChainPoller {
    /// Spawn a poller task for a chain, returning a handle to it
    pub fn spawn(
        chain_id: u64,
        poll_interval: Duration,
        primary: Arc<dyn ChainTransport>,
        backup: Option<Arc<dyn ChainTransport>>,
        contracts: Vec<ContractSubscription>,
        sink: Arc<dyn EventSink>,
        cursor_store: Arc<dyn CursorStore>,
    ) -> PollerHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let status = Arc::new(RwLock::new(PollerStatus::starting()));

        let poller = Self {
            chain_id,
            poll_interval,
            primary,
            backup,
            on_backup: false,
            contracts: contracts.into_iter().map(|c| (c.address, c)).collect(),
            cursor: None,
            first_tick: true,
            consecutive_errors: 0,
            sink,
            cursor_store,
            status: status.clone(),
            commands: command_rx,
        };

        let task = tokio::spawn(poller.run());

        PollerHandle { chain_id, commands: command_tx, status, task }
    }

    /// The main poll loop
    async fn run(mut self) {
        if let Err(e) = self.load_persisted_cursor().await {
            error!("chain {}: failed to load persisted cursor: {e}", self.chain_id);
            self.set_state(PollerState::Stopped).await;
            self.serve_stopped().await;
            return;
        }

        self.set_state(PollerState::Polling).await;
        info!("chain {}: poller started (cursor: {:?})", self.chain_id, self.cursor);

        loop {
            // Apply any pending contract mutations before the tick, so the
            // tick sees a consistent contract map
            while let Ok(command) = self.commands.try_recv() {
                if self.handle_command(command).await {
                    return;
                }
            }

            let delay = match self.tick().await {
                Ok(remaining_lag) => self.on_tick_success(remaining_lag).await,
                Err(e) => {
                    let stopped = self.on_tick_error(e).await;
                    if stopped {
                        self.serve_stopped().await;
                        return;
                    }
                    self.poll_interval
                },
            };

            if self.sleep_or_stop(delay).await {
                return;
            }
        }
    }

    /// Process one poll tick, returning the remaining lag after the batch
    async fn tick(&mut self) -> Result<u64, PollerError> {
        let head = self.transport().get_block_number().await?;

        let cursor = match self.cursor {
            // A cursor persisted long before this poller started is reseeded
            // at head instead of replaying the downtime
            Some(cursor) if self.first_tick && head.saturating_sub(cursor) > STALE_CURSOR_LAG => {
                warn!(
                    "chain {}: cursor {cursor} is {} blocks behind head, reseeding at {head}",
                    self.chain_id,
                    head - cursor
                );
                self.first_tick = false;
                self.advance_cursor(head).await?;
                return Ok(0);
            },
            Some(cursor) => cursor,
            // Fresh chain: seed the cursor at the current head rather than
            // replaying history
            None => {
                info!("chain {}: seeding cursor at head {head}", self.chain_id);
                self.first_tick = false;
                self.advance_cursor(head).await?;
                return Ok(0);
            },
        };
        self.first_tick = false;

        // No new blocks; leave the cursor untouched and reattempt next tick
        if head <= cursor {
            return Ok(0);
        }

        let lag = head - cursor;
        let batch_size = batch_size_for_lag(lag);
        let from_block = cursor + 1;
        let to_block = head.min(cursor + batch_size);

        let (addresses, topics) = self.filter_inputs();
        if addresses.is_empty() {
            // Nothing tracked; advance past the range without fetching
            self.advance_cursor(to_block).await?;
            return Ok(head - to_block);
        }

        let logs = self.transport().get_logs(&addresses, &topics, from_block, to_block).await?;

        let mut events = Vec::new();
        let mut creations = Vec::new();
        for log in logs {
            let address = log.address();
            let Some(subscription) = self.contracts.get(&address) else { continue };

            let location = log.block_number.zip(log.transaction_hash);
            let Some((block_number, transaction_hash)) = location else {
                warn!("chain {}: skipping pending log from {address:#x}", self.chain_id);
                continue;
            };

            // A single undecodable log is skipped, never failing the batch
            let decoded = match subscription
                .describer
                .decode_log(log.inner.data.topics(), log.inner.data.data.as_ref())
            {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!(
                        "chain {}: skipping undecodable log from {address:#x} at block \
                         {block_number}: {e}",
                        self.chain_id
                    );
                    continue;
                },
            };

            if !subscription.filter.matches(&decoded.name) {
                continue;
            }

            match &subscription.kind {
                SubscriptionKind::Job => {
                    events.push(decoded.normalize(address, block_number, transaction_hash));
                },
                SubscriptionKind::Escrow { creation_event } => {
                    if decoded.name != *creation_event {
                        continue;
                    }
                    match CreationFields::try_from(&decoded) {
                        Ok(fields) => creations.push(CreationEvent {
                            fields,
                            transaction_hash,
                            block_number,
                        }),
                        Err(e) => warn!(
                            "chain {}: skipping malformed creation event at block \
                             {block_number}: {e}",
                            self.chain_id
                        ),
                    }
                },
            }
        }

        // Dispatch before the cursor commit point; a sink failure leaves the
        // cursor behind so the range is reprocessed
        if !events.is_empty() {
            self.sink.handle_contract_events(self.chain_id, events).await?;
        }
        for creation in creations {
            self.sink.handle_creation_event(self.chain_id, creation).await?;
        }

        self.advance_cursor(to_block).await?;
        Ok(head - to_block)
    }

    /// Handle a successful tick, returning the delay before the next tick
    async fn on_tick_success(&mut self, remaining_lag: u64) -> Duration {
        if self.consecutive_errors > 0 {
            info!(
                "chain {}: poll recovered after {} consecutive errors",
                self.chain_id, self.consecutive_errors
            );
        }
        self.consecutive_errors = 0;

        if self.on_backup {
            info!("chain {}: reverting to primary RPC endpoint", self.chain_id);
            self.on_backup = false;
        }

        {
            let mut status = self.status.write().await;
            status.state = PollerState::Polling;
            status.last_success = Some(Instant::now());
            status.lag = remaining_lag;
            status.consecutive_errors = 0;
            status.on_backup = false;
        }

        // Large remaining lag triggers catch-up mode: tick again well before
        // the full interval elapses
        if remaining_lag > CATCH_UP_LAG {
            (self.poll_interval / 2).min(CATCH_UP_DELAY)
        } else {
            self.poll_interval
        }
    }

    /// Handle a failed tick, returning whether the poller has stopped
    async fn on_tick_error(&mut self, err: PollerError) -> bool {
        self.consecutive_errors += 1;
        let lag_hint = self.cursor.map_or_else(|| "unknown".to_string(), |c| c.to_string());
        warn!(
            "chain {}: poll tick failed ({}/{MAX_CONSECUTIVE_ERRORS}, cursor {lag_hint}): {err}",
            self.chain_id, self.consecutive_errors
        );

        if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
            error!(
                "chain {}: reached consecutive error ceiling, stopping poller; manual restart \
                 required",
                self.chain_id
            );
            self.set_state(PollerState::Stopped).await;
            return true;
        }

        // Alternate endpoints while failures continue, so a dead backup does
        // not strand the chain
        if self.consecutive_errors >= BACKUP_SWAP_THRESHOLD && self.backup.is_some() {
            self.on_backup = !self.on_backup;
            let endpoint = if self.on_backup { "backup" } else { "primary" };
            warn!("chain {}: swapping to {endpoint} RPC endpoint", self.chain_id);
        }

        {
            let mut status = self.status.write().await;
            status.state = PollerState::Backoff;
            status.consecutive_errors = self.consecutive_errors;
            status.on_backup = self.on_backup;
        }

        false
    }

    /// Sleep until the next tick, applying commands as they arrive.
    /// Returns true if the poller was stopped.
    async fn sleep_or_stop(&mut self, delay: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return false,
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command).await {
                            return true;
                        }
                    },
                    // All handles dropped; halt the loop
                    None => return true,
                },
            }
        }
    }

    /// Apply one command, returning true if the poller should halt
    async fn handle_command(&mut self, command: PollerCommand) -> bool {
        match command {
            PollerCommand::TrackContract(subscription, ack) => {
                self.contracts.insert(subscription.address, subscription);
                let _ = ack.send(());
                false
            },
            PollerCommand::SetContractFilter(address, filter, ack) => {
                if let Some(subscription) = self.contracts.get_mut(&address) {
                    subscription.filter = filter;
                }
                let _ = ack.send(());
                false
            },
            PollerCommand::UntrackContract(address, ack) => {
                self.contracts.remove(&address);
                let _ = ack.send(self.contracts.len());
                false
            },
            PollerCommand::Stop(ack) => {
                info!("chain {}: poller stopping", self.chain_id);
                self.set_state(PollerState::Stopped).await;
                let _ = ack.send(());
                true
            },
        }
    }

    /// Serve commands after entering the terminal stopped state, so the
    /// lifecycle manager can still tear the poller down cleanly
    async fn serve_stopped(&mut self) {
        while let Some(command) = self.commands.recv().await {
            if self.handle_command(command).await {
                return;
            }
        }
    }

    /// Load the persisted cursor into memory
    async fn load_persisted_cursor(&mut self) -> Result<(), PollerError> {
        self.cursor = self.cursor_store.load_cursor(self.chain_id).await?;
        self.status.write().await.last_processed_block = self.cursor;
        Ok(())
    }

    /// Persist and then apply a new cursor value
    async fn advance_cursor(&mut self, block_number: u64) -> Result<(), PollerError> {
        self.cursor_store.store_cursor(self.chain_id, block_number).await?;
        self.cursor = Some(block_number);
        self.status.write().await.last_processed_block = Some(block_number);
        Ok(())
    }

    /// The transport currently in use
    fn transport(&self) -> &Arc<dyn ChainTransport> {
        match (&self.backup, self.on_backup) {
            (Some(backup), true) => backup,
            _ => &self.primary,
        }
    }

    /// The address and topic filters covering every tracked contract
    fn filter_inputs(&self) -> (Vec<Address>, Vec<B256>) {
        let addresses: Vec<Address> = self.contracts.keys().copied().collect();
        let topics: Vec<B256> = self
            .contracts
            .values()
            .flat_map(|subscription| {
                let names = match &subscription.filter {
                    EventFilter::All => None,
                    EventFilter::Named(names) => Some(names),
                };
                subscription.describer.event_selectors(names)
            })
            .unique()
            .collect();

        (addresses, topics)
    }

    /// Record a new lifecycle state in the shared status
    async fn set_state(&self, state: PollerState) {
        self.status.write().await.state = state;
    }
}

// ------------------
// | Batch Sizing |
// ------------------

/// The log-fetch batch size for the given lag: deeper lag fetches larger
/// batches for faster catch-up, bounded by a ceiling to respect RPC limits
pub fn batch_size_for_lag(lag: u64) -> u64 {
    match lag {
        l if l > 1000 => 100,
        l if l > 500 => 80,
        l if l > 200 => 50,
        l if l > 50 => 30,
        l => l.clamp(1, 20),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicU64, Ordering},
    };

    use alloy::rpc::types::Log;
    use alloy_primitives::{Address, LogData, U256, keccak256};
    use serde_json::{Value, json};
    use tokio::sync::Mutex;
    use yap_listener_api::types::EventFilter;

    use super::*;
    use crate::transport::error::TransportError;

    // -----------------
    // | Test Fixtures |
    // -----------------

    /// A transport serving a scripted head and log set
    struct FakeTransport {
        /// The chain head to report
        head: AtomicU64,
        /// The logs to return from any `get_logs` call
        logs: Vec<Log>,
        /// The block ranges fetched so far
        fetched_ranges: Mutex<Vec<(u64, u64)>>,
        /// Whether every call should fail
        failing: bool,
    }

    impl FakeTransport {
        /// A healthy transport at the given head
        fn healthy(head: u64, logs: Vec<Log>) -> Self {
            Self {
                head: AtomicU64::new(head),
                logs,
                fetched_ranges: Mutex::new(vec![]),
                failing: false,
            }
        }

        /// A transport whose every call errors
        fn failing() -> Self {
            Self {
                head: AtomicU64::new(0),
                logs: vec![],
                fetched_ranges: Mutex::new(vec![]),
                failing: true,
            }
        }

        /// Advance the reported chain head
        fn set_head(&self, head: u64) {
            self.head.store(head, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ChainTransport for FakeTransport {
        async fn get_block_number(&self) -> Result<u64, TransportError> {
            if self.failing {
                return Err(TransportError::timeout("scripted failure"));
            }
            Ok(self.head.load(Ordering::SeqCst))
        }

        async fn get_logs(
            &self,
            _addresses: &[Address],
            _topics: &[B256],
            from_block: u64,
            to_block: u64,
        ) -> Result<Vec<Log>, TransportError> {
            if self.failing {
                return Err(TransportError::timeout("scripted failure"));
            }
            self.fetched_ranges.lock().await.push((from_block, to_block));

            let logs = self
                .logs
                .iter()
                .filter(|log| {
                    log.block_number.is_some_and(|b| b >= from_block && b <= to_block)
                })
                .cloned()
                .collect();
            Ok(logs)
        }
    }

    /// A sink collecting dispatched events
    #[derive(Default)]
    struct FakeSink {
        /// The normalized events received so far
        events: Mutex<Vec<NormalizedEvent>>,
    }

    #[async_trait]
    impl EventSink for FakeSink {
        async fn handle_contract_events(
            &self,
            _chain_id: u64,
            events: Vec<NormalizedEvent>,
        ) -> Result<(), PollerError> {
            self.events.lock().await.extend(events);
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

    /// An in-memory cursor store recording every write
    #[derive(Default)]
    struct FakeCursorStore {
        /// The current cursor per chain
        cursors: Mutex<HashMap<u64, u64>>,
        /// Every cursor value written, in order
        writes: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl CursorStore for FakeCursorStore {
        async fn load_cursor(&self, chain_id: u64) -> Result<Option<u64>, PollerError> {
            Ok(self.cursors.lock().await.get(&chain_id).copied())
        }

        async fn store_cursor(&self, chain_id: u64, block_number: u64) -> Result<(), PollerError> {
            self.cursors.lock().await.insert(chain_id, block_number);
            self.writes.lock().await.push(block_number);
            Ok(())
        }
    }

    /// The test chain ID
    const CHAIN_ID: u64 = 8453;

    /// An ABI with a single `Created(address,address,uint256)` event
    fn created_abi() -> Value {
        json!([{
            "type": "event",
            "name": "Created",
            "inputs": [
                {"name": "from", "type": "address", "indexed": false},
                {"name": "to", "type": "address", "indexed": false},
                {"name": "value", "type": "uint256", "indexed": false}
            ],
            "anonymous": false
        }])
    }

    /// Build a `Created` log at the given block
    fn created_log(contract: Address, block_number: u64) -> Log {
        let selector = keccak256("Created(address,address,uint256)".as_bytes());

        let mut data = Vec::with_capacity(96);
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(Address::with_last_byte(1).as_slice());
        data.extend_from_slice(&word);
        word = [0u8; 32];
        word[12..].copy_from_slice(Address::with_last_byte(2).as_slice());
        data.extend_from_slice(&word);
        data.extend_from_slice(&U256::from(42u64).to_be_bytes::<32>());

        Log {
            inner: alloy_primitives::Log {
                address: contract,
                data: LogData::new_unchecked(vec![selector], data.into()),
            },
            block_number: Some(block_number),
            transaction_hash: Some(B256::with_last_byte(9)),
            ..Default::default()
        }
    }

    /// A job subscription for the given contract, filtered to `Created`
    fn created_subscription(contract: Address) -> ContractSubscription {
        ContractSubscription {
            address: contract,
            describer: AbiDescriber::from_json(&created_abi()).unwrap(),
            filter: EventFilter::from_names(&["Created".to_string()]),
            kind: SubscriptionKind::Job,
        }
    }

    /// Spawn a poller over the given fixtures with a fast tick
    fn spawn_poller(
        transport: Arc<FakeTransport>,
        contracts: Vec<ContractSubscription>,
        sink: Arc<FakeSink>,
        cursors: Arc<FakeCursorStore>,
    ) -> PollerHandle {
        ChainPoller::spawn(
            CHAIN_ID,
            Duration::from_millis(10),
            transport,
            None, // backup
            contracts,
            sink,
            cursors,
        )
    }

    // ---------
    // | Tests |
    // ---------

    /// Batch size is non-decreasing in lag, capped at the ceiling, and never
    /// exceeds the remaining lag
    #[test]
    fn test_batch_size_bounds() {
        let mut previous = 0;
        for lag in 1..2000u64 {
            let batch = batch_size_for_lag(lag);
            assert!(batch >= previous, "batch size decreased at lag {lag}");
            assert!(batch <= 100, "batch size exceeded ceiling at lag {lag}");
            assert!(batch <= lag, "batch size exceeded lag at lag {lag}");
            previous = batch;
        }

        assert_eq!(batch_size_for_lag(10), 10);
        assert_eq!(batch_size_for_lag(1000), 80);
        assert_eq!(batch_size_for_lag(1001), 100);
    }

    /// A fresh chain seeds its cursor at the head without fetching logs
    #[tokio::test]
    async fn test_fresh_chain_seeds_cursor() {
        let contract = Address::with_last_byte(7);
        let transport = Arc::new(FakeTransport::healthy(500, vec![]));
        let sink = Arc::new(FakeSink::default());
        let cursors = Arc::new(FakeCursorStore::default());

        let handle = spawn_poller(
            transport.clone(),
            vec![created_subscription(contract)],
            sink,
            cursors.clone(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await.unwrap();

        assert_eq!(cursors.cursors.lock().await.get(&CHAIN_ID), Some(&500));
        // Head never moved past the seed, so no range was ever fetched
        assert!(transport.fetched_ranges.lock().await.is_empty());
    }

    /// Head at 1000, cursor at 990: one tick fetches 991-1000, routes the
    /// matching log at 995, and advances the cursor to 1000
    #[tokio::test]
    async fn test_catch_up_batch() {
        let contract = Address::with_last_byte(7);
        let transport =
            Arc::new(FakeTransport::healthy(1000, vec![created_log(contract, 995)]));
        let sink = Arc::new(FakeSink::default());
        let cursors = Arc::new(FakeCursorStore::default());
        cursors.cursors.lock().await.insert(CHAIN_ID, 990);

        let handle = spawn_poller(
            transport.clone(),
            vec![created_subscription(contract)],
            sink.clone(),
            cursors.clone(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await.unwrap();

        let ranges = transport.fetched_ranges.lock().await;
        assert_eq!(ranges.first(), Some(&(991, 1000)));

        let events = sink.events.lock().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].block_number, 995);
        assert_eq!(events[0].name, "Created");
        assert_eq!(events[0].value, U256::from(42u64));

        // Cursor committed at the batch's upper bound, and every write was
        // monotonic
        assert_eq!(cursors.cursors.lock().await.get(&CHAIN_ID), Some(&1000));
        let writes = cursors.writes.lock().await;
        assert!(writes.windows(2).all(|w| w[0] <= w[1]));
        assert!(writes.iter().all(|&w| w <= 1000));
    }

    /// No new blocks is a no-op: the cursor is not advanced or rewritten
    #[tokio::test]
    async fn test_no_new_blocks() {
        let contract = Address::with_last_byte(7);
        let transport = Arc::new(FakeTransport::healthy(1000, vec![]));
        let sink = Arc::new(FakeSink::default());
        let cursors = Arc::new(FakeCursorStore::default());
        cursors.cursors.lock().await.insert(CHAIN_ID, 1000);

        let handle = spawn_poller(
            transport.clone(),
            vec![created_subscription(contract)],
            sink,
            cursors.clone(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await.unwrap();

        assert!(transport.fetched_ranges.lock().await.is_empty());
        assert!(cursors.writes.lock().await.is_empty());
        assert_eq!(cursors.cursors.lock().await.get(&CHAIN_ID), Some(&1000));
    }

    /// Narrowing a contract's filter drops events outside the filter
    #[tokio::test]
    async fn test_filter_narrowing() {
        let contract = Address::with_last_byte(7);
        let transport =
            Arc::new(FakeTransport::healthy(990, vec![created_log(contract, 995)]));
        let sink = Arc::new(FakeSink::default());
        let cursors = Arc::new(FakeCursorStore::default());
        cursors.cursors.lock().await.insert(CHAIN_ID, 990);

        let mut subscription = created_subscription(contract);
        subscription.filter = EventFilter::All;
        let handle =
            spawn_poller(transport.clone(), vec![subscription], sink.clone(), cursors.clone());

        // Narrow the filter to an event the log does not match while the
        // chain is idle, then let the head move past the log
        handle
            .set_contract_filter(contract, EventFilter::from_names(&["Burned".to_string()]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        transport.set_head(1000);

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop().await.unwrap();

        // The range holding the log was fetched; the narrowed filter dropped
        // the event
        assert!(transport.fetched_ranges.lock().await.contains(&(991, 1000)));
        assert!(sink.events.lock().await.is_empty());
        assert_eq!(cursors.cursors.lock().await.get(&CHAIN_ID), Some(&1000));
    }

    /// A cursor far behind head at startup is reseeded at head rather than
    /// replaying the downtime
    #[tokio::test]
    async fn test_stale_cursor_reseeds() {
        let contract = Address::with_last_byte(7);
        let transport =
            Arc::new(FakeTransport::healthy(1000, vec![created_log(contract, 995)]));
        let sink = Arc::new(FakeSink::default());
        let cursors = Arc::new(FakeCursorStore::default());
        cursors.cursors.lock().await.insert(CHAIN_ID, 100);

        let handle = spawn_poller(
            transport.clone(),
            vec![created_subscription(contract)],
            sink.clone(),
            cursors.clone(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await.unwrap();

        assert_eq!(cursors.cursors.lock().await.get(&CHAIN_ID), Some(&1000));
        assert!(transport.fetched_ranges.lock().await.is_empty());
        assert!(sink.events.lock().await.is_empty());
    }

    /// The consecutive-error ceiling transitions the poller to the terminal
    /// stopped state
    #[tokio::test]
    async fn test_error_ceiling_stops_poller() {
        let contract = Address::with_last_byte(7);
        let transport = Arc::new(FakeTransport::failing());
        let sink = Arc::new(FakeSink::default());
        let cursors = Arc::new(FakeCursorStore::default());

        let handle = spawn_poller(
            transport,
            vec![created_subscription(contract)],
            sink,
            cursors,
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = handle.status().await;
        assert_eq!(status.state, PollerState::Stopped);

        // A stopped poller still answers teardown commands
        handle.stop().await.unwrap();
    }

    /// Untracking contracts reports the remaining tracked count
    #[tokio::test]
    async fn test_untrack_reports_remaining() {
        let first = Address::with_last_byte(7);
        let second = Address::with_last_byte(8);
        let transport = Arc::new(FakeTransport::healthy(100, vec![]));
        let sink = Arc::new(FakeSink::default());
        let cursors = Arc::new(FakeCursorStore::default());

        let handle = spawn_poller(
            transport,
            vec![created_subscription(first), created_subscription(second)],
            sink,
            cursors,
        );

        assert_eq!(handle.untrack_contract(first).await.unwrap(), 1);
        assert_eq!(handle.untrack_contract(second).await.unwrap(), 0);
        handle.stop().await.unwrap();
    }
}
