//! Type bindings for the listener's database table records

use std::str::FromStr;

use alloy_primitives::{Address, TxHash};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::{
    Selectable,
    prelude::{Insertable, Queryable},
};
use serde_json::Value;
use yap_listener_api::types::{Yapper, tasks::JobEventRecord};

use crate::{
    db::{
        error::DbError,
        utils::{bigdecimal_to_block, bigdecimal_to_u256, block_to_bigdecimal, u256_to_bigdecimal},
    },
    types::NormalizedEvent,
};

// ----------------
// | Table Models |
// ----------------

// === Jobs Table ===

/// A job record
#[derive(Clone, Queryable, Selectable)]
#[diesel(table_name = crate::db::schema::jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct JobModel {
    /// The job's 21-character identifier
    pub id: String,
    /// The contract the job listens on, lowercase hex
    pub contract_address: String,
    /// The chain the contract is deployed on
    pub chain_id: i64,
    /// The subscribed event names; empty means all events
    pub events: Vec<String>,
    /// The job's distinct observed counterparty addresses, snapshotted at
    /// unsubscribe time for later reward computation
    pub event_addresses: Option<Vec<String>>,
    /// The contract ABI
    pub abi: Value,
    /// When the job's activity window closes, if time-boxed
    pub ends_at: Option<DateTime<Utc>>,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// Whether the job is active
    pub is_active: bool,
}

/// An insertable job record
#[derive(Clone, Insertable)]
#[diesel(table_name = crate::db::schema::jobs)]
pub struct NewJob {
    /// The job's identifier
    pub id: String,
    /// The contract the job listens on, lowercase hex
    pub contract_address: String,
    /// The chain the contract is deployed on
    pub chain_id: i64,
    /// The subscribed event names; empty means all events
    pub events: Vec<String>,
    /// The contract ABI
    pub abi: Value,
    /// When the job's activity window closes, if time-boxed
    pub ends_at: Option<DateTime<Utc>>,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// Whether the job is active
    pub is_active: bool,
}

// === Contract Listeners Table ===

/// An aggregated per-(chain, contract) subscription record
#[derive(Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::db::schema::contract_listeners)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ContractListenerModel {
    /// The chain the contract is deployed on
    pub chain_id: i64,
    /// The contract address, lowercase hex
    pub contract_address: String,
    /// The contract ABI
    pub abi: Value,
    /// The IDs of the jobs subscribed to this contract
    pub subscribed_jobs: Vec<String>,
    /// The union of the subscribed jobs' event filters; `["*"]` encodes an
    /// all-events subscription at rest
    pub events_being_listened: Vec<String>,
    /// When the listener was first created
    pub start_time: DateTime<Utc>,
    /// Whether the listener is active
    pub is_active: bool,
}

// === Listener Cursors Table ===

/// A per-chain cursor record: the last fully processed block
#[derive(Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::db::schema::listener_cursors)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CursorModel {
    /// The chain the cursor belongs to
    pub chain_id: i64,
    /// The last fully processed block number
    pub last_processed_block: BigDecimal,
    /// When the cursor was last advanced
    pub updated_at: DateTime<Utc>,
}

// === Contract Events Table ===

/// An insertable contract event record
#[derive(Clone, Insertable)]
#[diesel(table_name = crate::db::schema::contract_events)]
pub struct NewContractEvent {
    /// The job the event was routed to
    pub job_id: String,
    /// The chain the event was observed on
    pub chain_id: i64,
    /// The emitting contract, lowercase hex
    pub contract_address: String,
    /// The decoded event name
    pub event_name: String,
    /// The sending counterparty, lowercase hex
    pub sender: String,
    /// The receiving counterparty, lowercase hex
    pub receiver: String,
    /// The event's value in raw token units
    pub value: BigDecimal,
    /// The transaction hash the event was emitted in
    pub transaction_hash: String,
    /// The block the event was emitted in
    pub block_number: BigDecimal,
    /// When the listener observed the event
    pub detected_at: DateTime<Utc>,
}

impl NewContractEvent {
    /// Build an insertable record for one (job, event) routing
    pub fn from_normalized(job_id: &str, chain_id: u64, event: &NormalizedEvent) -> Self {
        Self {
            job_id: job_id.to_string(),
            chain_id: chain_id as i64,
            contract_address: format!("{:#x}", event.contract),
            event_name: event.name.clone(),
            sender: format!("{:#x}", event.sender),
            receiver: format!("{:#x}", event.receiver),
            value: u256_to_bigdecimal(event.value),
            transaction_hash: format!("{:#x}", event.transaction_hash),
            block_number: block_to_bigdecimal(event.block_number),
            detected_at: Utc::now(),
        }
    }
}

/// A stored contract event record
#[derive(Clone, Queryable, Selectable)]
#[diesel(table_name = crate::db::schema::contract_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ContractEventModel {
    /// The row ID
    pub id: i64,
    /// The job the event was routed to
    pub job_id: String,
    /// The chain the event was observed on
    pub chain_id: i64,
    /// The emitting contract, lowercase hex
    pub contract_address: String,
    /// The decoded event name
    pub event_name: String,
    /// The sending counterparty, lowercase hex
    pub sender: String,
    /// The receiving counterparty, lowercase hex
    pub receiver: String,
    /// The event's value in raw token units
    pub value: BigDecimal,
    /// The transaction hash the event was emitted in
    pub transaction_hash: String,
    /// The block the event was emitted in
    pub block_number: BigDecimal,
    /// When the listener observed the event
    pub detected_at: DateTime<Utc>,
}

impl ContractEventModel {
    /// Convert the stored record into a snapshot record for queue payloads
    pub fn to_job_record(&self) -> Result<JobEventRecord, DbError> {
        let sender = Address::from_str(&self.sender).map_err(DbError::conversion)?;
        let receiver = Address::from_str(&self.receiver).map_err(DbError::conversion)?;
        let transaction_hash =
            TxHash::from_str(&self.transaction_hash).map_err(DbError::conversion)?;

        Ok(JobEventRecord {
            job_id: self.job_id.clone(),
            chain_id: self.chain_id as u64,
            event_name: self.event_name.clone(),
            sender,
            receiver,
            value: bigdecimal_to_u256(&self.value)?,
            transaction_hash,
            block_number: bigdecimal_to_block(&self.block_number)?,
        })
    }
}

// === Derived Address Activity Table ===

/// An insertable derived-activity delta.
///
/// Conflicting inserts on `(yapper_id, address, job_id)` merge additively:
/// values accumulate, interaction counts sum, and the interacted flag ORs.
/// The merge is monotonic so redelivered & reordered cluster tasks commute.
#[derive(Clone, Insertable)]
#[diesel(table_name = crate::db::schema::derived_address_activity)]
pub struct NewDerivedActivity {
    /// The yapper the activity belongs to
    pub yapper_id: String,
    /// The yapper's platform user ID
    pub yapper_user_id: String,
    /// The job the activity was observed under
    pub job_id: String,
    /// The yapper's own wallet address, lowercase hex
    pub yapper_address: String,
    /// The clustered address, lowercase hex
    pub address: String,
    /// The name of the last matched event, if any
    pub last_event_name: Option<String>,
    /// The accumulated interaction value in raw token units
    pub total_value: BigDecimal,
    /// The number of matched interactions
    pub interaction_count: i64,
    /// Whether the address has interacted with the job's contract
    pub interacted: bool,
    /// The transaction hash of the last matched event, if any
    pub last_transaction_hash: Option<String>,
    /// When the record was last updated
    pub last_updated: DateTime<Utc>,
}

impl NewDerivedActivity {
    /// Build an activity delta for one clustered address, with the matching
    /// job event when the address interacted with the contract
    pub fn new(yapper: &Yapper, address: Address, matched: Option<&JobEventRecord>) -> Self {
        Self {
            yapper_id: yapper.yapper_id.clone(),
            yapper_user_id: yapper.user_id.clone(),
            job_id: matched.map(|m| m.job_id.clone()).unwrap_or_else(|| yapper.job_id.clone()),
            yapper_address: yapper.wallet_address.to_lowercase(),
            address: format!("{address:#x}"),
            last_event_name: matched.map(|m| m.event_name.clone()),
            total_value: matched.map(|m| u256_to_bigdecimal(m.value)).unwrap_or_default(),
            interaction_count: i64::from(matched.is_some()),
            interacted: matched.is_some(),
            last_transaction_hash: matched.map(|m| format!("{:#x}", m.transaction_hash)),
            last_updated: Utc::now(),
        }
    }
}

/// A stored derived-activity record
#[derive(Clone, Queryable, Selectable)]
#[diesel(table_name = crate::db::schema::derived_address_activity)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DerivedActivityModel {
    /// The row ID
    pub id: i64,
    /// The yapper the activity belongs to
    pub yapper_id: String,
    /// The yapper's platform user ID
    pub yapper_user_id: String,
    /// The job the activity was observed under
    pub job_id: String,
    /// The yapper's own wallet address, lowercase hex
    pub yapper_address: String,
    /// The clustered address, lowercase hex
    pub address: String,
    /// The name of the last matched event, if any
    pub last_event_name: Option<String>,
    /// The accumulated interaction value in raw token units
    pub total_value: BigDecimal,
    /// The number of matched interactions
    pub interaction_count: i64,
    /// Whether the address has interacted with the job's contract
    pub interacted: bool,
    /// The transaction hash of the last matched event, if any
    pub last_transaction_hash: Option<String>,
    /// When the record was last updated
    pub last_updated: DateTime<Utc>,
}

// === Failed Tasks Table ===

/// An insertable failed-task record: a task whose retries were exhausted,
/// surfaced for operator intervention
#[derive(Clone, Insertable)]
#[diesel(table_name = crate::db::schema::failed_tasks)]
pub struct NewFailedTask {
    /// The task kind
    pub task_kind: String,
    /// The task's idempotency key
    pub idempotency_key: String,
    /// The task payload as JSON
    pub payload: Value,
    /// The final handler error
    pub error: String,
    /// How many delivery attempts were made
    pub attempts: i32,
    /// When the task was abandoned
    pub failed_at: DateTime<Utc>,
}
