//! Core domain types shared across the listener's modules

use alloy_primitives::{Address, TxHash, U256};
use yap_listener_api::types::tasks::JobEventRecord;

// --------------------
// | Normalized Event |
// --------------------

/// A decoded contract event log, normalized into the shape the event router
/// persists.
///
/// Events without `from`/`to`/`value` parameters normalize with zero-address
/// and zero-value defaults; the event name and transaction coordinates are
/// always present.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedEvent {
    /// The decoded event name
    pub name: String,
    /// The contract that emitted the event
    pub contract: Address,
    /// The sending counterparty, if the event declares one
    pub sender: Address,
    /// The receiving counterparty, if the event declares one
    pub receiver: Address,
    /// The event's value in raw token units
    pub value: U256,
    /// The block the event was emitted in
    pub block_number: u64,
    /// The transaction hash the event was emitted in
    pub transaction_hash: TxHash,
}

// ---------------------
// | Event Dedup Logic |
// ---------------------

/// Deduplicate a job's observed events by their logical identity.
///
/// Raw `contract_events` rows are an append-only log and may contain
/// re-delivered duplicates from cursor replay after a crash; aggregation must
/// count each `(sender, receiver, transaction, block)` tuple exactly once per
/// job before it can affect derived state or rewards.
pub fn dedup_job_events(events: Vec<JobEventRecord>) -> Vec<JobEventRecord> {
    let mut seen = std::collections::HashSet::new();
    let mut deduped = Vec::with_capacity(events.len());

    for event in events {
        let key = (event.sender, event.receiver, event.transaction_hash, event.block_number);
        if seen.insert(key) {
            deduped.push(event);
        }
    }

    deduped
}
