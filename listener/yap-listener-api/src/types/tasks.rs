//! Task message definitions for the listener's durable work queue
//!
//! Every task carries an idempotency key under which the queue deduplicates
//! redelivery, and names a message group within which delivery is ordered.
//! Handlers must remain idempotent & commutative: tasks of the same kind may
//! be redelivered and reordered across groups.

use std::time::Duration;

use alloy_primitives::{Address, TxHash, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Yapper;

// ------------
// | Envelope |
// ------------

/// The wire envelope for a queued task, tracking its delivery attempt so the
/// consumer can apply the retry policy on redelivery.
///
/// Scheduling is carried in the envelope rather than the queue: a FIFO queue
/// cannot delay individual sends, so a consumer receiving an envelope before
/// `not_before` defers its redelivery instead of executing it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// The task itself
    pub task: TaskMessage,
    /// The zero-indexed delivery attempt
    pub attempt: u32,
    /// The time before which the task must not be executed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
}

impl TaskEnvelope {
    /// Wrap a task in a first-attempt envelope
    pub fn new(task: TaskMessage) -> Self {
        Self { task, attempt: 0, not_before: None }
    }

    /// Wrap a task in a first-attempt envelope due at the given time
    pub fn scheduled(task: TaskMessage, not_before: DateTime<Utc>) -> Self {
        Self { task, attempt: 0, not_before: Some(not_before) }
    }

    /// The envelope for the next delivery attempt of this task
    pub fn next_attempt(&self) -> Self {
        Self { task: self.task.clone(), attempt: self.attempt + 1, not_before: None }
    }

    /// The time remaining until the task is due, if it is not yet due
    pub fn remaining_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        let not_before = self.not_before?;
        (not_before - now).to_std().ok().filter(|d| !d.is_zero())
    }
}

// -----------------
// | Task Messages |
// -----------------

/// The top-level enum of all tasks the listener enqueues
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TaskMessage {
    /// An escrow creation event was observed onchain and the upstream yap API
    /// must be notified
    EventCreated(EventCreatedTask),
    /// Recompute one yapper's derived address-activity cluster for a job
    RecordYapperCluster(RecordYapperClusterTask),
    /// Deactivate a job's listener subscription
    StopJob(StopJobTask),
    /// Recompute a job's activity by fanning out cluster tasks for each of
    /// its yappers
    UpdateLeaderboard(UpdateLeaderboardTask),
}

impl TaskMessage {
    /// The task kind, used for logging and the failed-task ledger
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EventCreated(..) => "event-created",
            Self::RecordYapperCluster(..) => "record-yapper-cluster",
            Self::StopJob(..) => "stop-job",
            Self::UpdateLeaderboard(..) => "update-leaderboard",
        }
    }

    /// The idempotency key under which the queue deduplicates this task
    pub fn idempotency_key(&self) -> String {
        match self {
            Self::EventCreated(task) => format!(
                "{}-{}-{}-{:#x}",
                self.kind(),
                task.job_id,
                task.domain_id,
                task.transaction_hash
            ),
            Self::RecordYapperCluster(task) => {
                format!("{}-{}-{}", self.kind(), task.yapper.job_id, task.yapper.yapper_id)
            },
            Self::StopJob(task) => format!("{}-{}", self.kind(), task.job_id),
            Self::UpdateLeaderboard(task) => format!("{}-{}", self.kind(), task.job_id),
        }
    }

    /// The message group the task belongs to.
    ///
    /// Cluster recomputation is grouped per (job, yapper) so distinct yappers
    /// are processed concurrently; everything else is grouped per job.
    pub fn message_group(&self) -> String {
        match self {
            Self::EventCreated(task) => format!("job-{}", task.job_id),
            Self::RecordYapperCluster(task) => {
                format!("cluster-{}-{}", task.yapper.job_id, task.yapper.yapper_id)
            },
            Self::StopJob(task) => format!("job-{}", task.job_id),
            Self::UpdateLeaderboard(task) => format!("job-{}", task.job_id),
        }
    }
}

/// A notification of a tracked escrow creation event.
///
/// Amounts are forwarded as raw integer token units; scaling by token
/// decimals is left to the upstream consumer so values never round-trip
/// through a float.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventCreatedTask {
    /// The job the creation event belongs to
    pub job_id: String,
    /// The escrow-assigned domain ID of the creation
    pub domain_id: U256,
    /// The address that funded the escrow
    pub creator: Address,
    /// The asset the escrow was funded with
    pub asset: Address,
    /// The escrowed budget, in raw token units
    pub budget: U256,
    /// The protocol fee, in raw token units
    pub fee: U256,
    /// The chain the event was observed on
    pub chain_id: u64,
    /// The transaction hash of the creation
    pub transaction_hash: TxHash,
    /// The block the creation was included in
    pub block_number: u64,
}

/// A request to recompute one yapper's derived address-activity cluster
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordYapperClusterTask {
    /// The yapper whose cluster to recompute
    pub yapper: Yapper,
    /// The chain the job's contract lives on
    pub chain_id: u64,
    /// A deduplicated snapshot of the job's observed contract events
    pub events: Vec<JobEventRecord>,
}

/// A request to deactivate a job's listener subscription
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StopJobTask {
    /// The job to stop
    pub job_id: String,
}

/// A request to recompute a job's onchain leaderboard activity
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateLeaderboardTask {
    /// The job to recompute
    pub job_id: String,
    /// The recomputation interval, in seconds; the handler re-enqueues itself
    /// with this delay while the job's activity window is open
    pub interval_secs: u64,
}

// -------------------
// | Event Snapshots |
// -------------------

/// One observed contract event in a job's activity snapshot
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobEventRecord {
    /// The job the event was recorded for
    pub job_id: String,
    /// The chain the event was observed on
    pub chain_id: u64,
    /// The decoded event name
    pub event_name: String,
    /// The event's sender address
    pub sender: Address,
    /// The event's receiver address
    pub receiver: Address,
    /// The event's value, in raw token units
    pub value: U256,
    /// The transaction hash the event was emitted in
    pub transaction_hash: TxHash,
    /// The block the event was observed at
    pub block_number: u64,
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, TxHash, U256};

    use super::*;

    /// A cluster task for test use
    fn cluster_task() -> TaskMessage {
        TaskMessage::RecordYapperCluster(RecordYapperClusterTask {
            yapper: Yapper {
                yapper_id: "yapper-1".to_string(),
                user_id: "user-1".to_string(),
                job_id: "job-1".to_string(),
                social_username: "alice".to_string(),
                wallet_address: Address::ZERO.to_string(),
            },
            chain_id: 8453,
            events: vec![],
        })
    }

    /// Idempotency keys are stable across envelope attempts
    #[test]
    fn test_idempotency_key_stable() {
        let task = cluster_task();
        let envelope = TaskEnvelope::new(task);
        let retried = envelope.next_attempt();

        assert_eq!(envelope.task.idempotency_key(), retried.task.idempotency_key());
        assert_eq!(retried.attempt, 1);
        assert_eq!(envelope.task.idempotency_key(), "record-yapper-cluster-job-1-yapper-1");
    }

    /// The creation-event key includes the domain ID and transaction hash
    #[test]
    fn test_event_created_key() {
        let task = TaskMessage::EventCreated(EventCreatedTask {
            job_id: "job-1".to_string(),
            domain_id: U256::from(7u64),
            creator: Address::ZERO,
            asset: Address::ZERO,
            budget: U256::from(100u64),
            fee: U256::from(1u64),
            chain_id: 8453,
            transaction_hash: TxHash::ZERO,
            block_number: 100,
        });

        let key = task.idempotency_key();
        assert!(key.starts_with("event-created-job-1-7-0x"));
    }

    /// Task envelopes round-trip through JSON
    #[test]
    fn test_envelope_serde_roundtrip() {
        let envelope = TaskEnvelope::new(cluster_task());
        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: TaskEnvelope = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.attempt, 0);
        assert!(parsed.not_before.is_none());
        assert_eq!(parsed.task.idempotency_key(), envelope.task.idempotency_key());
    }

    /// Envelopes serialized without a due time still parse
    #[test]
    fn test_envelope_without_due_time_parses() {
        let json =
            serde_json::to_string(&serde_json::json!({ "task": cluster_task(), "attempt": 2 }))
                .unwrap();
        let parsed: TaskEnvelope = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.attempt, 2);
        assert!(parsed.not_before.is_none());
    }

    /// An envelope is due once its scheduled time passes
    #[test]
    fn test_envelope_due_time() {
        let now = chrono::Utc::now();
        let envelope = TaskEnvelope::scheduled(cluster_task(), now + Duration::from_secs(30));

        assert_eq!(envelope.remaining_delay(now), Some(Duration::from_secs(30)));
        assert_eq!(envelope.remaining_delay(now + Duration::from_secs(30)), None);
        assert_eq!(envelope.remaining_delay(now + Duration::from_secs(60)), None);
    }
}
