//! The task worker: consumes queued tasks, dispatches them to their handlers,
//! and applies the retry policy on failure
//!
//! Task groups are processed concurrently up to a configured bound, while
//! tasks within one group run strictly in order. A failed task is re-enqueued
//! with an exponentially growing delay; a task whose retries are exhausted is
//! recorded in the failed-task ledger for operator intervention, never
//! silently dropped.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::{sync::Semaphore, task::JoinSet, time::sleep};
use tracing::{debug, error, info, warn};
use yap_listener_api::types::tasks::TaskEnvelope;

use crate::{
    db::{
        error::DbError,
        models::{ContractEventModel, JobModel, NewDerivedActivity, NewFailedTask},
    },
    enrichment::DynEnricher,
    queue::{ListenerQueue, TaskQueue, attempt_dedup_id},
    worker::error::WorkerError,
};

pub mod error;
mod handlers;

// -------------
// | Constants |
// -------------

/// The maximum number of delivery attempts for a task before it lands in the
/// failed-task ledger
const MAX_TASK_ATTEMPTS: u32 = 5;

/// The base retry delay, doubled with each failed attempt
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// How long to wait before re-polling an empty queue
const POLL_IDLE_DELAY: Duration = Duration::from_secs(1);

// -----------------
// | Worker Traits |
// -----------------

/// The lifecycle surface the worker uses to apply scheduled job stops.
///
/// Split into a trait so the worker does not hold the lifecycle manager
/// concretely, and so handlers are testable with fakes.
#[async_trait]
pub trait JobControl: Send + Sync {
    /// Deactivate a job's subscription, returning false if the job does not
    /// exist
    async fn stop_job(&self, job_id: &str) -> Result<bool, WorkerError>;
}

/// The persistence surface the worker's handlers and retry path write through
#[async_trait]
pub trait WorkerStore: Send + Sync {
    /// Get a job record by ID
    async fn get_job(&self, job_id: &str) -> Result<Option<JobModel>, DbError>;

    /// Get the stored events routed to a job, ordered by block
    async fn get_events_for_job(&self, job_id: &str) -> Result<Vec<ContractEventModel>, DbError>;

    /// Merge a batch of derived-activity deltas into the activity table
    async fn upsert_derived_activity(
        &self,
        deltas: Vec<NewDerivedActivity>,
    ) -> Result<(), DbError>;

    /// Record a task whose delivery attempts are exhausted
    async fn record_failed_task(&self, task: NewFailedTask) -> Result<(), DbError>;
}

// ---------------
// | Task Worker |
// ---------------

/// Consumes and executes queued tasks
pub struct TaskWorker {
    /// The task queue
    queue: ListenerQueue,
    /// The persistence surface
    store: Arc<dyn WorkerStore>,
    /// The enrichment client
    enricher: DynEnricher,
    /// The job lifecycle surface
    job_control: Arc<dyn JobControl>,
    /// The maximum number of task groups processed concurrently
    concurrency: usize,
}

impl TaskWorker {
    /// Create a new task worker
    pub fn new(
        queue: ListenerQueue,
        store: Arc<dyn WorkerStore>,
        enricher: DynEnricher,
        job_control: Arc<dyn JobControl>,
        concurrency: usize,
    ) -> Self {
        Self { queue, store, enricher, job_control, concurrency }
    }

    /// Run the consume loop until the process shuts down
    pub async fn run(self: Arc<Self>) {
        info!("task worker started (concurrency {})", self.concurrency);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        loop {
            let task_groups = match self.queue.poll_tasks().await {
                Ok(task_groups) => task_groups,
                Err(e) => {
                    warn!("error polling task queue: {e}");
                    sleep(POLL_IDLE_DELAY).await;
                    continue;
                },
            };

            if task_groups.is_empty() {
                sleep(POLL_IDLE_DELAY).await;
                continue;
            }

            // Process groups concurrently up to the bound; within a group,
            // tasks run in order. The batch is joined before the next poll so
            // every delivery is settled first.
            let mut group_tasks = JoinSet::new();
            for (task_group, tasks) in task_groups {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    return;
                };

                let worker = self.clone();
                group_tasks.spawn(async move {
                    let _permit = permit;
                    worker.process_group(&task_group, tasks).await;
                });
            }

            group_tasks.join_all().await;
        }
    }

    /// Process one task group's deliveries in order
    async fn process_group(&self, task_group: &str, tasks: Vec<(TaskEnvelope, String)>) {
        debug!("processing {} tasks from group {task_group}", tasks.len());
        for (envelope, receipt_handle) in tasks {
            self.process_task(envelope, receipt_handle).await;
        }
    }

    /// Execute one delivery, then settle it.
    ///
    /// The receipt is deleted only once the delivery is settled: the handler
    /// succeeded, a retry was re-sent, or the exhausted task was recorded in
    /// the ledger. A delivery whose settlement fails stays in flight, and the
    /// queue's visibility timeout redelivers it.
    async fn process_task(&self, envelope: TaskEnvelope, receipt_handle: String) {
        let kind = envelope.task.kind();

        // A scheduled task delivered before its due time is pushed back out
        // rather than executed
        if let Some(remaining) = envelope.remaining_delay(Utc::now()) {
            debug!("{kind} task due in {remaining:?}, deferring redelivery");
            if let Err(e) = self.queue.delay_redelivery(receipt_handle, remaining).await {
                warn!("error deferring {kind} task: {e}");
            }
            return;
        }

        if let Err(e) = self.handle_task(&envelope.task).await {
            warn!("{kind} task failed (attempt {}): {e}", envelope.attempt + 1);
            if let Err(e) = self.retry_or_record(&envelope, &e.to_string()).await {
                error!("failed to settle failed {kind} task, leaving it in flight: {e}");
                return;
            }
        }

        if let Err(e) = self.queue.delete_task(receipt_handle).await {
            warn!("error deleting {kind} task from queue: {e}");
        }
    }

    /// Re-enqueue a failed task for its next attempt, or record it in the
    /// failed-task ledger once its attempts are exhausted
    async fn retry_or_record(
        &self,
        envelope: &TaskEnvelope,
        error: &str,
    ) -> Result<(), WorkerError> {
        let mut next = envelope.next_attempt();

        if next.attempt >= MAX_TASK_ATTEMPTS {
            error!(
                "{} task exhausted {MAX_TASK_ATTEMPTS} attempts, recording as failed",
                next.task.kind()
            );

            let failed = NewFailedTask {
                task_kind: next.task.kind().to_string(),
                idempotency_key: next.task.idempotency_key(),
                payload: serde_json::to_value(&next.task).unwrap_or_else(|_| json!(null)),
                error: error.to_string(),
                attempts: next.attempt as i32,
                failed_at: Utc::now(),
            };

            self.store.record_failed_task(failed).await?;
            return Ok(());
        }

        let deduplication_id = attempt_dedup_id(&next.task, next.attempt);
        let task_group = next.task.message_group();
        next.not_before = Some(Utc::now() + retry_delay(envelope.attempt));

        self.queue.send_task(next, deduplication_id, task_group).await?;
        Ok(())
    }
}

/// The delay before retrying a task that failed on the given attempt
fn retry_delay(failed_attempt: u32) -> Duration {
    RETRY_BASE_DELAY * 2u32.saturating_pow(failed_attempt)
}
