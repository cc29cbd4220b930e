//! Defines an abstract interface for a durable task queue, based on AWS SQS

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use yap_listener_api::types::tasks::{TaskEnvelope, TaskMessage};

use crate::queue::error::TaskQueueError;

pub mod error;
pub mod mock_task_queue;
pub mod sqs;

// ----------------
// | Type Aliases |
// ----------------

/// A type alias for a map of task groups, containing the tasks in the group
/// and their receipt handles
pub type TaskGroupsResponse<T> = HashMap<String, Vec<(T, String)>>;

/// The queue type carrying the listener's task envelopes
pub type ListenerQueue = DynTaskQueue<TaskEnvelope>;

// -----------
// | Helpers |
// -----------

/// The deduplication ID for a given delivery attempt of a task.
///
/// The attempt number is appended so a retry is not deduplicated against the
/// original send within the queue's deduplication window.
pub fn attempt_dedup_id(task: &TaskMessage, attempt: u32) -> String {
    format!("{}-attempt-{attempt}", task.idempotency_key())
}

/// Enqueue a first-attempt envelope for a task, due after the given delay.
///
/// The delay is stamped onto the envelope rather than the send: consumers
/// receiving the envelope early defer its redelivery until it is due.
pub async fn enqueue_task(
    queue: &ListenerQueue,
    task: TaskMessage,
    delay: Duration,
) -> Result<(), TaskQueueError> {
    let deduplication_id = attempt_dedup_id(&task, 0);
    let task_group = task.message_group();
    let envelope = if delay.is_zero() {
        TaskEnvelope::new(task)
    } else {
        TaskEnvelope::scheduled(task, Utc::now() + delay)
    };

    queue.send_task(envelope, deduplication_id, task_group).await
}

// --------------------
// | Trait Definition |
// --------------------

/// A trait describing the high-level interface for a durable task queue.
///
/// Each task is uniquely identified by a deduplication ID and belongs to a
/// "task group." Tasks within a group are strictly ordered; tasks from
/// different groups can be consumed concurrently. An in-flight delivery can
/// have its redelivery deferred; retries and self-scheduling tasks are built
/// on this.
///
/// These semantics & nomenclature are taken from AWS SQS.
#[async_trait]
pub trait TaskQueue: Sync + Send {
    /// The task type supported by the queue.
    /// We make this an associated type, as opposed to attaching it as a type
    /// parameter to the trait methods, to ensure the trait is
    /// dyn-compatible.
    type Task: Serialize + for<'de> Deserialize<'de> + Send + Sync;

    /// Send a task with the given deduplication ID to the given task group
    async fn send_task(
        &self,
        task: Self::Task,
        deduplication_id: String,
        task_group: String,
    ) -> Result<(), TaskQueueError>;

    /// Poll for visible tasks, collecting them into a map keyed by task
    /// group. Each task is paired with its receipt handle.
    async fn poll_tasks(&self) -> Result<TaskGroupsResponse<Self::Task>, TaskQueueError>;

    /// Defer redelivery of an in-flight delivery by the given delay.
    ///
    /// The delivery stays queued and becomes visible to consumers again once
    /// the delay elapses.
    async fn delay_redelivery(
        &self,
        receipt_handle: String,
        delay: Duration,
    ) -> Result<(), TaskQueueError>;

    /// Delete a task from the queue, committing its consumption & ensuring it
    /// will not be polled again
    async fn delete_task(&self, deletion_id: String) -> Result<(), TaskQueueError>;
}

// --------------------------
// | Erased Type Definition |
// --------------------------

/// A type-erased wrapper around a task queue
#[derive(Clone)]
pub struct DynTaskQueue<T>(Arc<dyn TaskQueue<Task = T>>);

impl<T> DynTaskQueue<T> {
    /// Create a new type-erased task queue
    pub fn new<Q: TaskQueue<Task = T> + 'static>(task_queue: Q) -> Self {
        Self(Arc::new(task_queue))
    }
}

#[async_trait]
impl<T: Serialize + for<'de> Deserialize<'de> + Send + Sync> TaskQueue for DynTaskQueue<T> {
    type Task = T;

    async fn send_task(
        &self,
        task: Self::Task,
        deduplication_id: String,
        task_group: String,
    ) -> Result<(), TaskQueueError> {
        self.0.send_task(task, deduplication_id, task_group).await
    }

    async fn poll_tasks(&self) -> Result<TaskGroupsResponse<Self::Task>, TaskQueueError> {
        self.0.poll_tasks().await
    }

    async fn delay_redelivery(
        &self,
        receipt_handle: String,
        delay: Duration,
    ) -> Result<(), TaskQueueError> {
        self.0.delay_redelivery(receipt_handle, delay).await
    }

    async fn delete_task(&self, deletion_id: String) -> Result<(), TaskQueueError> {
        self.0.delete_task(deletion_id).await
    }
}
