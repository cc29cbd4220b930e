//! A mock task queue implementation, used for testing and for running the
//! listener without an SQS queue configured

use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::queue::{TaskGroupsResponse, TaskQueue, error::TaskQueueError};

// ---------
// | Types |
// ---------

/// A task wrapper for the mock task queue
struct MockTask<T> {
    /// The task
    pub task: T,
    /// The task ID
    /// This is used as the deduplication & deletion ID for the task.
    pub id: String,
    /// When the task becomes visible to consumers
    pub visible_at: Instant,
    /// Whether the task has already been polled by a consumer.
    /// This determines whether the task should be returned by the
    /// poll_tasks method.
    pub polled: bool,
}

impl<T> MockTask<T> {
    /// Create a new mock task, visible immediately
    fn new(task: T, id: String) -> Self {
        Self { task, id, visible_at: Instant::now(), polled: false }
    }
}

// -------------------
// | Mock Task Queue |
// -------------------

/// A mock task queue designed to emulate an AWS SQS FIFO queue w/ an infinite
/// visibility timeout. For more details, see:
/// https://docs.aws.amazon.com/AWSSimpleQueueService/latest/SQSDeveloperGuide/FIFO-queues-understanding-logic.html#FIFO-receiving-messages
///
/// An in-flight task whose redelivery is deferred becomes visible again once
/// its delay elapses, mirroring an SQS visibility timeout change.
///
/// Utilizes in-memory `VecDeque`s to simulate task groups.
pub struct MockTaskQueue<T> {
    /// A map from task group ID to the queue of tasks for that group.
    /// Wrapped in a mutex to allow for simple, thread-safe mutable access.
    task_groups: Mutex<HashMap<String, VecDeque<MockTask<T>>>>,
}

impl<T> Default for MockTaskQueue<T> {
    /// Create a default mock task queue
    fn default() -> Self {
        Self { task_groups: Mutex::new(HashMap::new()) }
    }
}

// -----------------------------------
// | Task Queue Trait Implementation |
// -----------------------------------

#[async_trait]
impl<T: Serialize + for<'de> Deserialize<'de> + Send + Sync + Clone> TaskQueue
    for MockTaskQueue<T>
{
    type Task = T;

    async fn send_task(
        &self,
        task: Self::Task,
        task_id: String,
        task_group_id: String,
    ) -> Result<(), TaskQueueError> {
        let mut task_groups = self.task_groups.lock().await;

        // Check if the task has already been sent, using the task ID as the
        // deduplication ID
        for (_, task_group) in task_groups.iter() {
            if task_group.iter().any(|task| task.id == task_id) {
                return Ok(());
            }
        }

        let task_group = task_groups.entry(task_group_id.clone()).or_default();
        let mock_task = MockTask::new(task, task_id);

        task_group.push_back(mock_task);

        Ok(())
    }

    async fn poll_tasks(&self) -> Result<TaskGroupsResponse<Self::Task>, TaskQueueError> {
        let mut task_groups = self.task_groups.lock().await;

        let now = Instant::now();
        let mut task_groups_response = TaskGroupsResponse::new();

        for (task_group_id, task_group) in task_groups.iter_mut() {
            // If any of the tasks in the task group have already been polled, no
            // further tasks from the group can be returned. This mirrors the
            // behavior of AWS SQS FIFO queues described here: https://docs.aws.amazon.com/AWSSimpleQueueService/latest/SQSDeveloperGuide/FIFO-queues-understanding-logic.html#FIFO-receiving-messages
            let already_polled = task_group.iter().any(|task| task.polled);
            if already_polled {
                continue;
            }

            let mut tasks = vec![];
            for task in task_group.iter_mut() {
                // Group ordering is strict, so an invisible task also holds back
                // the tasks queued behind it
                if task.visible_at > now {
                    break;
                }

                // Copy the group's tasks out, and mark them as polled
                tasks.push((task.task.clone(), task.id.clone()));
                task.polled = true;
            }

            if !tasks.is_empty() {
                task_groups_response.insert(task_group_id.clone(), tasks);
            }
        }

        Ok(task_groups_response)
    }

    async fn delay_redelivery(
        &self,
        receipt_handle: String,
        delay: Duration,
    ) -> Result<(), TaskQueueError> {
        let mut task_groups = self.task_groups.lock().await;
        for (_, task_group) in task_groups.iter_mut() {
            for task in task_group.iter_mut() {
                if task.id == receipt_handle {
                    task.visible_at = Instant::now() + delay;
                    task.polled = false;
                    return Ok(());
                }
            }
        }

        Err(TaskQueueError::redeliver(format!("no in-flight task with ID {receipt_handle}")))
    }

    async fn delete_task(&self, task_id: String) -> Result<(), TaskQueueError> {
        let mut task_groups = self.task_groups.lock().await;
        for (_, task_group) in task_groups.iter_mut() {
            task_group.retain(|task| task.id != task_id);
        }

        Ok(())
    }
}
