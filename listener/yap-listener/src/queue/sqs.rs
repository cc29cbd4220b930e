//! Task queue trait implementation for AWS SQS

use std::{marker::PhantomData, time::Duration};

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_sqs::{Client as SqsClient, types::MessageSystemAttributeName};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::queue::{TaskGroupsResponse, TaskQueue, error::TaskQueueError};

// -------------
// | Constants |
// -------------

/// The maximum number of messages to receive from SQS
const MAX_RECV_MESSAGES: i32 = 10;

/// The maximum visibility timeout SQS supports on a message, in seconds
const MAX_VISIBILITY_SECS: u64 = 43_200;

// ------------------
// | SQS Task Queue |
// ------------------

/// A struct wrapping an AWS SQS client for which we implement the abstract
/// task queue trait
pub struct SqsTaskQueue<T> {
    /// The AWS SQS client
    pub sqs_client: SqsClient,
    /// The URL of the AWS SQS queue
    pub sqs_queue_url: String,
    /// The task type supported by the queue
    pub task_type: PhantomData<T>,
}

impl<T> SqsTaskQueue<T> {
    /// Create a new SQS task queue
    pub async fn new(region: String, sqs_queue_url: String) -> Self {
        let config = aws_config::from_env().region(Region::new(region)).load().await;

        let sqs_client = SqsClient::new(&config);

        Self { sqs_client, sqs_queue_url, task_type: PhantomData }
    }
}

#[async_trait]
impl<T: Serialize + for<'de> Deserialize<'de> + Send + Sync> TaskQueue for SqsTaskQueue<T> {
    type Task = T;

    /// FIFO queues reject per-message `DelaySeconds`, so a send carries no
    /// delay; deferred execution is expressed through `delay_redelivery`
    async fn send_task(
        &self,
        task: Self::Task,
        deduplication_id: String,
        task_group: String,
    ) -> Result<(), TaskQueueError> {
        let task_body = serde_json::to_string(&task)?;

        self.sqs_client
            .send_message()
            .queue_url(&self.sqs_queue_url)
            .message_deduplication_id(deduplication_id)
            .message_group_id(task_group)
            .message_body(task_body)
            .send()
            .await
            .map_err(TaskQueueError::send)?;

        Ok(())
    }

    async fn poll_tasks(&self) -> Result<TaskGroupsResponse<Self::Task>, TaskQueueError> {
        let messages = self
            .sqs_client
            .receive_message()
            .max_number_of_messages(MAX_RECV_MESSAGES)
            .message_system_attribute_names(MessageSystemAttributeName::MessageGroupId)
            .queue_url(&self.sqs_queue_url)
            .send()
            .await
            .map_err(TaskQueueError::poll)?;

        // Group messages by message group ID.
        // SQS may return messages from multiple message groups in one
        // `receive_message()` call; tasks must be processed sequentially within
        // a group but may be processed concurrently across groups.
        let mut task_groups: TaskGroupsResponse<Self::Task> = TaskGroupsResponse::new();
        for sqs_message in messages.messages.unwrap_or_default() {
            let task_group_id = sqs_message
                .attributes()
                .and_then(|a| a.get(&MessageSystemAttributeName::MessageGroupId).cloned());

            if task_group_id.is_none() {
                warn!(
                    "Message {} from SQS has no message group ID, skipping",
                    sqs_message.message_id().unwrap_or_default()
                );
                continue;
            }

            let task_data = task_group_id.zip(sqs_message.body).zip(sqs_message.receipt_handle);

            if let Some(((task_group_id, task_body), receipt_handle)) = task_data {
                let task: Self::Task = serde_json::from_str(&task_body)?;

                task_groups.entry(task_group_id).or_default().push((task, receipt_handle));
            }
        }

        Ok(task_groups)
    }

    async fn delay_redelivery(
        &self,
        receipt_handle: String,
        delay: Duration,
    ) -> Result<(), TaskQueueError> {
        // SQS clamps visibility timeouts to 12 hours
        let timeout_secs = delay.as_secs().min(MAX_VISIBILITY_SECS) as i32;

        self.sqs_client
            .change_message_visibility()
            .queue_url(&self.sqs_queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(timeout_secs)
            .send()
            .await
            .map_err(TaskQueueError::redeliver)?;

        Ok(())
    }

    async fn delete_task(&self, deletion_id: String) -> Result<(), TaskQueueError> {
        self.sqs_client
            .delete_message()
            .queue_url(&self.sqs_queue_url)
            .receipt_handle(deletion_id)
            .send()
            .await
            .map_err(TaskQueueError::delete)?;

        Ok(())
    }
}
