//! Handlers for each task kind
//!
//! Every handler is idempotent and commutative under redelivery: the cluster
//! handler's writes merge through the derived-activity upsert, the creation
//! notification is deduplicated upstream by its idempotency key, and the
//! lifecycle handlers are no-ops when their job is already in the target
//! state.

use std::str::FromStr;

use alloy_primitives::Address;
use chrono::Utc;
use tracing::{debug, info, warn};
use yap_listener_api::types::tasks::{
    EventCreatedTask, RecordYapperClusterTask, StopJobTask, TaskEnvelope, TaskMessage,
    UpdateLeaderboardTask,
};

use crate::{
    db::models::NewDerivedActivity,
    enrichment::cluster_addresses,
    queue::TaskQueue,
    types::dedup_job_events,
    worker::{TaskWorker, error::WorkerError},
};

impl TaskWorker {
    /// Dispatch a task to its handler
    pub(super) async fn handle_task(&self, task: &TaskMessage) -> Result<(), WorkerError> {
        match task {
            TaskMessage::EventCreated(task) => self.handle_event_created(task).await,
            TaskMessage::RecordYapperCluster(task) => self.handle_yapper_cluster(task).await,
            TaskMessage::StopJob(task) => self.handle_stop_job(task).await,
            TaskMessage::UpdateLeaderboard(task) => self.handle_update_leaderboard(task).await,
        }
    }

    /// Forward a creation event to the upstream yap API.
    ///
    /// The notify call is the one enrichment path whose failure propagates,
    /// so the queue retries it rather than dropping the notification.
    async fn handle_event_created(&self, task: &EventCreatedTask) -> Result<(), WorkerError> {
        info!(
            "notifying upstream of creation for job {} (domain {}) on chain {}",
            task.job_id, task.domain_id, task.chain_id
        );
        self.enricher.notify_event_created(task).await?;
        Ok(())
    }

    /// Recompute one yapper's derived address-activity cluster.
    ///
    /// The yapper's address cluster is assembled from their wallet plus the
    /// best-effort enrichment sources; each clustered address is then matched
    /// against the job's deduplicated event snapshot and merged into the
    /// derived-activity table.
    async fn handle_yapper_cluster(
        &self,
        task: &RecordYapperClusterTask,
    ) -> Result<(), WorkerError> {
        let yapper = &task.yapper;
        let events = dedup_job_events(task.events.clone());

        let wallet = match Address::from_str(&yapper.wallet_address) {
            Ok(wallet) => Some(wallet),
            Err(e) => {
                warn!("yapper {} has an unparseable wallet address: {e}", yapper.yapper_id);
                None
            },
        };

        let connected = self.enricher.get_connected_addresses(yapper).await;
        let named = self.enricher.resolve_named_addresses(yapper).await;
        let cluster = cluster_addresses(wallet, connected.into_iter().chain(named));

        if cluster.is_empty() {
            debug!("yapper {} resolved to an empty cluster, skipping", yapper.yapper_id);
            return Ok(());
        }

        let deltas: Vec<NewDerivedActivity> = cluster
            .into_iter()
            .map(|address| {
                let matched =
                    events.iter().find(|e| e.sender == address || e.receiver == address);
                NewDerivedActivity::new(yapper, address, matched)
            })
            .collect();

        self.store.upsert_derived_activity(deltas).await?;
        Ok(())
    }

    /// Deactivate a job whose activity window has closed
    async fn handle_stop_job(&self, task: &StopJobTask) -> Result<(), WorkerError> {
        let found = self.job_control.stop_job(&task.job_id).await?;
        if !found {
            // Already unsubscribed; a redelivered stop is a no-op
            debug!("stop-job for unknown or inactive job {}", task.job_id);
        }
        Ok(())
    }

    /// Recompute a job's activity by fanning out a cluster task per enrolled
    /// yapper, then re-schedule the next run while the job's window is open
    async fn handle_update_leaderboard(
        &self,
        task: &UpdateLeaderboardTask,
    ) -> Result<(), WorkerError> {
        let Some(job) = self.store.get_job(&task.job_id).await? else {
            debug!("leaderboard update for unknown job {}, dropping", task.job_id);
            return Ok(());
        };
        if !job.is_active {
            debug!("job {} is inactive, halting leaderboard updates", task.job_id);
            return Ok(());
        }

        // Snapshot the job's deduplicated events once and share the snapshot
        // across the fan-out
        let records = self
            .store
            .get_events_for_job(&task.job_id)
            .await?
            .iter()
            .map(|event| event.to_job_record())
            .collect::<Result<Vec<_>, _>>()?;
        let events = dedup_job_events(records);

        let yappers = self.enricher.get_job_yappers(&task.job_id).await;
        info!(
            "leaderboard update for job {}: {} yappers over {} events",
            task.job_id,
            yappers.len(),
            events.len()
        );

        let now = Utc::now();
        for yapper in yappers {
            let cluster_task = TaskMessage::RecordYapperCluster(RecordYapperClusterTask {
                yapper,
                chain_id: job.chain_id as u64,
                events: events.clone(),
            });

            // Key each run's fan-out separately so recomputation is not
            // deduplicated against the previous run's tasks
            let deduplication_id =
                format!("{}-run-{}", cluster_task.idempotency_key(), now.timestamp());
            let task_group = cluster_task.message_group();
            self.queue
                .send_task(TaskEnvelope::new(cluster_task), deduplication_id, task_group)
                .await?;
        }

        // Re-schedule the next run unless it would land past the job's end
        let interval = chrono::Duration::seconds(task.interval_secs as i64);
        let window_open = job.ends_at.is_none_or(|ends_at| now + interval < ends_at);
        if window_open {
            let next = TaskMessage::UpdateLeaderboard(task.clone());
            let next_run = now + interval;
            let deduplication_id =
                format!("{}-next-{}", next.idempotency_key(), next_run.timestamp());
            let task_group = next.message_group();
            self.queue
                .send_task(TaskEnvelope::scheduled(next, next_run), deduplication_id, task_group)
                .await?;
        }

        Ok(())
    }
}
