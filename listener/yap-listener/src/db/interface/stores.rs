//! Store trait implementations binding the worker and lifecycle persistence
//! seams to the database client
//!
//! Each method acquires its own pooled connection and delegates to the
//! corresponding query helper.

use async_trait::async_trait;

use crate::{
    db::{
        client::DbClient,
        error::DbError,
        models::{
            ContractEventModel, ContractListenerModel, JobModel, NewDerivedActivity,
            NewFailedTask, NewJob,
        },
    },
    lifecycle::ListenerStore,
    worker::WorkerStore,
};

// ----------------
// | Worker Store |
// ----------------

#[async_trait]
impl WorkerStore for DbClient {
    async fn get_job(&self, job_id: &str) -> Result<Option<JobModel>, DbError> {
        let mut conn = self.get_db_conn().await?;
        self.get_job(job_id, &mut conn).await
    }

    async fn get_events_for_job(&self, job_id: &str) -> Result<Vec<ContractEventModel>, DbError> {
        let mut conn = self.get_db_conn().await?;
        self.get_events_for_job(job_id, &mut conn).await
    }

    async fn upsert_derived_activity(
        &self,
        deltas: Vec<NewDerivedActivity>,
    ) -> Result<(), DbError> {
        let mut conn = self.get_db_conn().await?;
        self.upsert_derived_activity(deltas, &mut conn).await
    }

    async fn record_failed_task(&self, task: NewFailedTask) -> Result<(), DbError> {
        let mut conn = self.get_db_conn().await?;
        self.insert_failed_task(task, &mut conn).await
    }
}

// ------------------
// | Listener Store |
// ------------------

#[async_trait]
impl ListenerStore for DbClient {
    async fn get_job(&self, job_id: &str) -> Result<Option<JobModel>, DbError> {
        let mut conn = self.get_db_conn().await?;
        self.get_job(job_id, &mut conn).await
    }

    async fn insert_job(&self, job: NewJob) -> Result<(), DbError> {
        let mut conn = self.get_db_conn().await?;
        self.insert_job(job, &mut conn).await
    }

    async fn deactivate_job(
        &self,
        job_id: &str,
        event_addresses: Vec<String>,
    ) -> Result<(), DbError> {
        let mut conn = self.get_db_conn().await?;
        self.deactivate_job(job_id, event_addresses, &mut conn).await
    }

    async fn get_active_jobs(&self) -> Result<Vec<JobModel>, DbError> {
        let mut conn = self.get_db_conn().await?;
        self.get_active_jobs(&mut conn).await
    }

    async fn get_active_jobs_for_contract(
        &self,
        chain_id: u64,
        contract_address: &str,
    ) -> Result<Vec<JobModel>, DbError> {
        let mut conn = self.get_db_conn().await?;
        self.get_active_jobs_for_contract(chain_id, contract_address, &mut conn).await
    }

    async fn get_distinct_job_addresses(&self, job_id: &str) -> Result<Vec<String>, DbError> {
        let mut conn = self.get_db_conn().await?;
        self.get_distinct_job_addresses(job_id, &mut conn).await
    }

    async fn get_contract_listener(
        &self,
        chain_id: u64,
        contract_address: &str,
    ) -> Result<Option<ContractListenerModel>, DbError> {
        let mut conn = self.get_db_conn().await?;
        self.get_contract_listener(chain_id, contract_address, &mut conn).await
    }

    async fn upsert_contract_listener(
        &self,
        listener: ContractListenerModel,
    ) -> Result<(), DbError> {
        let mut conn = self.get_db_conn().await?;
        self.upsert_contract_listener(listener, &mut conn).await
    }

    async fn delete_contract_listener(
        &self,
        chain_id: u64,
        contract_address: &str,
    ) -> Result<(), DbError> {
        let mut conn = self.get_db_conn().await?;
        self.delete_contract_listener(chain_id, contract_address, &mut conn).await
    }

    async fn get_active_contract_listeners(&self) -> Result<Vec<ContractListenerModel>, DbError> {
        let mut conn = self.get_db_conn().await?;
        self.get_active_contract_listeners(&mut conn).await
    }

    async fn delete_cursor(&self, chain_id: u64) -> Result<(), DbError> {
        let mut conn = self.get_db_conn().await?;
        self.delete_cursor(chain_id, &mut conn).await
    }
}
