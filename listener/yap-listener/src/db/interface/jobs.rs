//! Interface methods for interacting with the jobs table

use diesel::{ExpressionMethods, QueryDsl};
use diesel_async::RunQueryDsl;

use crate::db::{
    client::{DbClient, DbConn},
    error::DbError,
    models::{JobModel, NewJob},
    schema::jobs,
};

impl DbClient {
    // -----------
    // | Setters |
    // -----------

    /// Insert a job record.
    ///
    /// Jobs are create-once; callers check for an existing job ID before
    /// inserting, so a conflict here surfaces as a query error.
    pub async fn insert_job(&self, job: NewJob, conn: &mut DbConn<'_>) -> Result<(), DbError> {
        diesel::insert_into(jobs::table)
            .values(&job)
            .execute(conn)
            .await
            .map_err(DbError::query)?;

        Ok(())
    }

    /// Deactivate a job, recording its distinct counterparty addresses
    pub async fn deactivate_job(
        &self,
        job_id: &str,
        event_addresses: Vec<String>,
        conn: &mut DbConn<'_>,
    ) -> Result<(), DbError> {
        diesel::update(jobs::table.filter(jobs::id.eq(job_id)))
            .set((jobs::is_active.eq(false), jobs::event_addresses.eq(event_addresses)))
            .execute(conn)
            .await
            .map_err(DbError::query)?;

        Ok(())
    }

    // -----------
    // | Getters |
    // -----------

    /// Get a job record by ID
    pub async fn get_job(
        &self,
        job_id: &str,
        conn: &mut DbConn<'_>,
    ) -> Result<Option<JobModel>, DbError> {
        match jobs::table.filter(jobs::id.eq(job_id)).first::<JobModel>(conn).await {
            Ok(job) => Ok(Some(job)),
            Err(diesel::NotFound) => Ok(None),
            Err(e) => Err(DbError::query(e)),
        }
    }

    /// Get all active job records
    pub async fn get_active_jobs(&self, conn: &mut DbConn<'_>) -> Result<Vec<JobModel>, DbError> {
        jobs::table
            .filter(jobs::is_active.eq(true))
            .load::<JobModel>(conn)
            .await
            .map_err(DbError::query)
    }

    /// Get the active jobs subscribed to a (chain, contract) pair
    pub async fn get_active_jobs_for_contract(
        &self,
        chain_id: u64,
        contract_address: &str,
        conn: &mut DbConn<'_>,
    ) -> Result<Vec<JobModel>, DbError> {
        jobs::table
            .filter(jobs::is_active.eq(true))
            .filter(jobs::chain_id.eq(chain_id as i64))
            .filter(jobs::contract_address.eq(contract_address))
            .load::<JobModel>(conn)
            .await
            .map_err(DbError::query)
    }
}
