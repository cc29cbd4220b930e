//! Interface methods for interacting with the contract events table

use std::collections::BTreeSet;

use diesel::{ExpressionMethods, QueryDsl};
use diesel_async::RunQueryDsl;

use crate::db::{
    client::{DbClient, DbConn},
    error::DbError,
    models::{ContractEventModel, NewContractEvent},
    schema::contract_events,
};

impl DbClient {
    // -----------
    // | Setters |
    // -----------

    /// Insert a batch of contract event records
    pub async fn insert_contract_events(
        &self,
        events: Vec<NewContractEvent>,
        conn: &mut DbConn<'_>,
    ) -> Result<(), DbError> {
        if events.is_empty() {
            return Ok(());
        }

        diesel::insert_into(contract_events::table)
            .values(&events)
            .execute(conn)
            .await
            .map_err(DbError::query)?;

        Ok(())
    }

    // -----------
    // | Getters |
    // -----------

    /// Get all event records routed to a job
    pub async fn get_events_for_job(
        &self,
        job_id: &str,
        conn: &mut DbConn<'_>,
    ) -> Result<Vec<ContractEventModel>, DbError> {
        contract_events::table
            .filter(contract_events::job_id.eq(job_id))
            .order(contract_events::block_number.asc())
            .load::<ContractEventModel>(conn)
            .await
            .map_err(DbError::query)
    }

    /// Get the distinct counterparty addresses observed across a job's events,
    /// senders and receivers alike
    pub async fn get_distinct_job_addresses(
        &self,
        job_id: &str,
        conn: &mut DbConn<'_>,
    ) -> Result<Vec<String>, DbError> {
        let senders: Vec<String> = contract_events::table
            .filter(contract_events::job_id.eq(job_id))
            .select(contract_events::sender)
            .distinct()
            .load::<String>(conn)
            .await
            .map_err(DbError::query)?;

        let receivers: Vec<String> = contract_events::table
            .filter(contract_events::job_id.eq(job_id))
            .select(contract_events::receiver)
            .distinct()
            .load::<String>(conn)
            .await
            .map_err(DbError::query)?;

        let addresses: BTreeSet<String> = senders.into_iter().chain(receivers).collect();
        Ok(addresses.into_iter().collect())
    }
}
