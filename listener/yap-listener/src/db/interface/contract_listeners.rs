//! Interface methods for interacting with the contract listeners table

use diesel::{ExpressionMethods, QueryDsl};
use diesel_async::RunQueryDsl;

use crate::db::{
    client::{DbClient, DbConn},
    error::DbError,
    models::ContractListenerModel,
    schema::contract_listeners,
};

impl DbClient {
    // -----------
    // | Setters |
    // -----------

    /// Upsert a contract listener record, replacing its subscription state
    pub async fn upsert_contract_listener(
        &self,
        listener: ContractListenerModel,
        conn: &mut DbConn<'_>,
    ) -> Result<(), DbError> {
        diesel::insert_into(contract_listeners::table)
            .values(&listener)
            .on_conflict((contract_listeners::chain_id, contract_listeners::contract_address))
            .do_update()
            .set((
                contract_listeners::abi.eq(&listener.abi),
                contract_listeners::subscribed_jobs.eq(&listener.subscribed_jobs),
                contract_listeners::events_being_listened.eq(&listener.events_being_listened),
                contract_listeners::is_active.eq(listener.is_active),
            ))
            .execute(conn)
            .await
            .map_err(DbError::query)?;

        Ok(())
    }

    /// Delete a contract listener record once no jobs subscribe to it
    pub async fn delete_contract_listener(
        &self,
        chain_id: u64,
        contract_address: &str,
        conn: &mut DbConn<'_>,
    ) -> Result<(), DbError> {
        diesel::delete(
            contract_listeners::table
                .filter(contract_listeners::chain_id.eq(chain_id as i64))
                .filter(contract_listeners::contract_address.eq(contract_address)),
        )
        .execute(conn)
        .await
        .map_err(DbError::query)?;

        Ok(())
    }

    // -----------
    // | Getters |
    // -----------

    /// Get a contract listener record by (chain, contract)
    pub async fn get_contract_listener(
        &self,
        chain_id: u64,
        contract_address: &str,
        conn: &mut DbConn<'_>,
    ) -> Result<Option<ContractListenerModel>, DbError> {
        match contract_listeners::table
            .filter(contract_listeners::chain_id.eq(chain_id as i64))
            .filter(contract_listeners::contract_address.eq(contract_address))
            .first::<ContractListenerModel>(conn)
            .await
        {
            Ok(listener) => Ok(Some(listener)),
            Err(diesel::NotFound) => Ok(None),
            Err(e) => Err(DbError::query(e)),
        }
    }

    /// Get all active contract listener records
    pub async fn get_active_contract_listeners(
        &self,
        conn: &mut DbConn<'_>,
    ) -> Result<Vec<ContractListenerModel>, DbError> {
        contract_listeners::table
            .filter(contract_listeners::is_active.eq(true))
            .load::<ContractListenerModel>(conn)
            .await
            .map_err(DbError::query)
    }
}
