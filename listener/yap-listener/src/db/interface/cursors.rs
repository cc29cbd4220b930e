//! Interface methods for interacting with the listener cursors table

use async_trait::async_trait;
use chrono::Utc;
use diesel::{ExpressionMethods, QueryDsl};
use diesel_async::RunQueryDsl;

use crate::{
    db::{
        client::{DbClient, DbConn},
        error::DbError,
        models::CursorModel,
        schema::listener_cursors,
        utils::{bigdecimal_to_block, block_to_bigdecimal},
    },
    poller::{CursorStore, error::PollerError},
};

impl DbClient {
    // -----------
    // | Setters |
    // -----------

    /// Upsert a chain's cursor to the given block number
    pub async fn upsert_cursor(
        &self,
        chain_id: u64,
        block_number: u64,
        conn: &mut DbConn<'_>,
    ) -> Result<(), DbError> {
        let cursor = CursorModel {
            chain_id: chain_id as i64,
            last_processed_block: block_to_bigdecimal(block_number),
            updated_at: Utc::now(),
        };

        diesel::insert_into(listener_cursors::table)
            .values(&cursor)
            .on_conflict(listener_cursors::chain_id)
            .do_update()
            .set((
                listener_cursors::last_processed_block.eq(&cursor.last_processed_block),
                listener_cursors::updated_at.eq(cursor.updated_at),
            ))
            .execute(conn)
            .await
            .map_err(DbError::query)?;

        Ok(())
    }

    /// Delete a chain's cursor, releasing the chain's persisted state when
    /// its last tracked contract is torn down
    pub async fn delete_cursor(
        &self,
        chain_id: u64,
        conn: &mut DbConn<'_>,
    ) -> Result<(), DbError> {
        diesel::delete(
            listener_cursors::table.filter(listener_cursors::chain_id.eq(chain_id as i64)),
        )
        .execute(conn)
        .await
        .map_err(DbError::query)?;

        Ok(())
    }

    // -----------
    // | Getters |
    // -----------

    /// Get a chain's last fully processed block, if a cursor exists
    pub async fn get_cursor(
        &self,
        chain_id: u64,
        conn: &mut DbConn<'_>,
    ) -> Result<Option<u64>, DbError> {
        match listener_cursors::table
            .filter(listener_cursors::chain_id.eq(chain_id as i64))
            .first::<CursorModel>(conn)
            .await
        {
            Ok(cursor) => Ok(Some(bigdecimal_to_block(&cursor.last_processed_block)?)),
            Err(diesel::NotFound) => Ok(None),
            Err(e) => Err(DbError::query(e)),
        }
    }
}

// -------------------------------------
// | Cursor Store Trait Implementation |
// -------------------------------------

#[async_trait]
impl CursorStore for DbClient {
    async fn load_cursor(&self, chain_id: u64) -> Result<Option<u64>, PollerError> {
        let mut conn = self.get_db_conn().await.map_err(PollerError::cursor)?;
        self.get_cursor(chain_id, &mut conn).await.map_err(PollerError::cursor)
    }

    async fn store_cursor(&self, chain_id: u64, block_number: u64) -> Result<(), PollerError> {
        let mut conn = self.get_db_conn().await.map_err(PollerError::cursor)?;
        self.upsert_cursor(chain_id, block_number, &mut conn).await.map_err(PollerError::cursor)
    }
}
