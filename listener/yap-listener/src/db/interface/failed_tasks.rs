//! Interface methods for interacting with the failed tasks table

use diesel_async::RunQueryDsl;

use crate::db::{
    client::{DbClient, DbConn},
    error::DbError,
    models::NewFailedTask,
    schema::failed_tasks,
};

impl DbClient {
    // -----------
    // | Setters |
    // -----------

    /// Record a task whose retries were exhausted
    pub async fn insert_failed_task(
        &self,
        task: NewFailedTask,
        conn: &mut DbConn<'_>,
    ) -> Result<(), DbError> {
        diesel::insert_into(failed_tasks::table)
            .values(&task)
            .execute(conn)
            .await
            .map_err(DbError::query)?;

        Ok(())
    }
}
