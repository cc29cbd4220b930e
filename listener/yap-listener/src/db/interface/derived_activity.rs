//! Interface methods for interacting with the derived address activity table

use diesel::{
    BoolExpressionMethods, ExpressionMethods,
    dsl::sql,
    sql_types::{Nullable, Text},
    upsert::excluded,
};
use diesel_async::RunQueryDsl;

use crate::db::{
    client::{DbClient, DbConn},
    error::DbError,
    models::NewDerivedActivity,
    schema::derived_address_activity,
};

impl DbClient {
    // -----------
    // | Setters |
    // -----------

    /// Upsert a batch of derived-activity deltas.
    ///
    /// Conflicts on `(yapper_id, address, job_id)` accumulate instead of
    /// overwriting, so replayed cluster tasks converge on the same totals.
    pub async fn upsert_derived_activity(
        &self,
        deltas: Vec<NewDerivedActivity>,
        conn: &mut DbConn<'_>,
    ) -> Result<(), DbError> {
        if deltas.is_empty() {
            return Ok(());
        }

        diesel::insert_into(derived_address_activity::table)
            .values(&deltas)
            .on_conflict((
                derived_address_activity::yapper_id,
                derived_address_activity::address,
                derived_address_activity::job_id,
            ))
            .do_update()
            .set((
                derived_address_activity::total_value.eq(derived_address_activity::total_value
                    + excluded(derived_address_activity::total_value)),
                derived_address_activity::interaction_count
                    .eq(derived_address_activity::interaction_count
                        + excluded(derived_address_activity::interaction_count)),
                derived_address_activity::interacted.eq(derived_address_activity::interacted
                    .or(excluded(derived_address_activity::interacted))),
                derived_address_activity::last_event_name.eq(sql::<Nullable<Text>>(
                    "COALESCE(excluded.last_event_name, derived_address_activity.last_event_name)",
                )),
                derived_address_activity::last_transaction_hash.eq(sql::<Nullable<Text>>(
                    "COALESCE(excluded.last_transaction_hash, \
                     derived_address_activity.last_transaction_hash)",
                )),
                derived_address_activity::last_updated
                    .eq(excluded(derived_address_activity::last_updated)),
            ))
            .execute(conn)
            .await
            .map_err(DbError::query)?;

        Ok(())
    }
}
