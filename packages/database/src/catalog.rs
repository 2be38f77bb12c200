//! Catalog lookups and atomic application of table plans.

use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};

use crate::DbError;
use crate::sql::{TablePlan, drop_table};

/// Returns `true` if `table` exists in the current schema.
///
/// This is the re-entrancy check for expensive steps: callers skip an
/// import when its output table is already present.
///
/// # Errors
///
/// Returns [`DbError`] if the catalog query fails.
pub async fn table_exists(db: &dyn Database, table: &str) -> Result<bool, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT COUNT(*) as count FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1",
            &[DatabaseValue::String(table.to_string())],
        )
        .await?;
    let count: i64 = rows.first().map_or(0, |r| r.to_value("count").unwrap_or(0));
    Ok(count > 0)
}

/// Returns the number of rows in `table`.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn count_rows(db: &dyn Database, table: &str) -> Result<u64, DbError> {
    let rows = db
        .query_raw_params(&format!("SELECT COUNT(*) as count FROM {table}"), &[])
        .await?;
    let count: i64 = rows.first().map_or(0, |r| r.to_value("count").unwrap_or(0));

    Ok(u64::try_from(count).unwrap_or_default())
}

/// Drops `table` if it exists.
///
/// # Errors
///
/// Returns [`DbError`] if the statement fails.
pub async fn drop_if_exists(db: &dyn Database, table: &str) -> Result<(), DbError> {
    let sql = drop_table(table);
    db.exec_raw(&sql)
        .await
        .map_err(|source| DbError::Statement { sql, source })
}

/// Runs every statement of `plan` inside one transaction.
///
/// On the first failure the transaction is rolled back, so the target
/// table is either fully rebuilt or left as it was.
///
/// # Errors
///
/// Returns [`DbError::Statement`] with the failing SQL, or
/// [`DbError::Database`] if the transaction itself cannot be managed.
pub async fn apply_plan(db: &dyn Database, plan: &TablePlan) -> Result<(), DbError> {
    log::debug!("Building {} ({} statements)", plan.table, plan.statements.len());

    let txn = db.begin_transaction().await?;

    for sql in &plan.statements {
        log::trace!("{sql}");
        if let Err(source) = txn.exec_raw(sql).await {
            log::error!("Failed to build {}; rolling back", plan.table);
            txn.rollback().await?;
            return Err(DbError::Statement {
                sql: sql.clone(),
                source,
            });
        }
    }

    txn.commit().await?;
    log::info!("Created {}", plan.table);
    Ok(())
}
