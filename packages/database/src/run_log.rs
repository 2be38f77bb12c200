//! Run-completion log.
//!
//! Each successful stage appends one row naming the script, the task,
//! when it started, how long it took and which region it ran for.

use chrono::{DateTime, Utc};
use switchy_database::{Database, DatabaseValue};

use crate::DbError;

/// A completed run, ready to be recorded.
#[derive(Debug, Clone)]
pub struct RunLogEntry {
    /// Executable or stage name.
    pub script: String,
    /// Task description.
    pub task: String,
    /// When the stage started.
    pub started_at: DateTime<Utc>,
    /// Study region (locale) the stage ran for.
    pub region: String,
}

impl RunLogEntry {
    /// Starts timing a stage now.
    #[must_use]
    pub fn start(script: &str, task: &str, region: &str) -> Self {
        Self {
            script: script.to_string(),
            task: task.to_string(),
            started_at: Utc::now(),
            region: region.to_string(),
        }
    }

    /// Bind values for [`insert_sql`], in column order. `started_at` is
    /// stored as naive UTC.
    #[must_use]
    pub fn params(&self, elapsed_seconds: f64) -> Vec<DatabaseValue> {
        vec![
            DatabaseValue::String(self.script.clone()),
            DatabaseValue::String(self.task.clone()),
            DatabaseValue::DateTime(self.started_at.naive_utc()),
            DatabaseValue::Real64(elapsed_seconds),
            DatabaseValue::String(self.region.clone()),
        ]
    }

    /// Seconds elapsed between `started_at` and `now`.
    #[must_use]
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let millis = (now - self.started_at).num_milliseconds().max(0) as f64;
        millis / 1000.0
    }
}

/// Parameterized insert of one run into `table`.
#[must_use]
pub fn insert_sql(table: &str) -> String {
    format!(
        "INSERT INTO {table} (script, task, started_at, duration_seconds, region) \
         VALUES ($1, $2, $3, $4, $5)"
    )
}

/// Records `entry` as finished now in `table`, creating the table if
/// needed.
///
/// # Errors
///
/// Returns [`DbError`] if the table cannot be created or the row
/// cannot be inserted.
pub async fn record(db: &dyn Database, table: &str, entry: &RunLogEntry) -> Result<(), DbError> {
    let elapsed = entry.elapsed_seconds(Utc::now());

    db.exec_raw(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            script TEXT NOT NULL,
            task TEXT NOT NULL,
            started_at TIMESTAMP NOT NULL,
            duration_seconds DOUBLE PRECISION NOT NULL,
            region TEXT NOT NULL
        )"
    ))
    .await?;

    db.exec_raw_params(&insert_sql(table), &entry.params(elapsed))
        .await?;

    log::info!(
        "{}: {} for {} completed in {elapsed:.1}s (started {})",
        entry.script,
        entry.task,
        entry.region,
        entry.started_at.format("%Y-%m-%d %H:%M:%S")
    );

    Ok(())
}
