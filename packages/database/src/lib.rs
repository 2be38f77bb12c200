#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `PostGIS` access for study region runs.
//!
//! Every output table is replaced wholesale: a [`sql::TablePlan`] holds the
//! drop, create and index statements for one table and
//! [`catalog::apply_plan`] runs them inside a single transaction, so a
//! failed create never leaves a half-built table behind. Spatial work is
//! plain SQL sent through `exec_raw()`.

pub mod catalog;
pub mod db;
pub mod run_log;
pub mod sql;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Database query error.
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// A specific statement failed.
    #[error("Statement failed ({source}):\n{sql}")]
    Statement {
        /// The SQL that failed.
        sql: String,
        /// Underlying database error.
        source: switchy_database::DatabaseError,
    },

    /// Connection setup failed.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of what went wrong.
        message: String,
    },

    /// A query returned no row or a column of the wrong type.
    #[error("Conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}
