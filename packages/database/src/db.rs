//! Database connection utilities.

use liveability_region_models::config::DatabaseConfig;
use switchy_database::Database;
use switchy_database_connection::Credentials;

use crate::DbError;

/// Opens a connection to the study region database.
///
/// Configures a `statement_timeout` of zero: region builds run long
/// unions and buffers and are expected to run to completion.
///
/// # Errors
///
/// Returns [`DbError`] if the credentials are malformed or the
/// connection fails.
pub async fn connect(config: &DatabaseConfig) -> Result<Box<dyn Database>, DbError> {
    let creds = Credentials::from_url(&config.url()).map_err(|e| DbError::Connection {
        message: format!(
            "invalid connection parameters for {}@{}:{}/{}: {e}",
            config.user, config.host, config.port, config.name
        ),
    })?;

    let db = switchy_database_connection::init_postgres_raw_native_tls(creds)
        .await
        .map_err(|e| DbError::Connection {
            message: format!(
                "failed to connect to {}:{}/{}: {e}",
                config.host, config.port, config.name
            ),
        })?;

    db.exec_raw("SET statement_timeout = 0").await?;

    log::info!(
        "Connected to {}:{}/{} as {}",
        config.host,
        config.port,
        config.name,
        config.user
    );

    Ok(db)
}
