//! Configuration management for the server.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Largest number of records accepted in one request
    pub max_batch_records: usize,
    /// Largest request body accepted on the sync route, in bytes
    pub max_body_bytes: usize,
    /// Size of the database connection pool
    pub db_max_connections: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        let max_batch_records = env::var("MAX_BATCH_RECORDS")
            .unwrap_or_else(|_| DEFAULT_MAX_BATCH_RECORDS.to_string())
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::InvalidNumber("MAX_BATCH_RECORDS"))?;

        let max_body_bytes = env::var("MAX_BODY_BYTES")
            .unwrap_or_else(|_| DEFAULT_MAX_BODY_BYTES.to_string())
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::InvalidNumber("MAX_BODY_BYTES"))?;

        let db_max_connections = env::var("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::InvalidNumber("DB_MAX_CONNECTIONS"))?;

        Ok(Self {
            host,
            port,
            database_url,
            max_batch_records,
            max_body_bytes,
            db_max_connections,
        })
    }
}

/// Default for `MAX_BATCH_RECORDS`.
pub const DEFAULT_MAX_BATCH_RECORDS: usize = 500;

/// Default for `MAX_BODY_BYTES`.
///
/// A full client batch is 100 records per kind of at most 64 KiB each, about
/// 13 MB of JSON; this leaves room for that. Clients split batches the server
/// still refuses.
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("{0} must be a positive integer")]
    InvalidNumber(&'static str),
}
