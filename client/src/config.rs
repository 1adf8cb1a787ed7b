//! Configuration management for the client.

use serene_engine::StoreLimits;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the Remote Merge Service
    pub endpoint: String,
    /// Upper bound for a single sync request
    pub request_timeout: Duration,
    /// Directory holding the durable queue
    pub data_dir: PathBuf,
    /// Maximum records per kind in one request
    pub max_batch_size: usize,
    /// Local queue limits
    pub limits: StoreLimits,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3000".to_string(),
            request_timeout: Duration::from_secs(10),
            data_dir: PathBuf::from(".serene"),
            max_batch_size: 100,
            limits: StoreLimits::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables (and `.env`), falling
    /// back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let endpoint = env::var("SERENE_ENDPOINT").unwrap_or(defaults.endpoint);
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::InvalidEndpoint(endpoint));
        }

        let request_timeout = match env::var("SERENE_TIMEOUT_MS") {
            Ok(raw) => Duration::from_millis(parse_positive("SERENE_TIMEOUT_MS", &raw)? as u64),
            Err(_) => defaults.request_timeout,
        };

        let data_dir = env::var("SERENE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let max_batch_size = match env::var("SERENE_MAX_BATCH") {
            Ok(raw) => parse_positive("SERENE_MAX_BATCH", &raw)?,
            Err(_) => defaults.max_batch_size,
        };

        let mut limits = defaults.limits;
        if let Ok(raw) = env::var("SERENE_MAX_RECORDS") {
            limits.max_records = parse_positive("SERENE_MAX_RECORDS", &raw)?;
        }

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            request_timeout,
            data_dir,
            max_batch_size,
            limits,
        })
    }
}

fn parse_positive(name: &'static str, raw: &str) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidNumber(name)),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("SERENE_ENDPOINT must start with http:// or https://, got {0}")]
    InvalidEndpoint(String),

    #[error("{0} must be a positive integer")]
    InvalidNumber(&'static str),
}
