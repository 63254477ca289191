//! Error taxonomy for the call layer, the cache stores, and configuration.
//!
//! Every `ApiError` is recoverable at the batch level: the orchestrator folds
//! it into a failed `BatchResult` and keeps going. Only `ConfigError` aborts a
//! run, and only before any item has been dispatched.

use thiserror::Error;

/// Terminal outcome of one structured call after the client has exhausted its
/// retry and repair budget (or hit a non-retryable condition).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("api communication error{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Communication {
        message: String,
        status: Option<u16>,
    },

    #[error("api rate limit exceeded; last advised retry interval {retry_after_secs}s")]
    RateLimit { retry_after_secs: u64 },

    #[error("api request timed out after {bound_secs}s")]
    Timeout { bound_secs: f64 },

    #[error("response failed '{schema}' schema validation: {detail}")]
    Schema { schema: String, detail: String },

    #[error("could not parse model output as JSON: {detail}")]
    Parse { raw: String, detail: String },
}

impl ApiError {
    /// Whether the client retries this failure mode locally. Terminal schema
    /// and parse failures are surfaced to the caller; the orchestrator decides
    /// what to do with the item.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Communication { .. } | ApiError::RateLimit { .. } | ApiError::Timeout { .. }
        )
    }
}

/// Failures inside the L1/L2 stores. Readers degrade these to cache misses;
/// writers log and continue, since a lost cache entry only costs a repeat
/// remote call.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Configuration problems (missing credentials, unreadable config file,
/// unusable store paths). The only error class that aborts the whole run.
#[derive(Debug, Error)]
#[error("config error: {0}")]
pub struct ConfigError(pub String);
