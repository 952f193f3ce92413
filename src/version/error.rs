use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unauthorized for {registry}: status {status}")]
    Unauthorized { registry: String, status: u16 },

    #[error("Rate limited: retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RegistryError {
    /// Transient failures worth another attempt: network errors and 5xx responses
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::Network(_) => true,
            RegistryError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Update check failed for {image}: {source}")]
    CheckFailed {
        image: String,
        #[source]
        source: Arc<RegistryError>,
    },
}
