use std::time::Duration;

use mr_cache::CacheError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network failure, rate limiting or a 5xx from the service
    #[error("Transient remote failure: {0}")]
    Transient(String),

    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    /// The service rejected the request; retrying won't help
    #[error("Rejected by remote service: {0}")]
    Permanent(String),

    #[error("Cache failure: {0}")]
    Cache(String),
}

impl RemoteError {
    /// Whether the same call may succeed later
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RemoteError::Permanent(_))
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_retryable()
    }
}

impl From<CacheError> for RemoteError {
    fn from(e: CacheError) -> Self {
        RemoteError::Cache(e.to_string())
    }
}
