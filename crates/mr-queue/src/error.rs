use mr_common::ContentRef;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("{0} is already queued")]
    AlreadyQueued(ContentRef),

    #[error("{0} has already been sent")]
    AlreadySent(ContentRef),

    #[error("{0} is not queued")]
    NotQueued(ContentRef),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl QueueError {
    /// Caller misuse; retrying the same call cannot succeed
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            QueueError::AlreadyQueued(_) | QueueError::AlreadySent(_) | QueueError::NotQueued(_)
        )
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        QueueError::Database(e.to_string())
    }
}
