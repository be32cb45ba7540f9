//! Error types for job store operations.

use thiserror::Error;
use uuid::Uuid;

/// Errors returned by [`JobStore`](crate::store::JobStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The transition matched no row: the job is not processing anymore.
    ///
    /// Either its lease was reaped or its outcome was already reported. The
    /// row's current state is authoritative; callers log this and move on.
    #[error("job {id} is not held in the processing state")]
    NotFound { id: Uuid },

    /// The producer supplied a job the store cannot accept.
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// Connectivity or query failure talking to the database.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
