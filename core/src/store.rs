//! Job record store
//!
//! [`JobStore`] is the set of atomic lifecycle transitions the worker loop and
//! reaper drive. [`PgJobStore`] is the production backend; [`MemoryJobStore`]
//! keeps everything in process for tests and single-process embedding.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::db;
use crate::error::StoreError;
use crate::types::{Job, JobCounts, JobFilter, NewJob};

mod memory;

pub use memory::MemoryJobStore;

#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Insert a new pending job with `attempts = 0`
    async fn enqueue(&self, job: NewJob) -> Result<Job, StoreError>;

    /// Claim the earliest eligible pending job, holding it for `lease_duration`
    ///
    /// Returns `Ok(None)` if no job is eligible. Never waits on jobs that a
    /// concurrent claimant has locked.
    async fn claim(&self, lease_duration: Duration) -> Result<Option<Job>, StoreError>;

    /// `processing → succeeded`
    async fn mark_succeeded(&self, id: Uuid) -> Result<(), StoreError>;

    /// `processing → pending`, eligible again after `delay`
    async fn mark_retry(&self, id: Uuid, error_message: &str, delay: Duration) -> Result<(), StoreError>;

    /// `processing → failed`
    async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<(), StoreError>;

    /// Renew the lease held by the claim that stamped `started_at`
    ///
    /// NotFound once that claim is gone, even if the job was claimed again.
    async fn extend_lease(&self, id: Uuid, started_at: DateTime<Utc>, lease_duration: Duration) -> Result<(), StoreError>;

    /// Return every job whose lease has expired to pending; returns how many
    async fn reap_expired(&self) -> Result<u64, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError>;

    async fn counts(&self) -> Result<JobCounts, StoreError>;
}

/// PostgreSQL-backed store
///
/// Safe to share between any number of workers and processes: exclusion is
/// provided by row locks, not by anything held in this struct.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<Job, StoreError> {
        db::jobs::enqueue_job(&self.pool, &job).await
    }

    async fn claim(&self, lease_duration: Duration) -> Result<Option<Job>, StoreError> {
        db::jobs::claim_job(&self.pool, lease_duration).await
    }

    async fn mark_succeeded(&self, id: Uuid) -> Result<(), StoreError> {
        db::jobs::mark_succeeded(&self.pool, id).await
    }

    async fn mark_retry(&self, id: Uuid, error_message: &str, delay: Duration) -> Result<(), StoreError> {
        db::jobs::mark_retry(&self.pool, id, error_message, delay).await
    }

    async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<(), StoreError> {
        db::jobs::mark_failed(&self.pool, id, error_message).await
    }

    async fn extend_lease(&self, id: Uuid, started_at: DateTime<Utc>, lease_duration: Duration) -> Result<(), StoreError> {
        db::jobs::extend_lease(&self.pool, id, started_at, lease_duration).await
    }

    async fn reap_expired(&self) -> Result<u64, StoreError> {
        db::jobs::reap_expired(&self.pool).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        db::jobs::get_job(&self.pool, id).await
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        db::jobs::list_jobs(&self.pool, filter).await
    }

    async fn counts(&self) -> Result<JobCounts, StoreError> {
        db::jobs::count_jobs(&self.pool).await
    }
}
