//! In-memory job store for tests and single-process use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::JobStore;
use crate::error::StoreError;
use crate::types::{Job, JobCounts, JobFilter, JobState, NewJob};

/// In-memory job store.
///
/// Every operation runs under one lock, which gives the same atomicity a
/// single-statement transition has in PostgreSQL, but only within this
/// process. Use [`PgJobStore`](super::PgJobStore) when several processes share
/// the queue.
///
/// The store keeps its own clock: wall time plus an offset that tests move
/// forward with [`advance`](Self::advance) instead of sleeping.
///
/// # Cloning
///
/// Clones share the same underlying jobs and clock.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<Mutex<Vec<Job>>>,
    offset_ms: Arc<AtomicI64>,
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// `now + duration`, saturating at the latest representable instant
fn after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    now.checked_add_signed(to_chrono(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn validate(job: &NewJob) -> Result<(), StoreError> {
    if job.max_attempts < 1 {
        return Err(StoreError::InvalidJob(format!(
            "max_attempts must be at least 1 (got {})",
            job.max_attempts
        )));
    }
    if job.job_type.trim().is_empty() {
        return Err(StoreError::InvalidJob("job type cannot be empty".into()));
    }
    Ok(())
}

impl MemoryJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The store's current time
    pub fn now(&self) -> DateTime<Utc> {
        let offset = chrono::Duration::milliseconds(self.offset_ms.load(Ordering::SeqCst));
        Utc::now()
            .checked_add_signed(offset)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Move the store's clock forward, saturating instead of wrapping
    pub fn advance(&self, by: Duration) {
        let by = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        let _ = self
            .offset_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |offset| {
                Some(offset.saturating_add(by))
            });
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    /// Apply `f` to a job only while it is processing, and only under the
    /// claim stamped `claim` when one is given
    async fn transition(
        &self,
        id: Uuid,
        claim: Option<DateTime<Utc>>,
        f: impl FnOnce(&mut Job, DateTime<Utc>),
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        let now = self.now();
        let job = jobs
            .iter_mut()
            .find(|job| {
                job.id == id
                    && job.state == JobState::Processing
                    && claim.map_or(true, |started_at| job.started_at == Some(started_at))
            })
            .ok_or(StoreError::NotFound { id })?;

        f(job, now);
        job.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, new_job: NewJob) -> Result<Job, StoreError> {
        validate(&new_job)?;

        let mut jobs = self.jobs.lock().await;
        let now = self.now();
        let job = Job {
            id: Uuid::new_v4(),
            job_type: new_job.job_type,
            payload: new_job.payload,
            state: JobState::Pending,
            attempts: 0,
            max_attempts: new_job.max_attempts,
            available_at: after(now, new_job.delay.unwrap_or_default()),
            started_at: None,
            lease_expires_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        jobs.push(job.clone());
        Ok(job)
    }

    async fn claim(&self, lease_duration: Duration) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let now = self.now();

        // Earliest eligibility first; insertion order breaks ties
        let next = jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.state == JobState::Pending && job.available_at <= now)
            .min_by_key(|(index, job)| (job.available_at, *index))
            .map(|(index, _)| index);

        let Some(index) = next else {
            return Ok(None);
        };

        let job = &mut jobs[index];
        job.state = JobState::Processing;
        job.attempts += 1;
        job.started_at = Some(now);
        job.lease_expires_at = Some(after(now, lease_duration));
        job.updated_at = now;

        Ok(Some(job.clone()))
    }

    async fn mark_succeeded(&self, id: Uuid) -> Result<(), StoreError> {
        self.transition(id, None, |job, _| {
            job.state = JobState::Succeeded;
            job.lease_expires_at = None;
        })
        .await
    }

    async fn mark_retry(&self, id: Uuid, error_message: &str, delay: Duration) -> Result<(), StoreError> {
        self.transition(id, None, |job, now| {
            job.state = JobState::Pending;
            job.available_at = after(now, delay);
            job.lease_expires_at = None;
            job.last_error = Some(error_message.to_string());
        })
        .await
    }

    async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<(), StoreError> {
        self.transition(id, None, |job, _| {
            job.state = JobState::Failed;
            job.lease_expires_at = None;
            job.last_error = Some(error_message.to_string());
        })
        .await
    }

    async fn extend_lease(&self, id: Uuid, started_at: DateTime<Utc>, lease_duration: Duration) -> Result<(), StoreError> {
        self.transition(id, Some(started_at), |job, now| {
            job.lease_expires_at = Some(after(now, lease_duration));
        })
        .await
    }

    async fn reap_expired(&self) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let now = self.now();

        let mut reaped = 0;
        for job in jobs.iter_mut() {
            let expired = job.state == JobState::Processing
                && job.lease_expires_at.is_some_and(|expires| expires <= now);
            if expired {
                job.state = JobState::Pending;
                job.available_at = now;
                job.lease_expires_at = None;
                job.updated_at = now;
                reaped += 1;
            }
        }

        Ok(reaped)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.lock().await;
        Ok(jobs.iter().find(|job| job.id == id).cloned())
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.lock().await;
        let limit = usize::try_from(filter.limit).unwrap_or(0);

        // Newest first: reverse insertion order is creation order reversed
        Ok(jobs
            .iter()
            .rev()
            .filter(|job| filter.state.map_or(true, |state| job.state == state))
            .filter(|job| {
                filter
                    .job_type
                    .as_deref()
                    .map_or(true, |job_type| job.job_type == job_type)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn counts(&self) -> Result<JobCounts, StoreError> {
        let jobs = self.jobs.lock().await;
        let mut counts = JobCounts::default();
        for job in jobs.iter() {
            counts.add(job.state, 1);
        }
        Ok(counts)
    }
}
