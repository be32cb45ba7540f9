//! Job table operations
//!
//! Every lifecycle transition is a single statement, so it commits atomically
//! on its own. Transitions out of `processing` are guarded by
//! `state = 'processing'`; a zero-row result means another party (the reaper,
//! or an earlier report) already moved the job, and surfaces as
//! [`StoreError::NotFound`].
//!
//! All timestamps come from the database clock (`NOW()`), never from the
//! worker, so workers with skewed clocks agree on lease expiry.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgQueryResult;
use sqlx::{Postgres, QueryBuilder};
use std::time::Duration;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{Job, JobCounts, JobFilter, JobState, NewJob};

const JOB_COLUMNS: &str = r#"
    id, type, payload, state, attempts, max_attempts, available_at,
    started_at, lease_expires_at, last_error, created_at, updated_at
"#;

fn expect_one_row(result: PgQueryResult, id: Uuid) -> Result<(), StoreError> {
    if result.rows_affected() == 1 {
        Ok(())
    } else {
        Err(StoreError::NotFound { id })
    }
}

/// Insert a new pending job
pub async fn enqueue_job<'e, E>(executor: E, job: &NewJob) -> Result<Job, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    if job.max_attempts < 1 {
        return Err(StoreError::InvalidJob(format!(
            "max_attempts must be at least 1 (got {})",
            job.max_attempts
        )));
    }
    if job.job_type.trim().is_empty() {
        return Err(StoreError::InvalidJob("job type cannot be empty".into()));
    }

    let delay_secs = job.delay.unwrap_or_default().as_secs_f64();

    let inserted = sqlx::query_as::<_, Job>(&format!(
        r#"
        INSERT INTO jobs (id, type, payload, state, attempts, max_attempts, available_at)
        VALUES ($1, $2, $3, 'pending', 0, $4, NOW() + make_interval(secs => $5))
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(&job.job_type)
    .bind(&job.payload)
    .bind(job.max_attempts)
    .bind(delay_secs)
    .fetch_one(executor)
    .await?;

    Ok(inserted)
}

/// Claim the earliest eligible pending job
///
/// `FOR UPDATE SKIP LOCKED` makes concurrent claimants pass over rows another
/// transaction is already claiming instead of waiting on them, so no two
/// callers ever receive the same job.
pub async fn claim_job<'e, E>(executor: E, lease_duration: Duration) -> Result<Option<Job>, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let claimed = sqlx::query_as::<_, Job>(
        r#"
        WITH next_job AS (
            SELECT id
            FROM jobs
            WHERE state = 'pending'
              AND available_at <= NOW()
            ORDER BY available_at ASC, created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        UPDATE jobs
        SET state = 'processing',
            attempts = jobs.attempts + 1,
            started_at = NOW(),
            lease_expires_at = NOW() + make_interval(secs => $1),
            updated_at = NOW()
        FROM next_job
        WHERE jobs.id = next_job.id
        RETURNING
            jobs.id, jobs.type, jobs.payload, jobs.state, jobs.attempts,
            jobs.max_attempts, jobs.available_at, jobs.started_at,
            jobs.lease_expires_at, jobs.last_error, jobs.created_at, jobs.updated_at
        "#,
    )
    .bind(lease_duration.as_secs_f64())
    .fetch_optional(executor)
    .await?;

    Ok(claimed)
}

/// Mark a processing job as succeeded
pub async fn mark_succeeded<'e, E>(executor: E, id: Uuid) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET state = 'succeeded',
            lease_expires_at = NULL,
            updated_at = NOW()
        WHERE id = $1
          AND state = 'processing'
        "#,
    )
    .bind(id)
    .execute(executor)
    .await?;

    expect_one_row(result, id)
}

/// Return a processing job to pending, eligible again after `delay`
pub async fn mark_retry<'e, E>(
    executor: E,
    id: Uuid,
    error_message: &str,
    delay: Duration,
) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET state = 'pending',
            available_at = NOW() + make_interval(secs => $2),
            lease_expires_at = NULL,
            last_error = $3,
            updated_at = NOW()
        WHERE id = $1
          AND state = 'processing'
        "#,
    )
    .bind(id)
    .bind(delay.as_secs_f64())
    .bind(error_message)
    .execute(executor)
    .await?;

    expect_one_row(result, id)
}

/// Mark a processing job as permanently failed
pub async fn mark_failed<'e, E>(executor: E, id: Uuid, error_message: &str) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET state = 'failed',
            lease_expires_at = NULL,
            last_error = $2,
            updated_at = NOW()
        WHERE id = $1
          AND state = 'processing'
        "#,
    )
    .bind(id)
    .bind(error_message)
    .execute(executor)
    .await?;

    expect_one_row(result, id)
}

/// Push the lease of a processing job forward
///
/// `started_at` is the value the claim returned and names that claim: once
/// the job has been reaped and claimed again, the old holder's renewal
/// matches no row.
pub async fn extend_lease<'e, E>(
    executor: E,
    id: Uuid,
    started_at: DateTime<Utc>,
    lease_duration: Duration,
) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET lease_expires_at = NOW() + make_interval(secs => $2),
            updated_at = NOW()
        WHERE id = $1
          AND state = 'processing'
          AND started_at = $3
        "#,
    )
    .bind(id)
    .bind(lease_duration.as_secs_f64())
    .bind(started_at)
    .execute(executor)
    .await?;

    expect_one_row(result, id)
}

/// Release every expired lease back to pending
///
/// `attempts` is left alone: the claim that took the lease already counted.
pub async fn reap_expired<'e, E>(executor: E) -> Result<u64, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET state = 'pending',
            available_at = NOW(),
            lease_expires_at = NULL,
            updated_at = NOW()
        WHERE state = 'processing'
          AND lease_expires_at <= NOW()
        "#,
    )
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Get job by ID
pub async fn get_job<'e, E>(executor: E, id: Uuid) -> Result<Option<Job>, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let job = sqlx::query_as::<_, Job>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await?;

    Ok(job)
}

/// List jobs with filters, newest first
pub async fn list_jobs<'e, E>(executor: E, filter: &JobFilter) -> Result<Vec<Job>, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {JOB_COLUMNS} FROM jobs WHERE 1=1"));

    if let Some(state) = filter.state {
        query.push(" AND state = ").push_bind(state.as_str());
    }
    if let Some(job_type) = &filter.job_type {
        query.push(" AND type = ").push_bind(job_type.clone());
    }

    query
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(filter.limit.max(0));

    let jobs = query.build_query_as::<Job>().fetch_all(executor).await?;

    Ok(jobs)
}

/// Count jobs per state
pub async fn count_jobs<'e, E>(executor: E) -> Result<JobCounts, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let rows: Vec<(JobState, i64)> =
        sqlx::query_as("SELECT state, COUNT(*) FROM jobs GROUP BY state")
            .fetch_all(executor)
            .await?;

    let mut counts = JobCounts::default();
    for (state, count) in rows {
        counts.add(state, count);
    }

    Ok(counts)
}
