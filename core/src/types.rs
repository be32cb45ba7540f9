use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle state of a job.
///
/// `Succeeded` and `Failed` are terminal: nothing moves a job out of them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Succeeded,
        JobState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// Whether the lifecycle graph has an edge from `self` to `next`.
    ///
    /// ```text
    /// pending --claim--> processing
    /// processing --succeed/fail--> succeeded | failed
    /// processing --retry/reap--> pending
    /// processing --renew--> processing
    /// ```
    pub fn can_transition_to(&self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Pending, JobState::Processing) => true,
            (JobState::Processing, _) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            _ => Err(format!(
                "Invalid state: {}. Must be one of: pending, processing, succeeded, failed",
                s
            )),
        }
    }
}

/// A job record as stored in the `jobs` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct Job {
    pub id: Uuid,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub job_type: String,
    pub payload: Vec<u8>,
    pub state: JobState,

    pub attempts: i32,
    pub max_attempts: i32,

    pub available_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// True once the retry budget has been used up by claims.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Producer input for a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub job_type: String,
    pub payload: Vec<u8>,
    pub max_attempts: i32,
    /// Initial delay before the job becomes eligible.
    pub delay: Option<Duration>,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            job_type: job_type.into(),
            payload: payload.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: None,
        }
    }

    pub fn max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub job_type: Option<String>,
    pub limit: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            state: None,
            job_type: None,
            limit: 20,
        }
    }
}

/// Number of jobs in each lifecycle state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobCounts {
    pub pending: i64,
    pub processing: i64,
    pub succeeded: i64,
    pub failed: i64,
}

impl JobCounts {
    pub fn add(&mut self, state: JobState, count: i64) {
        match state {
            JobState::Pending => self.pending += count,
            JobState::Processing => self.processing += count,
            JobState::Succeeded => self.succeeded += count,
            JobState::Failed => self.failed += count,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.succeeded + self.failed
    }
}
