//! Worker loop
//!
//! A [`Worker`] drives one job at a time through the lifecycle: claim, run the
//! handler, report the outcome. Claim errors and lost races are logged and the
//! loop keeps going; nothing in steady state is fatal.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::StoreError;
use crate::handler::{HandlerRegistry, JobContext};
use crate::lease::{LeaseSettings, MIN_RENEW_INTERVAL};
use crate::retry::{Backoff, RetryPolicy};
use crate::store::JobStore;
use crate::types::Job;

mod pool;


pub use pool::WorkerPool;

/// Timing knobs for a single worker loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub lease: LeaseSettings,
    /// Sleep when no job is eligible
    pub idle_interval: Duration,
    /// Sleep after a claim fails
    pub error_backoff: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for WorkerSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            lease: config.lease(),
            idle_interval: config.idle_interval(),
            error_backoff: config.error_backoff(),
        }
    }
}

/// What the worker decided after running a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Retrying { delay: Duration },
    Failed,
}

/// Whether the store accepted the outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Recorded,
    /// The job was no longer ours (reaped or already reported)
    LeaseLost,
    /// The report could not reach the store; the lease will expire and the
    /// reaper will return the job to pending
    StoreError,
}

/// Result of one processed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub job_id: Uuid,
    pub attempts: i32,
    pub outcome: Outcome,
    pub ack: Ack,
    /// Handler failure message, if any
    pub error: Option<String>,
}

pub struct Worker {
    name: String,
    store: Arc<dyn JobStore>,
    handlers: Arc<HandlerRegistry>,
    retry: Arc<dyn RetryPolicy>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(store: Arc<dyn JobStore>, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            name: "worker-0".to_string(),
            store,
            handlers,
            retry: Arc::new(Backoff::default()),
            settings: WorkerSettings::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_settings(mut self, settings: WorkerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Claim and process at most one job
    ///
    /// Returns `Ok(None)` when nothing is eligible. Only the claim itself can
    /// fail; problems reporting the outcome are reflected in [`Processed::ack`].
    pub async fn run_once(&self) -> Result<Option<Processed>, StoreError> {
        let Some(job) = self.store.claim(self.settings.lease.duration).await? else {
            return Ok(None);
        };

        Ok(Some(self.process(job).await))
    }

    /// Run a claimed job and report its outcome
    pub async fn process(&self, job: Job) -> Processed {
        info!(
            worker = %self.name,
            job_id = %job.id,
            job_type = %job.job_type,
            attempts = job.attempts,
            max_attempts = job.max_attempts,
            "claimed job"
        );

        let started = Instant::now();
        let result = self.invoke(&job).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                let ack = self.acknowledge(&job, self.store.mark_succeeded(job.id).await);
                if ack == Ack::Recorded {
                    info!(worker = %self.name, job_id = %job.id, elapsed_ms, "completed job");
                }
                Processed {
                    job_id: job.id,
                    attempts: job.attempts,
                    outcome: Outcome::Succeeded,
                    ack,
                    error: None,
                }
            }
            Err(e) => {
                let message = format!("{:#}", e);

                let (outcome, reported) = if !job.attempts_exhausted() {
                    let delay = self.retry.delay(job.attempts);
                    warn!(
                        worker = %self.name,
                        job_id = %job.id,
                        attempts = job.attempts,
                        max_attempts = job.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "job failed, will retry"
                    );
                    let reported = self.store.mark_retry(job.id, &message, delay).await;
                    (Outcome::Retrying { delay }, reported)
                } else {
                    error!(
                        worker = %self.name,
                        job_id = %job.id,
                        attempts = job.attempts,
                        error = %message,
                        "job failed permanently"
                    );
                    let reported = self.store.mark_failed(job.id, &message).await;
                    (Outcome::Failed, reported)
                };

                Processed {
                    job_id: job.id,
                    attempts: job.attempts,
                    outcome,
                    ack: self.acknowledge(&job, reported),
                    error: Some(message),
                }
            }
        }
    }

    /// Loop until `cancel` fires
    ///
    /// Cancellation is observed between jobs and while sleeping; a job that is
    /// already running finishes and reports first.
    pub async fn run(self, cancel: CancellationToken) {
        info!(worker = %self.name, "worker started, waiting for jobs");

        while !cancel.is_cancelled() {
            let pause = match self.run_once().await {
                Ok(Some(_)) => None,
                Ok(None) => Some(self.settings.idle_interval),
                Err(e) => {
                    warn!(worker = %self.name, error = %e, "failed to claim job");
                    Some(self.settings.error_backoff)
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        info!(worker = %self.name, "worker stopped");
    }

    /// Run the registered handler on its own task, renewing the lease if
    /// configured
    ///
    /// Unknown job types and handler panics both count as handler failures.
    async fn invoke(&self, job: &Job) -> anyhow::Result<()> {
        let Some(handler) = self.handlers.get(&job.job_type) else {
            return Err(anyhow!("no handler registered for job type '{}'", job.job_type));
        };

        let context = JobContext::from(job);
        let mut task = tokio::spawn(async move { handler.handle(context).await });

        let joined = match (self.settings.lease.renew_interval, job.started_at) {
            (Some(every), Some(claimed_at)) => {
                let mut ticker = tokio::time::interval(every.max(MIN_RENEW_INTERVAL));
                ticker.tick().await;
                let mut held = true;
                loop {
                    tokio::select! {
                        joined = &mut task => break joined,
                        _ = ticker.tick(), if held => held = self.renew(job, claimed_at).await,
                    }
                }
            }
            _ => task.await,
        };

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(anyhow!("handler panicked: {}", panic_message(e.into_panic()))),
            Err(e) => Err(anyhow!("handler task failed: {}", e)),
        }
    }

    /// Extend the lease of the claim stamped `claimed_at`; false once it is lost
    async fn renew(&self, job: &Job, claimed_at: DateTime<Utc>) -> bool {
        let renewed = self
            .store
            .extend_lease(job.id, claimed_at, self.settings.lease.duration)
            .await;

        match renewed {
            Ok(()) => {
                debug!(worker = %self.name, job_id = %job.id, "renewed lease");
                true
            }
            Err(e) if e.is_not_found() => {
                warn!(worker = %self.name, job_id = %job.id, "lease lost while job was running");
                false
            }
            Err(e) => {
                warn!(worker = %self.name, job_id = %job.id, error = %e, "failed to renew lease");
                true
            }
        }
    }

    fn acknowledge(&self, job: &Job, reported: Result<(), StoreError>) -> Ack {
        match reported {
            Ok(()) => Ack::Recorded,
            Err(e) if e.is_not_found() => {
                warn!(
                    worker = %self.name,
                    job_id = %job.id,
                    "job no longer held by this worker, outcome discarded"
                );
                Ack::LeaseLost
            }
            Err(e) => {
                error!(worker = %self.name, job_id = %job.id, error = %e, "failed to record job outcome");
                Ack::StoreError
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
