//! Job handlers and the type → handler registry
//!
//! The worker loop treats handlers as opaque: it passes the payload and the
//! attempt counters, and only looks at whether the result is `Ok`.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

use crate::types::Job;

/// What a handler gets to see of a claimed job
#[derive(Debug, Clone)]
pub struct JobContext {
    pub id: Uuid,
    pub job_type: String,
    pub payload: Vec<u8>,
    pub attempts: i32,
    pub max_attempts: i32,
}

impl JobContext {
    pub fn is_last_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

impl From<&Job> for JobContext {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            attempts: job.attempts,
            max_attempts: job.max_attempts,
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Run the job; an `Err` is recorded as the job's `last_error`
    async fn handle(&self, job: JobContext) -> Result<()>;
}

/// Handler backed by an async closure, see [`handler_fn`]
pub struct FnHandler<F>(F);

/// Wrap an async closure as a [`JobHandler`]
///
/// ```rust,ignore
/// let registry = HandlerRegistry::new().register(
///     "email",
///     handler_fn(|job| async move { send_email(&job.payload).await }),
/// );
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, job: JobContext) -> Result<()> {
        (self.0)(job).await
    }
}

/// Maps job types to their handlers
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `job_type`, replacing any previous one
    pub fn register(mut self, job_type: impl Into<String>, handler: impl JobHandler) -> Self {
        self.handlers.insert(job_type.into(), Arc::new(handler));
        self
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered types, sorted
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Keep only the listed types
    pub fn retain(mut self, job_types: &[String]) -> Self {
        self.handlers.retain(|job_type, _| job_types.contains(job_type));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Handlers bundled with the `jobqueue worker` command
pub mod builtin {
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::time::Duration;
    use tracing::info;

    use super::{HandlerRegistry, JobContext, JobHandler};

    /// Succeeds immediately
    pub struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn handle(&self, _job: JobContext) -> Result<()> {
            Ok(())
        }
    }

    /// Logs the payload as text
    pub struct Log;

    #[async_trait]
    impl JobHandler for Log {
        async fn handle(&self, job: JobContext) -> Result<()> {
            info!(job_id = %job.id, payload = %String::from_utf8_lossy(&job.payload), "job payload");
            Ok(())
        }
    }

    /// Sleeps for the number of milliseconds in the payload (default 1000)
    pub struct Sleep;

    #[async_trait]
    impl JobHandler for Sleep {
        async fn handle(&self, job: JobContext) -> Result<()> {
            let text = String::from_utf8_lossy(&job.payload);
            let millis = if text.trim().is_empty() {
                1_000
            } else {
                text.trim()
                    .parse::<u64>()
                    .map_err(|e| anyhow!("invalid sleep payload '{}': {}", text, e))?
            };
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(())
        }
    }

    /// Always fails, with the payload as the error message
    pub struct Fail;

    #[async_trait]
    impl JobHandler for Fail {
        async fn handle(&self, job: JobContext) -> Result<()> {
            let message = String::from_utf8_lossy(&job.payload);
            if message.trim().is_empty() {
                Err(anyhow!("simulated job failure"))
            } else {
                Err(anyhow!("{}", message))
            }
        }
    }

    /// Fails the first attempt, succeeds on every later one
    pub struct Flaky;

    #[async_trait]
    impl JobHandler for Flaky {
        async fn handle(&self, job: JobContext) -> Result<()> {
            if job.attempts == 1 {
                Err(anyhow!("simulated job failure"))
            } else {
                Ok(())
            }
        }
    }

    pub fn registry() -> HandlerRegistry {
        HandlerRegistry::new()
            .register("noop", Noop)
            .register("log", Log)
            .register("sleep", Sleep)
            .register("fail", Fail)
            .register("flaky", Flaky)
    }
}
