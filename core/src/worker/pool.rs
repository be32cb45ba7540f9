use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{Worker, WorkerSettings};
use crate::config::WorkerConfig;
use crate::handler::HandlerRegistry;
use crate::lease::Reaper;
use crate::retry::RetryPolicy;
use crate::store::JobStore;

/// A set of worker loops plus one reaper, sharing a store
///
/// Loops and reaper coordinate only through the store.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Spawn `config.concurrency` worker loops and the reaper
    pub fn spawn(
        store: Arc<dyn JobStore>,
        handlers: HandlerRegistry,
        retry: Arc<dyn RetryPolicy>,
        config: &WorkerConfig,
        cancel: CancellationToken,
    ) -> Self {
        let handlers = Arc::new(handlers);
        let settings = WorkerSettings::from(config);

        let mut handles = Vec::with_capacity(config.concurrency + 1);
        for index in 0..config.concurrency {
            let worker = Worker::new(store.clone(), handlers.clone())
                .with_name(format!("worker-{}", index))
                .with_retry_policy(retry.clone())
                .with_settings(settings);
            handles.push(tokio::spawn(worker.run(cancel.clone())));
        }

        let reaper = Reaper::new(store, config.reap_interval());
        handles.push(tokio::spawn(reaper.run(cancel.clone())));

        info!(
            workers = config.concurrency,
            lease_secs = settings.lease.duration.as_secs(),
            reap_interval_secs = config.reap_interval_secs,
            "worker pool started"
        );

        Self { handles, cancel }
    }

    /// Ask every loop to stop after its current job
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for every loop and the reaper to exit
    ///
    /// Every task is awaited even if an earlier one failed; the first failure
    /// is returned.
    pub async fn join(self) -> Result<()> {
        let mut first_error = None;
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(anyhow!("worker task failed: {}", e)),
            None => {
                info!("worker pool stopped");
                Ok(())
            }
        }
    }
}
