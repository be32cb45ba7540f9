//! Lease settings and the expired-lease reaper
//!
//! A claim hands the worker a lease that ends at `lease_expires_at`. If the
//! worker dies or stalls past that point, the [`Reaper`] returns the job to
//! `pending` so any worker can pick it up again. The reaper and the worker's
//! own report race on `state = 'processing'`; whichever commits first wins.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::store::JobStore;

/// Shortest reaper period; shorter requests are rounded up
pub const MIN_REAP_INTERVAL: Duration = Duration::from_millis(1);

/// Shortest lease renewal period; shorter requests are rounded up
pub const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(1);

/// How long a claim holds a job, and whether to renew while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseSettings {
    pub duration: Duration,
    /// Extend the lease on this interval while the handler runs
    pub renew_interval: Option<Duration>,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(30),
            renew_interval: None,
        }
    }
}

/// Periodic janitor that releases expired leases
pub struct Reaper {
    store: Arc<dyn JobStore>,
    interval: Duration,
}

impl Reaper {
    /// A zero `interval` is raised to [`MIN_REAP_INTERVAL`]
    pub fn new(store: Arc<dyn JobStore>, interval: Duration) -> Self {
        Self {
            store,
            interval: interval.max(MIN_REAP_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run a single sweep
    pub async fn reap_once(&self) -> Result<u64, StoreError> {
        let reaped = self.store.reap_expired().await?;
        if reaped > 0 {
            info!(count = reaped, "recovered jobs with expired leases");
        } else {
            debug!("no expired leases");
        }
        Ok(reaped)
    }

    /// Sweep on a fixed interval until cancelled
    ///
    /// Errors are logged and the next tick proceeds as usual.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.reap_once().await {
                        warn!(error = %e, "failed to recover leased jobs");
                    }
                }
            }
        }

        debug!("reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryJobStore;
    use crate::types::{JobState, NewJob};

    #[tokio::test]
    async fn reap_once_is_a_noop_before_expiry() {
        let store = MemoryJobStore::new();
        store.enqueue(NewJob::new("email", Vec::new())).await.unwrap();
        store.claim(Duration::from_secs(30)).await.unwrap().unwrap();

        let reaper = Reaper::new(Arc::new(store.clone()), Duration::from_secs(5));
        assert_eq!(reaper.reap_once().await.unwrap(), 0);

        store.advance(Duration::from_secs(29));
        assert_eq!(reaper.reap_once().await.unwrap(), 0);

        store.advance(Duration::from_secs(1));
        assert_eq!(reaper.reap_once().await.unwrap(), 1);
        assert_eq!(reaper.reap_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_reaps_on_interval_until_cancelled() {
        let store = MemoryJobStore::new();
        let job = store.enqueue(NewJob::new("email", Vec::new())).await.unwrap();
        store.claim(Duration::from_secs(1)).await.unwrap().unwrap();
        store.advance(Duration::from_secs(2));

        let cancel = CancellationToken::new();
        let reaper = Reaper::new(Arc::new(store.clone()), Duration::from_millis(10));
        let handle = tokio::spawn(reaper.run(cancel.clone()));

        let mut state = JobState::Processing;
        for _ in 0..100 {
            state = store.get(job.id).await.unwrap().unwrap().state;
            if state == JobState::Pending {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state, JobState::Pending);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn zero_interval_is_rounded_up() {
        let store = MemoryJobStore::new();
        let reaper = Reaper::new(Arc::new(store), Duration::ZERO);
        assert_eq!(reaper.interval(), MIN_REAP_INTERVAL);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(reaper.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        cancel.cancel();
        handle.await.unwrap();
    }
}
