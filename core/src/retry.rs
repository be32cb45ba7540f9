//! Retry delay policies
//!
//! A policy maps the number of attempts already made to the delay before the
//! job becomes claimable again. Policies must be monotonically non-decreasing
//! in `attempts` and never return a zero delay.

use std::time::Duration;

/// Smallest delay a policy may hand out.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(1);

pub trait RetryPolicy: Send + Sync {
    /// Delay before the next attempt, given `attempts` claims so far (≥ 1).
    fn delay(&self, attempts: i32) -> Duration;
}

impl<F> RetryPolicy for F
where
    F: Fn(i32) -> Duration + Send + Sync,
{
    fn delay(&self, attempts: i32) -> Duration {
        self(attempts).max(MIN_RETRY_DELAY)
    }
}

/// Built-in backoff curves, each capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay for every attempt
    Fixed { delay: Duration },
    /// `base * attempts`
    Linear { base: Duration, max: Duration },
    /// `base * 2^(attempts - 1)`
    Exponential { base: Duration, max: Duration },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Linear {
            base: Duration::from_secs(5),
            max: Duration::from_secs(3_600),
        }
    }
}

impl RetryPolicy for Backoff {
    fn delay(&self, attempts: i32) -> Duration {
        let attempts = attempts.max(1) as u32;

        let delay = match *self {
            Backoff::Fixed { delay } => delay,
            Backoff::Linear { base, max } => base.saturating_mul(attempts).min(max),
            Backoff::Exponential { base, max } => {
                // 2^31 already overflows any sane cap
                let factor = 1u32.checked_shl(attempts - 1).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            }
        };

        delay.max(MIN_RETRY_DELAY)
    }
}
