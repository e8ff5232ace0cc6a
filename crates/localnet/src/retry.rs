//! Bounded exponential backoff for polling a ledger that is still starting.

use rand::Rng;
use std::{fmt::Display, future::Future, time::Duration};
use tracing::{debug, warn};

/// Backoff schedule: `initial_delay` doubles per attempt up to `max_delay`,
/// plus up to a quarter of jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: usize,
}

impl RetryPolicy {
    /// Schedule used while waiting for a freshly spawned ledger to answer.
    pub const fn readiness() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            max_retries: 10,
        }
    }

    /// Pause before retry number `attempt` (zero based).
    pub fn delay(&self, attempt: usize) -> Duration {
        let doubled = self.initial_delay.saturating_mul(1 << attempt.min(16));
        let capped = doubled.min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 4);
        capped + Duration::from_millis(jitter_ms)
    }
}

/// Polls `f` until it succeeds. Errors rejected by `retryable` are returned
/// immediately, the last error once `policy.max_retries` is spent.
pub async fn with_retry<F, Fut, T, E>(
    what: &str,
    policy: &RetryPolicy,
    retryable: impl Fn(&E) -> bool,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;
    loop {
        let err = match f().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !retryable(&err) {
            debug!(what, %err, "giving up on permanent failure");
            return Err(err);
        }
        if attempt >= policy.max_retries {
            warn!(what, attempts = attempt + 1, %err, "still failing, giving up");
            return Err(err);
        }

        let delay = policy.delay(attempt);
        debug!(what, attempt = attempt + 1, ?delay, %err, "not there yet, backing off");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
