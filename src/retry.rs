/*!
 * Bounded retry with exponential backoff and jitter.
 *
 * One policy object is shared by resource fetching and model calls, so both
 * follow the same schedule: `base * 2^(attempt-1)`, capped at `max_delay`,
 * with up to `jitter` of the delay added at random.
 */

use std::future::Future;
use std::time::Duration;

use log::warn;
use rand::Rng;

/// Retry schedule and attempt budget
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Fraction of the delay added as random jitter (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            ..Default::default()
        }
    }

    /// Policy that never waits, for tests and local providers
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Deterministic part of the delay after `attempt` failed (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }

    /// Full delay after `attempt` failed, including jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff_for(attempt);
        if self.jitter <= 0.0 || backoff.is_zero() {
            return backoff;
        }
        let extra = backoff.mul_f64(rand::rng().random_range(0.0..self.jitter));
        (backoff + extra).min(self.max_delay.max(backoff))
    }

    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// budget is spent. Returns the last error and the attempts used.
    pub async fn run<T, E, F, Fut, P>(&self, label: &str, mut op: F, retryable: P) -> Result<T, (E, u32)>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if retryable(&e) && self.has_attempts_left(attempt) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {} - retrying in {:?}",
                        label, attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }
}
