//! Bounded retry for transient remote failures.

use crate::error::Result;
use crate::observability;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryStrategy {
    Fixed,
    Exponential,
}

/// How many times, and how far apart, a transient failure is re-attempted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    strategy: RetryStrategy,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Option<Duration>,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::new(RetryStrategy::Fixed, max_attempts, delay)
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self::new(RetryStrategy::Exponential, max_attempts, base_delay)
    }

    fn new(strategy: RetryStrategy, max_attempts: u32, base_delay: Duration) -> Self {
        Self { strategy, max_attempts: max_attempts.max(1), base_delay, max_delay: None }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = if max_delay.is_zero() { None } else { Some(max_delay) };
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based: the delay after the first failure is 1).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = match self.strategy {
            RetryStrategy::Fixed => self.base_delay,
            RetryStrategy::Exponential => {
                let shift = attempt.saturating_sub(1).min(31);
                self.base_delay.saturating_mul(1u32 << shift)
            }
        };
        match self.max_delay {
            Some(max) => raw.min(max),
            None => raw,
        }
    }
}

/// Run `op` until it succeeds, fails non-transiently, or `policy` is exhausted.
///
/// A transient error that survives every attempt is returned as a terminal
/// remote error carrying the operation name and the last remote message.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = %operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                observability::metrics::record_remote_retry(operation);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e.exhausted()),
        }
    }
}
