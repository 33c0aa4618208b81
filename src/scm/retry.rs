//! Exponential backoff for source-host calls.
//!
//! Only `Transient` errors are retried. Everything else is returned on the
//! first failure so the caller can act on the kind.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::error::ScmError;

/// Configuration for exponential backoff retry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries, not counting the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    /// Cap for exponential growth.
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl RetryConfig {
    /// 3 retries at 2s, 4s, 8s.
    pub const DEFAULT: Self = Self {
        max_retries: 3,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(16),
        multiplier: 2.0,
    };

    /// A single attempt.
    pub const NONE: Self = Self {
        max_retries: 0,
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        multiplier: 1.0,
    };

    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            multiplier,
        }
    }

    /// Delay before retry `attempt` (0-indexed): `initial * multiplier^attempt`,
    /// capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|attempt| self.delay_for_attempt(attempt))
    }

    pub fn total_max_wait(&self) -> Duration {
        self.delays().sum()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Runs `operation` until it succeeds, fails non-transiently, or the retries
/// run out. The last error is returned in the latter two cases.
pub async fn retry_with_backoff<T, F, Fut>(config: RetryConfig, mut operation: F) -> Result<T, ScmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ScmError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retriable() || attempt >= config.max_retries => return Err(e),
            Err(e) => {
                let delay = config.delay_for_attempt(attempt);
                debug!(attempt, ?delay, error = %e, "retrying transient host error");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
