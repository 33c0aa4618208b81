//! Per-key and overall rate limiters for the work queue.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

/// Decides how long a key waits before it is retried.
pub trait RateLimiter: Send + Sync {
    /// Delay for the next requeue of `key`. Records the attempt.
    fn when(&self, key: &str) -> Duration;

    /// Clears the history of `key`.
    fn forget(&self, key: &str);

    /// Number of requeues recorded for `key`.
    fn num_requeues(&self, key: &str) -> u32;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// `base * 2^failures`, capped at `max`, tracked per key.
pub struct ExponentialFailureRateLimiter {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl ExponentialFailureRateLimiter {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter for ExponentialFailureRateLimiter {
    fn when(&self, key: &str) -> Duration {
        let mut failures = lock(&self.failures);
        let count = failures.entry(key.to_string()).or_insert(0);
        let exp = *count;
        *count = count.saturating_add(1);

        // 2^exp overflows long before the cap matters for any sane base.
        if exp >= 32 {
            return self.max;
        }
        self.base
            .checked_mul(1u32 << exp)
            .map_or(self.max, |d| d.min(self.max))
    }

    fn forget(&self, key: &str) {
        lock(&self.failures).remove(key);
    }

    fn num_requeues(&self, key: &str) -> u32 {
        lock(&self.failures).get(key).copied().unwrap_or(0)
    }
}

struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Token bucket shared by all keys.
pub struct BucketRateLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl BucketRateLimiter {
    /// `rate` tokens per second, holding at most `burst`.
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            rate,
            burst: burst as f64,
            bucket: Mutex::new(Bucket {
                tokens: burst as f64,
                last: Instant::now(),
            }),
        }
    }
}

impl RateLimiter for BucketRateLimiter {
    fn when(&self, _key: &str) -> Duration {
        let mut bucket = lock(&self.bucket);
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last = now;
        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.rate)
        }
    }

    fn forget(&self, _key: &str) {}

    fn num_requeues(&self, _key: &str) -> u32 {
        0
    }
}

/// The longest delay of its members.
pub struct MaxOfRateLimiter {
    limiters: Vec<Box<dyn RateLimiter>>,
}

impl MaxOfRateLimiter {
    pub fn new(limiters: Vec<Box<dyn RateLimiter>>) -> Self {
        Self { limiters }
    }
}

impl RateLimiter for MaxOfRateLimiter {
    fn when(&self, key: &str) -> Duration {
        self.limiters
            .iter()
            .map(|l| l.when(key))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, key: &str) {
        for l in &self.limiters {
            l.forget(key);
        }
    }

    fn num_requeues(&self, key: &str) -> u32 {
        self.limiters
            .iter()
            .map(|l| l.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}

/// 5ms doubling per failure up to 120s, bounded overall by 1000/s with a
/// burst of 50000.
pub fn default_controller_rate_limiter() -> MaxOfRateLimiter {
    MaxOfRateLimiter::new(vec![
        Box::new(ExponentialFailureRateLimiter::new(
            Duration::from_millis(5),
            Duration::from_secs(120),
        )),
        Box::new(BucketRateLimiter::new(1000.0, 50_000)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let limiter = ExponentialFailureRateLimiter::new(Duration::from_millis(5), Duration::from_secs(120));
        let delays: Vec<_> = (0..5).map(|_| limiter.when("k")).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(5),
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(40),
                Duration::from_millis(80),
            ]
        );
        for _ in 0..40 {
            limiter.when("k");
        }
        assert_eq!(limiter.when("k"), Duration::from_secs(120));
        assert_eq!(limiter.num_requeues("k"), 46);

        limiter.forget("k");
        assert_eq!(limiter.num_requeues("k"), 0);
        assert_eq!(limiter.when("k"), Duration::from_millis(5));
    }

    #[test]
    fn keys_back_off_independently() {
        let limiter = ExponentialFailureRateLimiter::new(Duration::from_millis(5), Duration::from_secs(120));
        limiter.when("a");
        limiter.when("a");
        assert_eq!(limiter.when("b"), Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_allows_burst_then_throttles() {
        let limiter = BucketRateLimiter::new(10.0, 2);
        assert_eq!(limiter.when("x"), Duration::ZERO);
        assert_eq!(limiter.when("x"), Duration::ZERO);
        let third = limiter.when("x");
        assert!(third > Duration::from_millis(90) && third <= Duration::from_millis(100));
    }

    #[test]
    fn default_limiter_takes_the_max() {
        let limiter = default_controller_rate_limiter();
        assert_eq!(limiter.when("k"), Duration::from_millis(5));
        assert_eq!(limiter.when("k"), Duration::from_millis(10));
        limiter.forget("k");
        assert_eq!(limiter.num_requeues("k"), 0);
    }
}
