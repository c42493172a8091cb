//! Request throttling for data APIs.
//!
//! Combines a token bucket (requests per minute) with a minimum spacing
//! between consecutive requests. FinMind rejects bursts even when the hourly
//! quota is far from exhausted, so both limits apply.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// A token bucket rate limiter with a minimum request interval.
///
/// Allows up to `capacity` requests per second, refilled continuously at
/// `requests_per_minute / 60` tokens per second, and never grants two tokens
/// closer than `min_interval` apart.
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum tokens in the bucket
    capacity: u32,
    /// Current available tokens (scaled by 1000 for precision)
    tokens: AtomicU64,
    /// Tokens added per millisecond (unscaled)
    refill_rate_per_ms: f64,
    /// Last refill timestamp
    last_refill: Mutex<Instant>,
    /// Minimum spacing between grants
    min_interval: Duration,
    /// Time of the last grant
    last_grant: Mutex<Option<Instant>>,
    /// Name for logging
    name: String,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// # Arguments
    /// * `name` - Name for logging purposes
    /// * `requests_per_minute` - Maximum requests allowed per minute
    /// * `min_interval` - Minimum time between two requests
    pub fn new(name: impl Into<String>, requests_per_minute: u32, min_interval: Duration) -> Self {
        let requests_per_second = (requests_per_minute as f64 / 60.0).ceil() as u32;
        let capacity = requests_per_second.max(1);
        let refill_rate_per_ms = requests_per_minute.max(1) as f64 / 60_000.0;

        Self {
            capacity,
            tokens: AtomicU64::new((capacity as u64) * 1000),
            refill_rate_per_ms,
            last_refill: Mutex::new(Instant::now()),
            min_interval,
            last_grant: Mutex::new(None),
            name: name.into(),
        }
    }

    /// Create a limiter that only enforces the minimum interval.
    pub fn interval_only(name: impl Into<String>, min_interval: Duration) -> Self {
        Self::new(name, 60_000, min_interval)
    }

    /// Acquire permission for one request, waiting if necessary.
    ///
    /// Callers are served one at a time so the spacing holds across tasks.
    pub async fn acquire(&self) {
        let mut last_grant = self.last_grant.lock().await;

        if let Some(previous) = *last_grant {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(
                    limiter = %self.name,
                    wait_ms = wait.as_millis() as u64,
                    "Spacing request"
                );
                tokio::time::sleep(wait).await;
            }
        }

        loop {
            if self.try_take_token() {
                break;
            }

            // Time until the next whole token
            let wait_ms = (1.0 / self.refill_rate_per_ms).ceil() as u64;
            let wait_time = Duration::from_millis(wait_ms.clamp(10, 1000));

            debug!(
                limiter = %self.name,
                wait_ms = wait_time.as_millis() as u64,
                "Rate limited, waiting for token"
            );

            tokio::time::sleep(wait_time).await;
        }

        *last_grant = Some(Instant::now());
    }

    /// Try to take a token without waiting; ignores the minimum interval.
    pub fn try_acquire(&self) -> bool {
        self.try_take_token()
    }

    fn try_take_token(&self) -> bool {
        self.refill();

        loop {
            let current = self.tokens.load(Ordering::Relaxed);
            if current < 1000 {
                return false;
            }

            if self
                .tokens
                .compare_exchange_weak(
                    current,
                    current - 1000,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Refill tokens based on elapsed time.
    fn refill(&self) {
        if let Ok(mut last_refill) = self.last_refill.try_lock() {
            let now = Instant::now();
            let elapsed_ms = now.duration_since(*last_refill).as_millis() as f64;
            let new_tokens = (elapsed_ms * self.refill_rate_per_ms * 1000.0) as u64;

            if new_tokens > 0 {
                let max_tokens = (self.capacity as u64) * 1000;

                loop {
                    let current = self.tokens.load(Ordering::Relaxed);
                    let new_value = (current + new_tokens).min(max_tokens);

                    if current == new_value
                        || self
                            .tokens
                            .compare_exchange_weak(
                                current,
                                new_value,
                                Ordering::Relaxed,
                                Ordering::Relaxed,
                            )
                            .is_ok()
                    {
                        break;
                    }
                }

                *last_refill = now;
            }
        }
    }

    /// Whole tokens currently available.
    pub fn available(&self) -> u32 {
        self.refill();
        (self.tokens.load(Ordering::Relaxed) / 1000) as u32
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Rate limiter shared between clients and tasks.
pub type SharedRateLimiter = Arc<RateLimiter>;

/// Create a shared rate limiter.
pub fn shared_limiter(
    name: impl Into<String>,
    requests_per_minute: u32,
    min_interval: Duration,
) -> SharedRateLimiter {
    Arc::new(RateLimiter::new(name, requests_per_minute, min_interval))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_from_rpm() {
        let limiter = RateLimiter::new("test", 300, Duration::ZERO);
        assert_eq!(limiter.available(), 5);

        let slow = RateLimiter::new("slow", 10, Duration::ZERO);
        assert_eq!(slow.available(), 1);
    }

    #[test]
    fn test_try_acquire_drains_bucket() {
        let limiter = RateLimiter::new("test", 120, Duration::ZERO);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_min_interval_spacing() {
        let limiter = RateLimiter::interval_only("spacing", Duration::from_millis(30));

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_first_acquire_is_immediate() {
        let limiter = RateLimiter::interval_only("first", Duration::from_secs(5));
        let start = Instant::now();
        tokio_test::block_on(limiter.acquire());
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
