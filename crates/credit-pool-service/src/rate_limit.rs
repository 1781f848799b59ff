//! Fixed-window rate limiting.
//!
//! Requests are counted per `(subject, bucket)` where
//! `bucket = now_seconds / window_seconds`. The counter lives in the store so
//! every node shares it. The hard window edge is kept: a client can land up
//! to `2 * max_requests` across a bucket boundary.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use credit_pool_store::{Result, Store};

/// Extra seconds a counter outlives its window.
const EXPIRY_SLACK_SECONDS: u64 = 2;

/// A source of the current time.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// A clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(by) = chrono::Duration::from_std(by) {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Requests left in the current window.
    pub remaining: u64,
}

/// Store-backed fixed-window rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter counting in `store` and reading time from `clock`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Count one request for `subject` and decide whether to admit it.
    ///
    /// # Errors
    ///
    /// Returns an error if the counter cannot be updated.
    pub async fn allow(
        &self,
        subject: &str,
        max_requests: u64,
        window_seconds: u64,
    ) -> Result<RateDecision> {
        let window_seconds = window_seconds.max(1);
        let now = self.clock.now();
        let bucket = u64::try_from(now.timestamp()).unwrap_or(0) / window_seconds;
        let key = format!("rl:{subject}:{bucket}");
        let ttl = Duration::from_secs(window_seconds + EXPIRY_SLACK_SECONDS);

        let count = self.store.incr_window_counter(&key, ttl, now).await?;

        Ok(RateDecision {
            allowed: count <= max_requests,
            remaining: max_requests.saturating_sub(count),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use credit_pool_store::MemoryStore;

    fn limiter() -> (RateLimiter, ManualClock) {
        // Aligned to a minute boundary so a 60s window starts fresh.
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), Arc::new(clock.clone()));
        (limiter, clock)
    }

    #[tokio::test]
    async fn sixth_request_in_window_is_denied() {
        let (limiter, _clock) = limiter();
        for expected_remaining in (0..5).rev() {
            let decision = limiter.allow("merchant:a", 5, 60).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let denied = limiter.allow("merchant:a", 5, 60).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
    }

    #[tokio::test]
    async fn counter_resets_when_window_rolls() {
        let (limiter, clock) = limiter();
        for _ in 0..6 {
            limiter.allow("merchant:a", 5, 60).await.unwrap();
        }
        clock.advance(Duration::from_secs(60));
        assert!(limiter.allow("merchant:a", 5, 60).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn subjects_are_counted_separately() {
        let (limiter, _clock) = limiter();
        assert!(limiter.allow("merchant:a", 1, 60).await.unwrap().allowed);
        assert!(!limiter.allow("merchant:a", 1, 60).await.unwrap().allowed);
        assert!(limiter.allow("merchant:b", 1, 60).await.unwrap().allowed);
    }
}
