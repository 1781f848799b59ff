//! Backoff policy for settlement retries.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Random extra delay added to each backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// Exact exponential delays.
    None,
    /// Uniform extra delay in `[0, backoff]`.
    Full,
}

/// How many times to call settlement and how long to wait between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls, first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on the exponential delay.
    pub max_delay: Duration,
    /// Jitter mode.
    pub jitter: Jitter,
}

impl RetryPolicy {
    /// The delay before retry `retry` (1-based) without jitter:
    /// `min(base_delay * 2^(retry-1), max_delay)`.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// The delay before retry `retry`, jitter included.
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let backoff = self.backoff(retry);
        match self.jitter {
            Jitter::None => backoff,
            Jitter::Full => {
                let max_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
                backoff + Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
            }
        }
    }

    /// Longest time a full run can take when every call lasts `call_timeout`
    /// and every delay draws its maximum jitter.
    #[must_use]
    pub fn worst_case(&self, call_timeout: Duration) -> Duration {
        let spread = match self.jitter {
            Jitter::None => 1,
            Jitter::Full => 2,
        };
        (1..self.max_attempts).fold(call_timeout.saturating_mul(self.max_attempts), |total, retry| {
            total.saturating_add(self.backoff(retry).saturating_mul(spread))
        })
    }

    /// Whether another call is allowed after `attempts` calls.
    #[must_use]
    pub const fn can_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            jitter: if config.jitter {
                Jitter::Full
            } else {
                Jitter::None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: Jitter) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter,
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let p = policy(Jitter::None);
        assert_eq!(p.backoff(1), Duration::from_secs(1));
        assert_eq!(p.backoff(2), Duration::from_secs(2));
        assert_eq!(p.backoff(4), Duration::from_secs(8));
        assert_eq!(p.backoff(5), Duration::from_secs(10));
        assert_eq!(p.backoff(200), Duration::from_secs(10));
        assert_eq!(p.delay(3), Duration::from_secs(4));
    }

    #[test]
    fn full_jitter_stays_within_twice_backoff() {
        let p = policy(Jitter::Full);
        for retry in 1..=6 {
            let delay = p.delay(retry);
            assert!(delay >= p.backoff(retry));
            assert!(delay <= p.backoff(retry) * 2);
        }
    }

    #[test]
    fn attempts_are_bounded() {
        let p = policy(Jitter::None);
        assert!(p.can_retry(5));
        assert!(!p.can_retry(6));
    }

    #[test]
    fn worst_case_sums_calls_and_delays() {
        let call = Duration::from_millis(2500);
        // 6 calls of 2.5s plus delays of 1, 2, 4, 8 and 10 seconds.
        assert_eq!(policy(Jitter::None).worst_case(call), Duration::from_secs(40));
        assert_eq!(policy(Jitter::Full).worst_case(call), Duration::from_secs(65));
    }

    #[test]
    fn built_from_config() {
        let config = RetryConfig {
            max_attempts: 0,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            jitter: false,
        };
        let p = RetryPolicy::from(&config);
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.jitter, Jitter::None);
    }
}
