//! Service configuration.
//!
//! Resolved once at startup from environment variables and passed down as
//! plain structs. Nothing else in the service reads the environment.

use std::str::FromStr;
use std::time::Duration;

/// Default settlement endpoint.
pub const DEFAULT_SETTLEMENT_URL: &str = "http://settlement:9000/api/settlement/withdraw";

/// Default internal bearer token shared with the settlement service.
pub const DEFAULT_INTERNAL_TOKEN: &str = "ChangeMeInternalToken123";

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL URL. Unset means the in-memory store.
    pub database_url: Option<String>,

    /// Shared secret for HS256 merchant tokens.
    pub jwt_secret: String,

    /// Admin API key. Unset disables the admin endpoints.
    pub admin_api_key: Option<String>,

    /// Settlement client and dispatch settings.
    pub settlement: SettlementConfig,

    /// Settlement retry policy.
    pub retry: RetryConfig,

    /// Withdrawal rate limit.
    pub rate_limit: RateLimitConfig,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// Settlement client and dispatch settings.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Settlement endpoint.
    pub url: String,
    /// Bearer token sent to the settlement service.
    pub token: String,
    /// Per-call timeout.
    pub timeout: Duration,
    /// Queue withdrawals for background workers instead of settling inline.
    pub async_dispatch: bool,
    /// Number of background settlement workers.
    pub workers: usize,
    /// Capacity of the settlement queue.
    pub queue_capacity: usize,
}

/// Settlement retry settings.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total settlement calls per withdrawal, first call included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay before jitter.
    pub max_delay: Duration,
    /// Add uniformly random jitter to each delay.
    pub jitter: bool,
}

/// Fixed-window rate limit settings.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Window length in seconds.
    pub window_seconds: u64,
    /// Requests admitted per window.
    pub max_requests: u64,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name).map_or(default, |v| v.trim() == "1")
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok().filter(|s| !s.is_empty()),
            settlement: SettlementConfig {
                url: std::env::var("SETTLEMENT_URL").unwrap_or(defaults.settlement.url),
                token: std::env::var("INTERNAL_TOKEN").unwrap_or(defaults.settlement.token),
                timeout: Duration::from_millis(env_or("SETTLEMENT_TIMEOUT_MS", 2500)),
                async_dispatch: env_flag("ASYNC_SETTLEMENT", false),
                workers: env_or("SETTLEMENT_WORKERS", defaults.settlement.workers).max(1),
                queue_capacity: env_or("SETTLEMENT_QUEUE_CAPACITY", defaults.settlement.queue_capacity)
                    .max(1),
            },
            retry: RetryConfig {
                max_attempts: env_or("SETTLEMENT_MAX_ATTEMPTS", defaults.retry.max_attempts).max(1),
                base_delay: Duration::from_millis(env_or("SETTLEMENT_BASE_DELAY_MS", 1000)),
                max_delay: Duration::from_millis(env_or("SETTLEMENT_MAX_DELAY_MS", 600_000)),
                jitter: env_flag("SETTLEMENT_JITTER", true),
            },
            rate_limit: RateLimitConfig {
                window_seconds: env_or("RL_WINDOW_SEC", defaults.rate_limit.window_seconds).max(1),
                max_requests: env_or("RL_MAX_REQUESTS", defaults.rate_limit.max_requests),
            },
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_or("MAX_BODY_BYTES", defaults.max_body_bytes),
            request_timeout_seconds: env_or(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
        }
    }

    /// How long an inline withdrawal waits for settlement before answering
    /// 202 with the pending withdrawal. Four fifths of the request timeout.
    #[must_use]
    pub fn inline_settlement_deadline(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds) * 4 / 5
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            jwt_secret: "change-me".into(),
            admin_api_key: None,
            settlement: SettlementConfig::default(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024, // 1MB
            request_timeout_seconds: 30,
        }
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SETTLEMENT_URL.into(),
            token: DEFAULT_INTERNAL_TOKEN.into(),
            timeout: Duration::from_millis(2500),
            async_dispatch: false,
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        // One call plus five retries.
        Self {
            max_attempts: 6,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(600),
            jitter: true,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            max_requests: 120,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.settlement.url, DEFAULT_SETTLEMENT_URL);
        assert_eq!(config.settlement.timeout, Duration::from_millis(2500));
        assert!(!config.settlement.async_dispatch);
        assert_eq!(config.retry.max_attempts, 6);
        assert_eq!(config.rate_limit.window_seconds, 60);
        assert_eq!(config.rate_limit.max_requests, 120);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn inline_deadline_is_inside_request_timeout() {
        let mut config = ServiceConfig::default();
        assert_eq!(config.inline_settlement_deadline(), Duration::from_secs(24));

        config.request_timeout_seconds = 1;
        assert_eq!(config.inline_settlement_deadline(), Duration::from_millis(800));
    }
}
