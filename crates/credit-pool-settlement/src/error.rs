//! Settlement error types.

/// Errors that can occur when calling the settlement service.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    /// Transport failure or timeout.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a 5xx.
    #[error("settlement upstream error: status {status}")]
    Upstream {
        /// HTTP status code.
        status: u16,
    },

    /// The service refused the settlement.
    #[error("settlement rejected: status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body as received.
        body: String,
    },

    /// The service answered without a 5xx but the body could not be read.
    /// Settlement may have happened, so this is never retried.
    #[error("settlement body unreadable: status {status}: {reason}")]
    UnreadableBody {
        /// HTTP status code.
        status: u16,
        /// Read failure.
        reason: String,
    },

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SettlementError {
    /// Whether another attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Upstream { .. })
    }
}
