//! Stored responses keyed by client-supplied idempotency keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A response produced once for an idempotency key. Immutable after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Client-supplied key, unique across all records.
    pub key: String,
    /// Hash of the canonical request the key was first used with.
    pub request_fingerprint: String,
    /// HTTP status of the stored response.
    pub status_code: u16,
    /// The stored response body, replayed verbatim.
    pub response_body: serde_json::Value,
    /// Insert time.
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Build a record for a freshly produced response.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        request_fingerprint: impl Into<String>,
        status_code: u16,
        response_body: serde_json::Value,
    ) -> Self {
        Self {
            key: key.into(),
            request_fingerprint: request_fingerprint.into(),
            status_code,
            response_body,
            created_at: Utc::now(),
        }
    }

    /// Whether `fingerprint` identifies the same request.
    #[must_use]
    pub fn matches(&self, fingerprint: &str) -> bool {
        self.request_fingerprint == fingerprint
    }
}
