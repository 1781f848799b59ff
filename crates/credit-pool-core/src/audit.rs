//! Audit trail of processed API requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::AuditId;

/// One processed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Entry identifier.
    pub id: AuditId,
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Response status code.
    pub status: u16,
    /// Who made the request, usually a merchant id.
    pub actor: Option<String>,
    /// Snapshot of request and outcome, including a `phase` field.
    pub payload: serde_json::Value,
    /// Record time.
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Build an entry stamped with the current time.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        status: u16,
        actor: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: AuditId::generate(),
            method: method.into(),
            path: path.into(),
            status,
            actor,
            payload,
            created_at: Utc::now(),
        }
    }
}
