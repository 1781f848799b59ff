//! Best-effort audit trail of processed requests.

use std::sync::Arc;

use credit_pool_core::AuditEntry;
use credit_pool_store::Store;
use serde_json::Value;

/// Append-only audit sink.
///
/// A failed write is logged and dropped. It never fails the request.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn Store>,
}

impl AuditLog {
    /// Create an audit log writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record one request.
    pub async fn record(
        &self,
        method: &str,
        path: &str,
        status: u16,
        actor: Option<String>,
        payload: Value,
    ) {
        let entry = AuditEntry::new(method, path, status, actor, payload);
        if let Err(e) = self.store.append_audit(&entry).await {
            tracing::warn!(error = %e, path = %path, status, "Dropping audit entry");
        }
    }
}
