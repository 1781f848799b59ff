//! Application state.

use std::sync::Arc;

use credit_pool_settlement::SettlementGateway;
use credit_pool_store::Store;

use crate::audit::AuditLog;
use crate::config::ServiceConfig;
use crate::idempotency::IdempotencyStore;
use crate::rate_limit::{Clock, RateLimiter};
use crate::saga::{RetryPolicy, SettlementDispatcher, SettlementSaga};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Withdrawal rate limiter.
    pub rate_limiter: RateLimiter,

    /// Idempotency records.
    pub idempotency: IdempotencyStore,

    /// Request audit trail.
    pub audit: AuditLog,

    /// Settlement saga used by inline requests and workers.
    pub saga: Arc<SettlementSaga>,

    /// Background workers, present when async settlement is enabled.
    pub dispatcher: Option<SettlementDispatcher>,
}

impl AppState {
    /// Create the application state.
    ///
    /// Spawns settlement workers when async settlement is enabled, so this
    /// must run inside a tokio runtime.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn SettlementGateway>,
        clock: Arc<dyn Clock>,
        config: ServiceConfig,
    ) -> Self {
        let saga = Arc::new(SettlementSaga::new(
            Arc::clone(&store),
            gateway,
            RetryPolicy::from(&config.retry),
        ));

        let dispatcher = if config.settlement.async_dispatch {
            tracing::info!(
                workers = config.settlement.workers,
                queue_capacity = config.settlement.queue_capacity,
                "Async settlement enabled"
            );
            Some(SettlementDispatcher::spawn(
                Arc::clone(&saga),
                config.settlement.workers,
                config.settlement.queue_capacity,
            ))
        } else {
            None
        };

        Self {
            rate_limiter: RateLimiter::new(Arc::clone(&store), clock),
            idempotency: IdempotencyStore::new(Arc::clone(&store)),
            audit: AuditLog::new(Arc::clone(&store)),
            saga,
            dispatcher,
            store,
            config,
        }
    }
}
