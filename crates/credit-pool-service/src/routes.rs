//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, health, merchants, withdrawals};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent withdrawal requests.
/// Inline settlement holds a request open for up to the full retry schedule.
const WITHDRAWAL_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `POST /v1/merchants` - Register a merchant
///
/// ## Merchant (HS256 JWT auth)
/// - `POST /v1/withdrawals` - Request a withdrawal
/// - `GET /v1/withdrawals/:id` - Get a withdrawal
/// - `GET /v1/me` - Merchant profile and credit
///
/// ## Admin (`X-Admin-Key` auth)
/// - `POST /v1/admin/merchants/:id/approve` - Approve and set credit limit
/// - `POST /v1/admin/pool/topup` - Add credit to the pool
/// - `GET /v1/admin/pool` - Pool balance
/// - `GET /v1/admin/reconciliation` - Settlements missing from the ledger
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let withdrawal_routes = Router::new()
        .route("/withdrawals", post(withdrawals::create_withdrawal))
        .route("/withdrawals/:id", get(withdrawals::get_withdrawal))
        .layer(ConcurrencyLimitLayer::new(WITHDRAWAL_MAX_CONCURRENT_REQUESTS));

    let admin_routes = Router::new()
        .route("/merchants/:id/approve", post(admin::approve_merchant))
        .route("/pool/topup", post(admin::top_up_pool))
        .route("/pool", get(admin::get_pool))
        .route("/reconciliation", get(admin::list_reconciliation));

    let api_routes = Router::new()
        .route("/merchants", post(merchants::register_merchant))
        .route("/me", get(merchants::me))
        .nest("/admin", admin_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        .merge(withdrawal_routes);

    Router::new()
        // Health (public, no concurrency limit)
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
