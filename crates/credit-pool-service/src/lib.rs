//! Credit pool HTTP API service.
//!
//! This crate provides the HTTP API for the credit pool, including:
//!
//! - Merchant registration and profiles
//! - Withdrawals, settled through an external bank settlement service
//! - Operator endpoints for approval, pool top-ups and reconciliation
//!
//! Withdrawals are rate limited per merchant and deduplicated by an
//! optional `Idempotency-Key` header. Settlement runs inline or, with
//! `ASYNC_SETTLEMENT=1`, on background workers.
//!
//! # Authentication
//!
//! 1. **Merchant JWT tokens** - HS256, `sub` is the merchant ID
//! 2. **Admin API key** - `X-Admin-Key` header for operator endpoints

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Health handler has nothing to await

pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod idempotency;
pub mod rate_limit;
pub mod routes;
pub mod saga;
pub mod state;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use rate_limit::{Clock, ManualClock, SystemClock};
pub use routes::create_router;
pub use saga::{RetryPolicy, SettlementDispatcher, SettlementSaga};
pub use state::AppState;
