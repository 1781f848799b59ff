//! API handlers.

pub mod admin;
pub mod health;
pub mod merchants;
pub mod withdrawals;
