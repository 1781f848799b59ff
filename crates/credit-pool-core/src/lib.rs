//! Core types for the credit pool ledger.
//!
//! This crate has no I/O. It provides:
//!
//! - **Identifiers**: `MerchantId`, `AccountId`, `WithdrawalId`, `TxId`, ...
//! - **Money**: `Amount` and two-place half-up quantization
//! - **Pool**: `CreditPool`, `MerchantCredit`, `Merchant`, `WalletAccount`
//! - **Consumption**: the balance checks and ledger pair of one debit
//! - **Withdrawals**: `WithdrawalRequest` and its state machine
//! - **Records**: ledger entries, idempotency, audit and reconciliation rows
//!
//! # Amounts
//!
//! All balances are `rust_decimal::Decimal` values with scale 2, serialized
//! as strings (`"100.00"`). Balances are never floats.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod audit;
pub mod consumption;
pub mod error;
pub mod idempotency;
pub mod ids;
pub mod ledger;
pub mod money;
pub mod pool;
pub mod reconciliation;
pub mod withdrawal;

pub use audit::AuditEntry;
pub use consumption::Consumption;
pub use error::{LedgerError, Result};
pub use idempotency::IdempotencyRecord;
pub use ids::{
    AccountId, AuditId, EntryId, IdError, MerchantId, ReconciliationId, TxId, WithdrawalId,
};
pub use ledger::{entries_are_paired, Direction, LedgerEntry, LedgerSource};
pub use money::{bounded_credit, quantize, Amount, MAX_AMOUNT, SCALE};
pub use pool::{CreditPool, Merchant, MerchantCredit, WalletAccount};
pub use reconciliation::ReconciliationRecord;
pub use withdrawal::{FailureReason, WithdrawalOutcome, WithdrawalRequest, WithdrawalStatus};
