//! Error types for the credit ledger.

use rust_decimal::Decimal;

use crate::withdrawal::WithdrawalStatus;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur in ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The merchant's remaining credit does not cover the amount.
    #[error("insufficient merchant credit: available={available}, required={required}")]
    InsufficientMerchantCredit {
        /// Credit still available to the merchant.
        available: Decimal,
        /// Amount requested.
        required: Decimal,
    },

    /// The shared pool does not cover the amount.
    #[error("insufficient pool: available={available}, required={required}")]
    InsufficientPool {
        /// Current pool balance.
        available: Decimal,
        /// Amount requested.
        required: Decimal,
    },

    /// Merchant (or its credit row) not found.
    #[error("merchant not found: {merchant_id}")]
    MerchantNotFound {
        /// The merchant ID that was not found.
        merchant_id: String,
    },

    /// Merchant exists but has not been approved.
    #[error("merchant not approved: {merchant_id}")]
    MerchantNotApproved {
        /// The unapproved merchant.
        merchant_id: String,
    },

    /// Withdrawal not found.
    #[error("withdrawal not found: {withdrawal_id}")]
    WithdrawalNotFound {
        /// The withdrawal ID that was not found.
        withdrawal_id: String,
    },

    /// Invalid amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// A credit limit below what the merchant already uses.
    #[error("credit limit {limit} is below utilized amount {utilized}")]
    CreditLimitBelowUtilization {
        /// Requested limit.
        limit: Decimal,
        /// Amount already utilized.
        utilized: Decimal,
    },

    /// Withdrawal state transition not allowed.
    #[error("invalid withdrawal transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// Current status.
        from: WithdrawalStatus,
        /// Requested status.
        to: WithdrawalStatus,
    },
}
