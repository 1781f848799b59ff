//! Storage layer for the credit pool.
//!
//! This crate persists merchants, the pool, withdrawals, ledger pairs and the
//! records around them. Two backends implement the [`Store`] trait:
//!
//! - [`MemoryStore`]: tokio mutexes, used by tests and single-node setups
//! - `PgStore` (feature `postgres`): `SELECT ... FOR UPDATE` inside one
//!   transaction, CHECK constraints mirroring the balance invariants
//!
//! # Lock order
//!
//! Every operation that touches both the pool and a merchant's credit locks
//! the pool first. Completing a withdrawal locks the withdrawal before
//! either.
//!
//! # Example
//!
//! ```no_run
//! use credit_pool_core::{Amount, Merchant};
//! use credit_pool_store::{MemoryStore, Store};
//! use rust_decimal::Decimal;
//!
//! # async fn run() -> credit_pool_store::Result<()> {
//! let store = MemoryStore::new();
//! let merchant = Merchant::new("acme", Decimal::new(100, 0), "");
//! let (account, _credit) = store.create_merchant(&merchant).await?;
//! store.approve_merchant(&merchant.id, Decimal::new(100, 0)).await?;
//! store.top_up_pool(Amount::new(Decimal::new(1000, 0))?).await?;
//!
//! let consumption = store
//!     .consume_credit(&merchant.id, &account.id, Amount::new(Decimal::new(25, 0))?)
//!     .await?;
//! println!("tx {}", consumption.tx_id);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credit_pool_core::{
    AccountId, Amount, AuditEntry, Consumption, CreditPool, FailureReason, IdempotencyRecord,
    LedgerEntry, LedgerError, Merchant, MerchantCredit, MerchantId, ReconciliationRecord,
    WalletAccount, WithdrawalId, WithdrawalRequest, WithdrawalStatus,
};
use rust_decimal::Decimal;

/// Result of settling a withdrawal into the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Consumption committed; the withdrawal is `SUCCESS`.
    Settled(WithdrawalRequest),
    /// Consumption failed; the withdrawal is `FAILED` and a reconciliation
    /// record was written with it.
    Unconsumed {
        /// The failed withdrawal.
        withdrawal: WithdrawalRequest,
        /// Why consumption failed.
        error: LedgerError,
        /// The operator-facing record.
        reconciliation: ReconciliationRecord,
    },
    /// The withdrawal was already terminal. Nothing changed.
    AlreadyTerminal(WithdrawalRequest),
}

impl Completion {
    /// The withdrawal as stored after the operation.
    #[must_use]
    pub const fn withdrawal(&self) -> &WithdrawalRequest {
        match self {
            Self::Settled(w) | Self::AlreadyTerminal(w) => w,
            Self::Unconsumed { withdrawal, .. } => withdrawal,
        }
    }
}

/// The storage trait defining all database operations.
///
/// Implementations must make each method a single atomic unit of work.
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Merchant Operations
    // =========================================================================

    /// Register a merchant with its wallet account and a zero-limit credit row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateKey` if the username is taken.
    async fn create_merchant(
        &self,
        merchant: &Merchant,
    ) -> Result<(WalletAccount, MerchantCredit)>;

    /// Get a merchant by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_merchant(&self, merchant_id: &MerchantId) -> Result<Option<Merchant>>;

    /// Get the wallet account owned by a merchant.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_wallet_account(&self, merchant_id: &MerchantId) -> Result<Option<WalletAccount>>;

    /// Get a merchant's credit row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_merchant_credit(&self, merchant_id: &MerchantId)
        -> Result<Option<MerchantCredit>>;

    /// Approve a merchant and set its credit limit.
    ///
    /// Locks the pool, then the merchant's credit.
    ///
    /// # Errors
    ///
    /// - `LedgerError::MerchantNotFound` if the merchant doesn't exist.
    /// - `LedgerError::CreditLimitBelowUtilization` if `credit_limit` is below
    ///   what the merchant already uses.
    async fn approve_merchant(
        &self,
        merchant_id: &MerchantId,
        credit_limit: Decimal,
    ) -> Result<MerchantCredit>;

    // =========================================================================
    // Pool Operations
    // =========================================================================

    /// Read the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_pool(&self) -> Result<CreditPool>;

    /// Add `amount` to the pool under the pool lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn top_up_pool(&self, amount: Amount) -> Result<CreditPool>;

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// Consume `amount` from the pool and the merchant's credit atomically.
    ///
    /// Not idempotent: each call that succeeds writes a new ledger pair.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InsufficientMerchantCredit`
    /// - `LedgerError::InsufficientPool`
    /// - `LedgerError::MerchantNotFound` if the merchant has no credit row.
    async fn consume_credit(
        &self,
        merchant_id: &MerchantId,
        account_id: &AccountId,
        amount: Amount,
    ) -> Result<Consumption>;

    /// List ledger entries, optionally for one merchant, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_ledger_entries(&self, merchant_id: Option<&MerchantId>)
        -> Result<Vec<LedgerEntry>>;

    // =========================================================================
    // Withdrawal Operations
    // =========================================================================

    /// Insert a new withdrawal.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateKey` if the ID exists.
    async fn create_withdrawal(&self, withdrawal: &WithdrawalRequest) -> Result<()>;

    /// Get a withdrawal by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_withdrawal(&self, withdrawal_id: &WithdrawalId)
        -> Result<Option<WithdrawalRequest>>;

    /// Move a `PENDING` withdrawal to `QUEUED`.
    ///
    /// # Errors
    ///
    /// - `LedgerError::WithdrawalNotFound`
    /// - `LedgerError::InvalidTransition` if not `PENDING`.
    async fn mark_withdrawal_queued(&self, withdrawal_id: &WithdrawalId)
        -> Result<WithdrawalRequest>;

    /// Count one settlement call against a withdrawal. Returns the new count.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::WithdrawalNotFound` if the withdrawal doesn't exist.
    async fn record_settlement_attempt(&self, withdrawal_id: &WithdrawalId) -> Result<u32>;

    /// Consume the withdrawal's amount and mark it `SUCCESS` in one unit of work.
    ///
    /// Locks the withdrawal, then the pool, then the merchant's credit. A
    /// withdrawal that is already terminal is returned unchanged. A failed
    /// consumption marks it `FAILED` and writes a reconciliation record
    /// carrying `bank_reference`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::WithdrawalNotFound` if the withdrawal doesn't exist.
    async fn complete_withdrawal(
        &self,
        withdrawal_id: &WithdrawalId,
        bank_reference: &str,
    ) -> Result<Completion>;

    /// Mark a non-terminal withdrawal `FAILED`.
    ///
    /// A withdrawal that is already terminal is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::WithdrawalNotFound` if the withdrawal doesn't exist.
    async fn fail_withdrawal(
        &self,
        withdrawal_id: &WithdrawalId,
        reason: FailureReason,
    ) -> Result<WithdrawalRequest>;

    /// List withdrawals in `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_withdrawals_by_status(
        &self,
        status: WithdrawalStatus,
    ) -> Result<Vec<WithdrawalRequest>>;

    // =========================================================================
    // Idempotency Operations
    // =========================================================================

    /// Get the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_idempotency_record(&self, key: &str) -> Result<Option<IdempotencyRecord>>;

    /// Insert a record. Records are write-once.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateKey` if `record.key` already exists.
    async fn insert_idempotency_record(&self, record: &IdempotencyRecord) -> Result<()>;

    // =========================================================================
    // Audit and Reconciliation
    // =========================================================================

    /// Append an audit entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn append_audit(&self, entry: &AuditEntry) -> Result<()>;

    /// List the most recent audit entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_audit_entries(&self, limit: usize) -> Result<Vec<AuditEntry>>;

    /// List reconciliation records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_reconciliation_records(&self) -> Result<Vec<ReconciliationRecord>>;

    // =========================================================================
    // Rate Limit Counters
    // =========================================================================

    /// Increment the counter for `key` and refresh its expiry to `now + ttl`,
    /// as one indivisible step. Returns the post-increment count.
    ///
    /// An expired counter restarts at 1.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn incr_window_counter(
        &self,
        key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    /// Delete counters expired at `now`. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn purge_expired_counters(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Convert a `std::time::Duration` TTL to a `chrono` deadline from `now`.
pub(crate) fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
