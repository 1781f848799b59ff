//! Table names shared by the storage backends.

/// Table names in the PostgreSQL schema.
pub mod tables {
    /// Registered merchants.
    pub const MERCHANTS: &str = "merchants";

    /// One wallet account per merchant.
    pub const WALLET_ACCOUNTS: &str = "wallet_accounts";

    /// Per-merchant credit limit and utilization.
    pub const MERCHANT_CREDITS: &str = "merchant_credits";

    /// The singleton pool row (`id = 1`).
    pub const CREDIT_POOL: &str = "credit_pool";

    /// Withdrawal requests, keyed by id.
    pub const WITHDRAWALS: &str = "withdrawals";

    /// Immutable ledger pairs.
    pub const LEDGER_ENTRIES: &str = "ledger_entries";

    /// Stored responses, unique by key.
    pub const IDEMPOTENCY_RECORDS: &str = "idempotency_records";

    /// Processed API requests.
    pub const AUDIT_LOG: &str = "audit_log";

    /// Settlements that could not be consumed.
    pub const RECONCILIATION_RECORDS: &str = "reconciliation_records";

    /// Fixed-window request counters.
    pub const RATE_LIMIT_COUNTERS: &str = "rate_limit_counters";
}

/// Primary key of the singleton pool row.
pub const POOL_ROW_ID: i32 = 1;

/// Returns every table name, parents before children.
#[must_use]
pub fn all_tables() -> Vec<&'static str> {
    vec![
        tables::MERCHANTS,
        tables::WALLET_ACCOUNTS,
        tables::MERCHANT_CREDITS,
        tables::CREDIT_POOL,
        tables::WITHDRAWALS,
        tables::LEDGER_ENTRIES,
        tables::IDEMPOTENCY_RECORDS,
        tables::AUDIT_LOG,
        tables::RECONCILIATION_RECORDS,
        tables::RATE_LIMIT_COUNTERS,
    ]
}
