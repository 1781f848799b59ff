//! PostgreSQL storage implementation.
//!
//! Every compound operation runs in one transaction and takes row locks with
//! `SELECT ... FOR UPDATE` in the crate's lock order: withdrawal, pool row,
//! merchant credit row. CHECK constraints in the schema back up the balance
//! checks done in [`Consumption::plan`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use credit_pool_core::{
    AccountId, Amount, AuditEntry, AuditId, Consumption, CreditPool, Direction, EntryId,
    FailureReason, IdempotencyRecord, LedgerEntry, LedgerError, LedgerSource, Merchant,
    MerchantCredit, MerchantId, ReconciliationId, ReconciliationRecord, TxId, WalletAccount,
    WithdrawalId, WithdrawalRequest, WithdrawalStatus,
};

use crate::error::{Result, StoreError};
use crate::schema::{all_tables, POOL_ROW_ID};
use crate::{expiry, Completion, Store};

/// Expired rate limit counters are deleted once every this many increments.
const COUNTER_SWEEP_INTERVAL: u64 = 1024;

const WITHDRAWAL_COLUMNS: &str = "id, merchant_id, account_id, amount, status, bank_reference, \
     tx_id, failure_reason, attempts, created_at, updated_at";

/// PostgreSQL-backed storage implementation.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    counter_writes: Arc<AtomicU64>,
}

impl PgStore {
    /// Connect to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be established.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            counter_writes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Apply embedded migrations and check that every table exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails or a table is missing.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;

        for table in all_tables() {
            let found: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
                .bind(table)
                .fetch_one(&self.pool)
                .await?;
            if found.is_none() {
                return Err(StoreError::Database(format!("missing table: {table}")));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Row decoding
// =============================================================================

fn decode_amount(value: Decimal) -> Result<Amount> {
    Amount::new(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn merchant_from_row(row: &PgRow) -> Result<Merchant> {
    Ok(Merchant {
        id: MerchantId::from_uuid(row.try_get("id")?),
        username: row.try_get("username")?,
        is_approved: row.try_get("is_approved")?,
        requested_credit: row.try_get("requested_credit")?,
        bank_account: row.try_get("bank_account")?,
        created_at: row.try_get("created_at")?,
    })
}

fn credit_from_row(row: &PgRow) -> Result<MerchantCredit> {
    Ok(MerchantCredit {
        merchant_id: MerchantId::from_uuid(row.try_get("merchant_id")?),
        credit_limit: row.try_get("credit_limit")?,
        utilized_amount: row.try_get("utilized_amount")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn pool_from_row(row: &PgRow) -> Result<CreditPool> {
    Ok(CreditPool {
        available_amount: row.try_get("available_amount")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn withdrawal_from_row(row: &PgRow) -> Result<WithdrawalRequest> {
    let status: String = row.try_get("status")?;
    let status = WithdrawalStatus::parse(&status)
        .ok_or_else(|| StoreError::Serialization(format!("unknown withdrawal status: {status}")))?;
    let failure_reason = row
        .try_get::<Option<String>, _>("failure_reason")?
        .map(|r| {
            FailureReason::parse(&r)
                .ok_or_else(|| StoreError::Serialization(format!("unknown failure reason: {r}")))
        })
        .transpose()?;
    let attempts: i32 = row.try_get("attempts")?;

    Ok(WithdrawalRequest {
        id: WithdrawalId::from_uuid(row.try_get("id")?),
        merchant_id: MerchantId::from_uuid(row.try_get("merchant_id")?),
        account_id: AccountId::from_uuid(row.try_get("account_id")?),
        amount: decode_amount(row.try_get("amount")?)?,
        status,
        bank_reference: row.try_get("bank_reference")?,
        tx_id: row.try_get::<Option<Uuid>, _>("tx_id")?.map(TxId::from_uuid),
        failure_reason,
        attempts: u32::try_from(attempts)
            .map_err(|_| StoreError::Serialization(format!("negative attempts: {attempts}")))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry> {
    let direction: String = row.try_get("direction")?;
    let source: String = row.try_get("source")?;
    Ok(LedgerEntry {
        id: EntryId::from_uuid(row.try_get("id")?),
        tx_id: TxId::from_uuid(row.try_get("tx_id")?),
        merchant_id: MerchantId::from_uuid(row.try_get("merchant_id")?),
        account_id: AccountId::from_uuid(row.try_get("account_id")?),
        direction: Direction::parse(&direction)
            .ok_or_else(|| StoreError::Serialization(format!("unknown direction: {direction}")))?,
        source: LedgerSource::parse(&source)
            .ok_or_else(|| StoreError::Serialization(format!("unknown source: {source}")))?,
        amount: decode_amount(row.try_get("amount")?)?,
        created_at: row.try_get("created_at")?,
    })
}

fn reconciliation_from_row(row: &PgRow) -> Result<ReconciliationRecord> {
    let reason: String = row.try_get("reason")?;
    Ok(ReconciliationRecord {
        id: ReconciliationId::from_uuid(row.try_get("id")?),
        withdrawal_id: WithdrawalId::from_uuid(row.try_get("withdrawal_id")?),
        merchant_id: MerchantId::from_uuid(row.try_get("merchant_id")?),
        amount: decode_amount(row.try_get("amount")?)?,
        bank_reference: row.try_get("bank_reference")?,
        reason: FailureReason::parse(&reason)
            .ok_or_else(|| StoreError::Serialization(format!("unknown failure reason: {reason}")))?,
        created_at: row.try_get("created_at")?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<AuditEntry> {
    let status: i32 = row.try_get("status")?;
    Ok(AuditEntry {
        id: AuditId::from_uuid(row.try_get("id")?),
        method: row.try_get("method")?,
        path: row.try_get("path")?,
        status: u16::try_from(status)
            .map_err(|_| StoreError::Serialization(format!("bad status code: {status}")))?,
        actor: row.try_get("actor")?,
        payload: row.try_get("payload")?,
        created_at: row.try_get("created_at")?,
    })
}

// =============================================================================
// Locked helpers (run inside a transaction)
// =============================================================================

async fn lock_pool(conn: &mut PgConnection) -> Result<CreditPool> {
    let row = sqlx::query(
        "SELECT available_amount, updated_at FROM credit_pool WHERE id = $1 FOR UPDATE",
    )
    .bind(POOL_ROW_ID)
    .fetch_one(&mut *conn)
    .await?;
    pool_from_row(&row)
}

async fn lock_credit(
    conn: &mut PgConnection,
    merchant_id: &MerchantId,
) -> Result<Option<MerchantCredit>> {
    sqlx::query(
        "SELECT merchant_id, credit_limit, utilized_amount, updated_at \
         FROM merchant_credits WHERE merchant_id = $1 FOR UPDATE",
    )
    .bind(merchant_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await?
    .as_ref()
    .map(credit_from_row)
    .transpose()
}

async fn lock_withdrawal(
    conn: &mut PgConnection,
    withdrawal_id: &WithdrawalId,
) -> Result<WithdrawalRequest> {
    let sql = format!("SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE id = $1 FOR UPDATE");
    let row = sqlx::query(&sql)
        .bind(withdrawal_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::WithdrawalNotFound {
            withdrawal_id: withdrawal_id.to_string(),
        })?;
    withdrawal_from_row(&row)
}

async fn save_withdrawal(conn: &mut PgConnection, w: &WithdrawalRequest) -> Result<()> {
    sqlx::query(
        "UPDATE withdrawals SET status = $2, bank_reference = $3, tx_id = $4, \
         failure_reason = $5, attempts = $6, updated_at = $7 WHERE id = $1",
    )
    .bind(w.id.as_uuid())
    .bind(w.status.as_str())
    .bind(w.bank_reference.as_deref())
    .bind(w.tx_id.map(|t| *t.as_uuid()))
    .bind(w.failure_reason.map(FailureReason::as_detail))
    .bind(i32::try_from(w.attempts).unwrap_or(i32::MAX))
    .bind(w.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Lock pool then merchant credit, plan, and write the effects.
///
/// The outer `Result` carries database failures; the inner one carries the
/// ledger's verdict.
async fn consume_in(
    conn: &mut PgConnection,
    merchant_id: &MerchantId,
    account_id: AccountId,
    amount: Amount,
) -> Result<std::result::Result<Consumption, LedgerError>> {
    let pool = lock_pool(conn).await?;
    let Some(credit) = lock_credit(conn, merchant_id).await? else {
        return Ok(Err(LedgerError::MerchantNotFound {
            merchant_id: merchant_id.to_string(),
        }));
    };

    let plan = match Consumption::plan(&pool, &credit, account_id, amount) {
        Ok(plan) => plan,
        Err(err) => return Ok(Err(err)),
    };

    sqlx::query("UPDATE credit_pool SET available_amount = $2, updated_at = now() WHERE id = $1")
        .bind(POOL_ROW_ID)
        .bind(plan.pool_available)
        .execute(&mut *conn)
        .await?;
    sqlx::query(
        "UPDATE merchant_credits SET utilized_amount = $2, updated_at = now() \
         WHERE merchant_id = $1",
    )
    .bind(merchant_id.as_uuid())
    .bind(plan.merchant_utilized)
    .execute(&mut *conn)
    .await?;

    for entry in &plan.entries {
        sqlx::query(
            "INSERT INTO ledger_entries \
             (id, tx_id, merchant_id, account_id, direction, source, amount, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(entry.id.as_uuid())
        .bind(entry.tx_id.as_uuid())
        .bind(entry.merchant_id.as_uuid())
        .bind(entry.account_id.as_uuid())
        .bind(entry.direction.as_str())
        .bind(entry.source.as_str())
        .bind(entry.amount.value())
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;
    }

    Ok(Ok(plan))
}

#[async_trait]
impl Store for PgStore {
    // =========================================================================
    // Merchant Operations
    // =========================================================================

    async fn create_merchant(
        &self,
        merchant: &Merchant,
    ) -> Result<(WalletAccount, MerchantCredit)> {
        let account = WalletAccount::open(merchant.id);
        let credit = MerchantCredit::new(merchant.id);

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO merchants \
             (id, username, is_approved, requested_credit, bank_account, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(merchant.id.as_uuid())
        .bind(&merchant.username)
        .bind(merchant.is_approved)
        .bind(merchant.requested_credit)
        .bind(&merchant.bank_account)
        .bind(merchant.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match StoreError::from(e) {
            StoreError::DuplicateKey { .. } => StoreError::DuplicateKey {
                key: merchant.username.clone(),
            },
            other => other,
        })?;
        sqlx::query("INSERT INTO wallet_accounts (id, merchant_id) VALUES ($1, $2)")
            .bind(account.id.as_uuid())
            .bind(merchant.id.as_uuid())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO merchant_credits (merchant_id, credit_limit, utilized_amount, updated_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(merchant.id.as_uuid())
        .bind(credit.credit_limit)
        .bind(credit.utilized_amount)
        .bind(credit.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok((account, credit))
    }

    async fn get_merchant(&self, merchant_id: &MerchantId) -> Result<Option<Merchant>> {
        sqlx::query(
            "SELECT id, username, is_approved, requested_credit, bank_account, created_at \
             FROM merchants WHERE id = $1",
        )
        .bind(merchant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(merchant_from_row)
        .transpose()
    }

    async fn get_wallet_account(&self, merchant_id: &MerchantId) -> Result<Option<WalletAccount>> {
        let row = sqlx::query("SELECT id, merchant_id FROM wallet_accounts WHERE merchant_id = $1")
            .bind(merchant_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| -> Result<WalletAccount> {
            Ok(WalletAccount {
                id: AccountId::from_uuid(row.try_get("id")?),
                merchant_id: MerchantId::from_uuid(row.try_get("merchant_id")?),
            })
        })
        .transpose()
    }

    async fn get_merchant_credit(
        &self,
        merchant_id: &MerchantId,
    ) -> Result<Option<MerchantCredit>> {
        sqlx::query(
            "SELECT merchant_id, credit_limit, utilized_amount, updated_at \
             FROM merchant_credits WHERE merchant_id = $1",
        )
        .bind(merchant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(credit_from_row)
        .transpose()
    }

    async fn approve_merchant(
        &self,
        merchant_id: &MerchantId,
        credit_limit: Decimal,
    ) -> Result<MerchantCredit> {
        let mut tx = self.pool.begin().await?;
        lock_pool(&mut tx).await?;
        let mut credit = lock_credit(&mut tx, merchant_id)
            .await?
            .ok_or_else(|| LedgerError::MerchantNotFound {
                merchant_id: merchant_id.to_string(),
            })?;
        credit.set_limit(credit_limit)?;

        sqlx::query(
            "UPDATE merchant_credits SET credit_limit = $2, updated_at = $3 WHERE merchant_id = $1",
        )
        .bind(merchant_id.as_uuid())
        .bind(credit.credit_limit)
        .bind(credit.updated_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE merchants SET is_approved = TRUE WHERE id = $1")
            .bind(merchant_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(credit)
    }

    // =========================================================================
    // Pool Operations
    // =========================================================================

    async fn get_pool(&self) -> Result<CreditPool> {
        let row = sqlx::query("SELECT available_amount, updated_at FROM credit_pool WHERE id = $1")
            .bind(POOL_ROW_ID)
            .fetch_one(&self.pool)
            .await?;
        pool_from_row(&row)
    }

    async fn top_up_pool(&self, amount: Amount) -> Result<CreditPool> {
        let mut tx = self.pool.begin().await?;
        let mut pool = lock_pool(&mut tx).await?;
        pool.top_up(amount)?;
        sqlx::query("UPDATE credit_pool SET available_amount = $2, updated_at = $3 WHERE id = $1")
            .bind(POOL_ROW_ID)
            .bind(pool.available_amount)
            .bind(pool.updated_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(pool)
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    async fn consume_credit(
        &self,
        merchant_id: &MerchantId,
        account_id: &AccountId,
        amount: Amount,
    ) -> Result<Consumption> {
        let mut tx = self.pool.begin().await?;
        match consume_in(&mut tx, merchant_id, *account_id, amount).await? {
            Ok(consumption) => {
                tx.commit().await?;
                Ok(consumption)
            }
            Err(err) => {
                tx.rollback().await?;
                Err(err.into())
            }
        }
    }

    async fn list_ledger_entries(
        &self,
        merchant_id: Option<&MerchantId>,
    ) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            "SELECT id, tx_id, merchant_id, account_id, direction, source, amount, created_at \
             FROM ledger_entries WHERE ($1::uuid IS NULL OR merchant_id = $1) \
             ORDER BY created_at, tx_id, direction DESC",
        )
        .bind(merchant_id.map(|id| *id.as_uuid()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    // =========================================================================
    // Withdrawal Operations
    // =========================================================================

    async fn create_withdrawal(&self, w: &WithdrawalRequest) -> Result<()> {
        sqlx::query(
            "INSERT INTO withdrawals \
             (id, merchant_id, account_id, amount, status, bank_reference, tx_id, \
              failure_reason, attempts, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(w.id.as_uuid())
        .bind(w.merchant_id.as_uuid())
        .bind(w.account_id.as_uuid())
        .bind(w.amount.value())
        .bind(w.status.as_str())
        .bind(w.bank_reference.as_deref())
        .bind(w.tx_id.map(|t| *t.as_uuid()))
        .bind(w.failure_reason.map(FailureReason::as_detail))
        .bind(i32::try_from(w.attempts).unwrap_or(i32::MAX))
        .bind(w.created_at)
        .bind(w.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_withdrawal(
        &self,
        withdrawal_id: &WithdrawalId,
    ) -> Result<Option<WithdrawalRequest>> {
        let sql = format!("SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE id = $1");
        sqlx::query(&sql)
            .bind(withdrawal_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(withdrawal_from_row)
            .transpose()
    }

    async fn mark_withdrawal_queued(
        &self,
        withdrawal_id: &WithdrawalId,
    ) -> Result<WithdrawalRequest> {
        let mut tx = self.pool.begin().await?;
        let mut withdrawal = lock_withdrawal(&mut tx, withdrawal_id).await?;
        withdrawal.mark_queued()?;
        save_withdrawal(&mut tx, &withdrawal).await?;
        tx.commit().await?;
        Ok(withdrawal)
    }

    async fn record_settlement_attempt(&self, withdrawal_id: &WithdrawalId) -> Result<u32> {
        let attempts: Option<i32> = sqlx::query_scalar(
            "UPDATE withdrawals SET attempts = attempts + 1, updated_at = now() \
             WHERE id = $1 RETURNING attempts",
        )
        .bind(withdrawal_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        let attempts = attempts.ok_or_else(|| LedgerError::WithdrawalNotFound {
            withdrawal_id: withdrawal_id.to_string(),
        })?;
        u32::try_from(attempts)
            .map_err(|_| StoreError::Serialization(format!("negative attempts: {attempts}")))
    }

    async fn complete_withdrawal(
        &self,
        withdrawal_id: &WithdrawalId,
        bank_reference: &str,
    ) -> Result<Completion> {
        let mut tx = self.pool.begin().await?;
        let mut withdrawal = lock_withdrawal(&mut tx, withdrawal_id).await?;
        if withdrawal.is_terminal() {
            tx.rollback().await?;
            return Ok(Completion::AlreadyTerminal(withdrawal));
        }

        let completion = match consume_in(
            &mut tx,
            &withdrawal.merchant_id,
            withdrawal.account_id,
            withdrawal.amount,
        )
        .await?
        {
            Ok(consumption) => {
                withdrawal.succeed(consumption.tx_id, bank_reference)?;
                save_withdrawal(&mut tx, &withdrawal).await?;
                Completion::Settled(withdrawal)
            }
            Err(error) => {
                let reason = FailureReason::from_consumption(&error);
                withdrawal.fail(reason)?;
                save_withdrawal(&mut tx, &withdrawal).await?;

                let record =
                    ReconciliationRecord::for_withdrawal(&withdrawal, bank_reference, reason);
                sqlx::query(
                    "INSERT INTO reconciliation_records \
                     (id, withdrawal_id, merchant_id, amount, bank_reference, reason, created_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                )
                .bind(record.id.as_uuid())
                .bind(record.withdrawal_id.as_uuid())
                .bind(record.merchant_id.as_uuid())
                .bind(record.amount.value())
                .bind(&record.bank_reference)
                .bind(record.reason.as_detail())
                .bind(record.created_at)
                .execute(&mut *tx)
                .await?;

                Completion::Unconsumed {
                    withdrawal,
                    error,
                    reconciliation: record,
                }
            }
        };

        tx.commit().await?;
        Ok(completion)
    }

    async fn fail_withdrawal(
        &self,
        withdrawal_id: &WithdrawalId,
        reason: FailureReason,
    ) -> Result<WithdrawalRequest> {
        let mut tx = self.pool.begin().await?;
        let mut withdrawal = lock_withdrawal(&mut tx, withdrawal_id).await?;
        if withdrawal.is_terminal() {
            tx.rollback().await?;
            return Ok(withdrawal);
        }
        withdrawal.fail(reason)?;
        save_withdrawal(&mut tx, &withdrawal).await?;
        tx.commit().await?;
        Ok(withdrawal)
    }

    async fn list_withdrawals_by_status(
        &self,
        status: WithdrawalStatus,
    ) -> Result<Vec<WithdrawalRequest>> {
        let sql = format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE status = $1 ORDER BY created_at"
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(withdrawal_from_row).collect()
    }

    // =========================================================================
    // Idempotency Operations
    // =========================================================================

    async fn get_idempotency_record(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            "SELECT key, request_fingerprint, status_code, response_body, created_at \
             FROM idempotency_records WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| -> Result<IdempotencyRecord> {
            let status_code: i32 = row.try_get("status_code")?;
            Ok(IdempotencyRecord {
                key: row.try_get("key")?,
                request_fingerprint: row.try_get("request_fingerprint")?,
                status_code: u16::try_from(status_code).map_err(|_| {
                    StoreError::Serialization(format!("bad status code: {status_code}"))
                })?,
                response_body: row.try_get("response_body")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
    }

    async fn insert_idempotency_record(&self, record: &IdempotencyRecord) -> Result<()> {
        let inserted = sqlx::query(
            "INSERT INTO idempotency_records \
             (key, request_fingerprint, status_code, response_body, created_at) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (key) DO NOTHING",
        )
        .bind(&record.key)
        .bind(&record.request_fingerprint)
        .bind(i32::from(record.status_code))
        .bind(&record.response_body)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if inserted == 0 {
            return Err(StoreError::DuplicateKey {
                key: record.key.clone(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Audit and Reconciliation
    // =========================================================================

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_log (id, method, path, status, actor, payload, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id.as_uuid())
        .bind(&entry.method)
        .bind(&entry.path)
        .bind(i32::from(entry.status))
        .bind(entry.actor.as_deref())
        .bind(&entry.payload)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_audit_entries(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT id, method, path, status, actor, payload, created_at \
             FROM audit_log ORDER BY created_at DESC LIMIT $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(audit_from_row).collect()
    }

    async fn list_reconciliation_records(&self) -> Result<Vec<ReconciliationRecord>> {
        let rows = sqlx::query(
            "SELECT id, withdrawal_id, merchant_id, amount, bank_reference, reason, created_at \
             FROM reconciliation_records ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(reconciliation_from_row).collect()
    }

    // =========================================================================
    // Rate Limit Counters
    // =========================================================================

    async fn incr_window_counter(
        &self,
        key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "INSERT INTO rate_limit_counters (key, count, expires_at) VALUES ($1, 1, $2) \
             ON CONFLICT (key) DO UPDATE SET \
               count = CASE WHEN rate_limit_counters.expires_at <= $3 THEN 1 \
                            ELSE rate_limit_counters.count + 1 END, \
               expires_at = EXCLUDED.expires_at \
             RETURNING count",
        )
        .bind(key)
        .bind(expiry(now, ttl))
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let writes = self.counter_writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % COUNTER_SWEEP_INTERVAL == 0 {
            match self.purge_expired_counters(now).await {
                Ok(removed) => tracing::debug!(removed, "Purged expired rate limit counters"),
                Err(e) => tracing::warn!(error = %e, "Failed to purge rate limit counters"),
            }
        }

        u64::try_from(count).map_err(|_| StoreError::Serialization(format!("bad count: {count}")))
    }

    async fn purge_expired_counters(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rate_limit_counters WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
