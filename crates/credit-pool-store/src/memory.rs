//! In-memory storage backed by tokio mutexes.
//!
//! Each balance lives behind its own mutex. The pool mutex is always taken
//! before a merchant's credit mutex, and a withdrawal's mutex before either,
//! so concurrent consumptions serialize on the pool exactly as the
//! PostgreSQL backend serializes on the pool row.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use credit_pool_core::{
    AccountId, Amount, AuditEntry, Consumption, CreditPool, FailureReason, IdempotencyRecord,
    LedgerEntry, LedgerError, Merchant, MerchantCredit, MerchantId, ReconciliationRecord,
    WalletAccount, WithdrawalId, WithdrawalRequest, WithdrawalStatus,
};
use rust_decimal::Decimal;

use crate::error::{Result, StoreError};
use crate::{expiry, Completion, Store};

/// Counters are swept of expired entries once the map grows past this size.
const COUNTER_SWEEP_THRESHOLD: usize = 4096;

#[derive(Debug)]
struct Counter {
    count: u64,
    expires_at: DateTime<Utc>,
}

/// In-memory [`Store`] implementation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pool: Mutex<CreditPool>,
    merchants: RwLock<HashMap<MerchantId, Merchant>>,
    accounts: RwLock<HashMap<MerchantId, WalletAccount>>,
    credits: RwLock<HashMap<MerchantId, Arc<Mutex<MerchantCredit>>>>,
    withdrawals: RwLock<HashMap<WithdrawalId, Arc<Mutex<WithdrawalRequest>>>>,
    ledger: Mutex<Vec<LedgerEntry>>,
    idempotency: Mutex<HashMap<String, IdempotencyRecord>>,
    audit: Mutex<Vec<AuditEntry>>,
    reconciliation: Mutex<Vec<ReconciliationRecord>>,
    counters: Mutex<HashMap<String, Counter>>,
}

impl MemoryStore {
    /// Create an empty store with an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn credit_handle(
        &self,
        merchant_id: &MerchantId,
    ) -> Result<Arc<Mutex<MerchantCredit>>> {
        self.credits
            .read()
            .await
            .get(merchant_id)
            .cloned()
            .ok_or_else(|| {
                LedgerError::MerchantNotFound {
                    merchant_id: merchant_id.to_string(),
                }
                .into()
            })
    }

    async fn withdrawal_handle(
        &self,
        withdrawal_id: &WithdrawalId,
    ) -> Result<Arc<Mutex<WithdrawalRequest>>> {
        self.withdrawals
            .read()
            .await
            .get(withdrawal_id)
            .cloned()
            .ok_or_else(|| {
                LedgerError::WithdrawalNotFound {
                    withdrawal_id: withdrawal_id.to_string(),
                }
                .into()
            })
    }

    /// Lock the pool then the merchant's credit, plan, check and apply.
    ///
    /// The ledger pair is appended while both locks are still held.
    async fn consume_locked(
        &self,
        merchant_id: &MerchantId,
        account_id: AccountId,
        amount: Amount,
    ) -> Result<std::result::Result<Consumption, LedgerError>> {
        let mut pool = self.pool.lock().await;
        let handle = match self.credit_handle(merchant_id).await {
            Ok(handle) => handle,
            Err(StoreError::Ledger(err)) => return Ok(Err(err)),
            Err(err) => return Err(err),
        };
        let mut credit = handle.lock().await;

        let plan = match Consumption::plan(&pool, &credit, account_id, amount) {
            Ok(plan) => plan,
            Err(err) => return Ok(Err(err)),
        };

        let mut next_pool = pool.clone();
        let mut next_credit = credit.clone();
        plan.apply(&mut next_pool, &mut next_credit);
        if !next_pool.is_consistent() || !next_credit.is_consistent() {
            return Err(StoreError::ConstraintViolation(format!(
                "consumption would leave pool={} utilized={} limit={}",
                next_pool.available_amount, next_credit.utilized_amount, next_credit.credit_limit
            )));
        }

        self.ledger.lock().await.extend(plan.entries.iter().cloned());
        *pool = next_pool;
        *credit = next_credit;
        Ok(Ok(plan))
    }
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // Merchant Operations
    // =========================================================================

    async fn create_merchant(
        &self,
        merchant: &Merchant,
    ) -> Result<(WalletAccount, MerchantCredit)> {
        let mut merchants = self.merchants.write().await;
        if merchants.contains_key(&merchant.id)
            || merchants.values().any(|m| m.username == merchant.username)
        {
            return Err(StoreError::DuplicateKey {
                key: merchant.username.clone(),
            });
        }

        let account = WalletAccount::open(merchant.id);
        let credit = MerchantCredit::new(merchant.id);

        self.accounts
            .write()
            .await
            .insert(merchant.id, account.clone());
        self.credits
            .write()
            .await
            .insert(merchant.id, Arc::new(Mutex::new(credit.clone())));
        merchants.insert(merchant.id, merchant.clone());

        Ok((account, credit))
    }

    async fn get_merchant(&self, merchant_id: &MerchantId) -> Result<Option<Merchant>> {
        Ok(self.merchants.read().await.get(merchant_id).cloned())
    }

    async fn get_wallet_account(&self, merchant_id: &MerchantId) -> Result<Option<WalletAccount>> {
        Ok(self.accounts.read().await.get(merchant_id).cloned())
    }

    async fn get_merchant_credit(
        &self,
        merchant_id: &MerchantId,
    ) -> Result<Option<MerchantCredit>> {
        let handle = self.credits.read().await.get(merchant_id).cloned();
        match handle {
            Some(handle) => Ok(Some(handle.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn approve_merchant(
        &self,
        merchant_id: &MerchantId,
        credit_limit: Decimal,
    ) -> Result<MerchantCredit> {
        let _pool = self.pool.lock().await;
        let handle = self.credit_handle(merchant_id).await?;
        let mut credit = handle.lock().await;

        let mut merchants = self.merchants.write().await;
        let merchant = merchants
            .get_mut(merchant_id)
            .ok_or_else(|| LedgerError::MerchantNotFound {
                merchant_id: merchant_id.to_string(),
            })?;

        let mut next = credit.clone();
        next.set_limit(credit_limit)?;
        merchant.is_approved = true;
        *credit = next;

        Ok(credit.clone())
    }

    // =========================================================================
    // Pool Operations
    // =========================================================================

    async fn get_pool(&self) -> Result<CreditPool> {
        Ok(self.pool.lock().await.clone())
    }

    async fn top_up_pool(&self, amount: Amount) -> Result<CreditPool> {
        let mut pool = self.pool.lock().await;
        let mut next = pool.clone();
        next.top_up(amount)?;
        *pool = next;
        Ok(pool.clone())
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
        Ok(self.consume_locked(merchant_id, *account_id, amount).await??)
    }

    async fn list_ledger_entries(
        &self,
        merchant_id: Option<&MerchantId>,
    ) -> Result<Vec<LedgerEntry>> {
        let ledger = self.ledger.lock().await;
        Ok(ledger
            .iter()
            .filter(|e| merchant_id.map_or(true, |id| &e.merchant_id == id))
            .cloned()
            .collect())
    }

    // =========================================================================
    // Withdrawal Operations
    // =========================================================================

    async fn create_withdrawal(&self, withdrawal: &WithdrawalRequest) -> Result<()> {
        let mut withdrawals = self.withdrawals.write().await;
        if withdrawals.contains_key(&withdrawal.id) {
            return Err(StoreError::DuplicateKey {
                key: withdrawal.id.to_string(),
            });
        }
        withdrawals.insert(withdrawal.id, Arc::new(Mutex::new(withdrawal.clone())));
        Ok(())
    }

    async fn get_withdrawal(
        &self,
        withdrawal_id: &WithdrawalId,
    ) -> Result<Option<WithdrawalRequest>> {
        let handle = self.withdrawals.read().await.get(withdrawal_id).cloned();
        match handle {
            Some(handle) => Ok(Some(handle.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn mark_withdrawal_queued(
        &self,
        withdrawal_id: &WithdrawalId,
    ) -> Result<WithdrawalRequest> {
        let handle = self.withdrawal_handle(withdrawal_id).await?;
        let mut withdrawal = handle.lock().await;
        withdrawal.mark_queued()?;
        Ok(withdrawal.clone())
    }

    async fn record_settlement_attempt(&self, withdrawal_id: &WithdrawalId) -> Result<u32> {
        let handle = self.withdrawal_handle(withdrawal_id).await?;
        let mut withdrawal = handle.lock().await;
        withdrawal.record_attempt();
        Ok(withdrawal.attempts)
    }

    async fn complete_withdrawal(
        &self,
        withdrawal_id: &WithdrawalId,
        bank_reference: &str,
    ) -> Result<Completion> {
        let handle = self.withdrawal_handle(withdrawal_id).await?;
        let mut withdrawal = handle.lock().await;
        if withdrawal.is_terminal() {
            return Ok(Completion::AlreadyTerminal(withdrawal.clone()));
        }

        let mut next = withdrawal.clone();
        match self
            .consume_locked(&next.merchant_id, next.account_id, next.amount)
            .await?
        {
            Ok(consumption) => {
                next.succeed(consumption.tx_id, bank_reference)?;
                *withdrawal = next;
                Ok(Completion::Settled(withdrawal.clone()))
            }
            Err(error) => {
                let reason = FailureReason::from_consumption(&error);
                next.fail(reason)?;
                let reconciliation =
                    ReconciliationRecord::for_withdrawal(&next, bank_reference, reason);
                self.reconciliation.lock().await.push(reconciliation.clone());
                *withdrawal = next;
                Ok(Completion::Unconsumed {
                    withdrawal: withdrawal.clone(),
                    error,
                    reconciliation,
                })
            }
        }
    }

    async fn fail_withdrawal(
        &self,
        withdrawal_id: &WithdrawalId,
        reason: FailureReason,
    ) -> Result<WithdrawalRequest> {
        let handle = self.withdrawal_handle(withdrawal_id).await?;
        let mut withdrawal = handle.lock().await;
        if !withdrawal.is_terminal() {
            withdrawal.fail(reason)?;
        }
        Ok(withdrawal.clone())
    }

    async fn list_withdrawals_by_status(
        &self,
        status: WithdrawalStatus,
    ) -> Result<Vec<WithdrawalRequest>> {
        let handles: Vec<_> = self.withdrawals.read().await.values().cloned().collect();
        let mut out = Vec::new();
        for handle in handles {
            let withdrawal = handle.lock().await;
            if withdrawal.status == status {
                out.push(withdrawal.clone());
            }
        }
        out.sort_by_key(|w| w.created_at);
        Ok(out)
    }

    // =========================================================================
    // Idempotency Operations
    // =========================================================================

    async fn get_idempotency_record(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        Ok(self.idempotency.lock().await.get(key).cloned())
    }

    async fn insert_idempotency_record(&self, record: &IdempotencyRecord) -> Result<()> {
        let mut records = self.idempotency.lock().await;
        if records.contains_key(&record.key) {
            return Err(StoreError::DuplicateKey {
                key: record.key.clone(),
            });
        }
        records.insert(record.key.clone(), record.clone());
        Ok(())
    }

    // =========================================================================
    // Audit and Reconciliation
    // =========================================================================

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.audit.lock().await.push(entry.clone());
        Ok(())
    }

    async fn list_audit_entries(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let audit = self.audit.lock().await;
        Ok(audit.iter().rev().take(limit).cloned().collect())
    }

    async fn list_reconciliation_records(&self) -> Result<Vec<ReconciliationRecord>> {
        Ok(self.reconciliation.lock().await.clone())
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
        let mut counters = self.counters.lock().await;
        if counters.len() > COUNTER_SWEEP_THRESHOLD {
            counters.retain(|_, c| c.expires_at > now);
        }

        let expires_at = expiry(now, ttl);
        let counter = counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at,
        });
        if counter.expires_at <= now {
            counter.count = 0;
        }
        counter.count += 1;
        counter.expires_at = expires_at;
        Ok(counter.count)
    }

    async fn purge_expired_counters(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut counters = self.counters.lock().await;
        let before = counters.len();
        counters.retain(|_, c| c.expires_at > now);
        Ok(u64::try_from(before - counters.len()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn amount(v: Decimal) -> Amount {
        Amount::new(v).unwrap()
    }

    async fn approved_merchant(
        store: &MemoryStore,
        limit: Decimal,
    ) -> (Merchant, WalletAccount) {
        let merchant = Merchant::new(format!("m-{}", MerchantId::generate()), limit, "NL91BANK");
        let (account, _) = store.create_merchant(&merchant).await.unwrap();
        store.approve_merchant(&merchant.id, limit).await.unwrap();
        (merchant, account)
    }

    #[tokio::test]
    async fn registration_creates_account_and_zero_credit() {
        let store = MemoryStore::new();
        let merchant = Merchant::new("acme", dec!(50), "");
        let (account, credit) = store.create_merchant(&merchant).await.unwrap();

        assert_eq!(account.merchant_id, merchant.id);
        assert_eq!(credit.credit_limit, dec!(0));
        assert_eq!(
            store.get_wallet_account(&merchant.id).await.unwrap(),
            Some(account)
        );
        assert!(!store.get_merchant(&merchant.id).await.unwrap().unwrap().is_approved);

        let dup = Merchant::new("acme", dec!(1), "");
        assert!(matches!(
            store.create_merchant(&dup).await,
            Err(StoreError::DuplicateKey { .. })
        ));
    }

    #[tokio::test]
    async fn consume_moves_both_balances_and_writes_pair() {
        let store = MemoryStore::new();
        store.top_up_pool(amount(dec!(100))).await.unwrap();
        let (merchant, account) = approved_merchant(&store, dec!(40)).await;

        let consumption = store
            .consume_credit(&merchant.id, &account.id, amount(dec!(15.25)))
            .await
            .unwrap();

        assert_eq!(store.get_pool().await.unwrap().available_amount, dec!(84.75));
        let credit = store.get_merchant_credit(&merchant.id).await.unwrap().unwrap();
        assert_eq!(credit.utilized_amount, dec!(15.25));

        let entries = store.list_ledger_entries(Some(&merchant.id)).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.tx_id == consumption.tx_id));
        assert!(credit_pool_core::entries_are_paired(&entries));
    }

    #[tokio::test]
    async fn failed_consumption_leaves_no_trace() {
        let store = MemoryStore::new();
        store.top_up_pool(amount(dec!(5))).await.unwrap();
        let (merchant, account) = approved_merchant(&store, dec!(40)).await;

        let err = store
            .consume_credit(&merchant.id, &account.id, amount(dec!(6)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Ledger(LedgerError::InsufficientPool { .. })
        ));
        assert_eq!(store.get_pool().await.unwrap().available_amount, dec!(5));
        assert!(store.list_ledger_entries(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_merchant_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .consume_credit(&MerchantId::generate(), &AccountId::generate(), amount(dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Ledger(LedgerError::MerchantNotFound { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumptions_respect_merchant_limit() {
        let store = Arc::new(MemoryStore::new());
        store.top_up_pool(amount(dec!(1000))).await.unwrap();
        let (merchant, account) = approved_merchant(&store, dec!(10)).await;
        let (merchant_id, account_id) = (merchant.id, account.id);

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .consume_credit(&merchant_id, &account_id, amount(dec!(1)))
                        .await
                })
            })
            .collect();

        let mut ok = 0;
        let mut short = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(StoreError::Ledger(LedgerError::InsufficientMerchantCredit { .. })) => {
                    short += 1;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(ok, 10);
        assert_eq!(short, 10);
        let credit = store.get_merchant_credit(&merchant.id).await.unwrap().unwrap();
        assert_eq!(credit.utilized_amount, dec!(10.00));
        assert_eq!(store.get_pool().await.unwrap().available_amount, dec!(990.00));
        let entries = store.list_ledger_entries(None).await.unwrap();
        assert_eq!(entries.len(), 20);
        assert!(credit_pool_core::entries_are_paired(&entries));
    }

    #[tokio::test]
    async fn complete_withdrawal_settles_once() {
        let store = MemoryStore::new();
        store.top_up_pool(amount(dec!(100))).await.unwrap();
        let (merchant, account) = approved_merchant(&store, dec!(50)).await;
        let withdrawal = WithdrawalRequest::new(merchant.id, account.id, amount(dec!(20)));
        store.create_withdrawal(&withdrawal).await.unwrap();

        let first = store.complete_withdrawal(&withdrawal.id, "BNK-1").await.unwrap();
        let Completion::Settled(settled) = first else {
            panic!("expected settled");
        };
        assert_eq!(settled.status, WithdrawalStatus::Success);
        assert_eq!(settled.bank_reference.as_deref(), Some("BNK-1"));

        let again = store.complete_withdrawal(&withdrawal.id, "BNK-2").await.unwrap();
        assert!(matches!(again, Completion::AlreadyTerminal(_)));
        assert_eq!(again.withdrawal().bank_reference.as_deref(), Some("BNK-1"));
        assert_eq!(store.list_ledger_entries(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unconsumed_settlement_writes_reconciliation() {
        let store = MemoryStore::new();
        store.top_up_pool(amount(dec!(100))).await.unwrap();
        let (merchant, account) = approved_merchant(&store, dec!(5)).await;
        let withdrawal = WithdrawalRequest::new(merchant.id, account.id, amount(dec!(20)));
        store.create_withdrawal(&withdrawal).await.unwrap();

        let completion = store.complete_withdrawal(&withdrawal.id, "BNK-9").await.unwrap();
        let Completion::Unconsumed {
            withdrawal: failed,
            reconciliation,
            ..
        } = completion
        else {
            panic!("expected unconsumed");
        };
        assert_eq!(failed.status, WithdrawalStatus::Failed);
        assert!(failed.bank_reference.is_none());
        assert_eq!(
            failed.failure_reason,
            Some(FailureReason::InsufficientMerchantCredit)
        );
        assert_eq!(reconciliation.bank_reference, "BNK-9");
        assert_eq!(
            store.list_reconciliation_records().await.unwrap(),
            vec![reconciliation]
        );
        assert!(store.list_ledger_entries(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn approval_cannot_undercut_utilization() {
        let store = MemoryStore::new();
        store.top_up_pool(amount(dec!(100))).await.unwrap();
        let (merchant, account) = approved_merchant(&store, dec!(10)).await;
        store
            .consume_credit(&merchant.id, &account.id, amount(dec!(8)))
            .await
            .unwrap();

        let err = store
            .approve_merchant(&merchant.id, dec!(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Ledger(LedgerError::CreditLimitBelowUtilization { .. })
        ));
        let credit = store.get_merchant_credit(&merchant.id).await.unwrap().unwrap();
        assert_eq!(credit.credit_limit, dec!(10));
    }

    #[tokio::test]
    async fn idempotency_records_are_write_once() {
        let store = MemoryStore::new();
        let record = IdempotencyRecord::new("k1", "fp", 200, serde_json::json!({"a": 1}));
        store.insert_idempotency_record(&record).await.unwrap();

        let other = IdempotencyRecord::new("k1", "fp2", 200, serde_json::json!({"a": 2}));
        assert!(matches!(
            store.insert_idempotency_record(&other).await,
            Err(StoreError::DuplicateKey { .. })
        ));
        let stored = store.get_idempotency_record("k1").await.unwrap().unwrap();
        assert_eq!(stored.response_body, serde_json::json!({"a": 1}));
    }

    #[tokio::test]
    async fn window_counter_restarts_after_expiry() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        let ttl = Duration::from_secs(62);

        assert_eq!(store.incr_window_counter("k", ttl, t0).await.unwrap(), 1);
        assert_eq!(store.incr_window_counter("k", ttl, t0).await.unwrap(), 2);

        let later = t0 + chrono::Duration::seconds(200);
        assert_eq!(store.incr_window_counter("k", ttl, later).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_counters_are_purged() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        store.incr_window_counter("old", Duration::from_secs(10), t0).await.unwrap();
        store.incr_window_counter("live", Duration::from_secs(120), t0).await.unwrap();

        let later = t0 + chrono::Duration::seconds(60);
        assert_eq!(store.purge_expired_counters(later).await.unwrap(), 1);
        assert_eq!(store.purge_expired_counters(later).await.unwrap(), 0);
        assert_eq!(
            store.incr_window_counter("live", Duration::from_secs(120), later).await.unwrap(),
            2
        );
    }
}
