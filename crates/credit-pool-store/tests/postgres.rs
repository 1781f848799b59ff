//! PostgreSQL backend tests.
//!
//! These run only when `TEST_DATABASE_URL` points at a scratch database.

#![cfg(feature = "postgres")]

use std::sync::Arc;

use credit_pool_core::{Amount, LedgerError, Merchant, WithdrawalRequest, WithdrawalStatus};
use credit_pool_store::{Completion, PgStore, Store, StoreError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

async fn store() -> Option<PgStore> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let store = PgStore::connect(&url, 16).await.ok()?;
    store.migrate().await.ok()?;
    Some(store)
}

fn amount(v: Decimal) -> Amount {
    Amount::new(v).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_consumptions_serialize_on_pool_row() {
    let Some(store) = store().await else {
        return;
    };
    let store = Arc::new(store);
    store.top_up_pool(amount(dec!(1000))).await.unwrap();
    let before = store.get_pool().await.unwrap().available_amount;

    let merchant = Merchant::new(format!("pg-{}", uuid::Uuid::new_v4()), dec!(10), "");
    let (account, _) = store.create_merchant(&merchant).await.unwrap();
    store.approve_merchant(&merchant.id, dec!(10)).await.unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let store = Arc::clone(&store);
            let (merchant_id, account_id) = (merchant.id, account.id);
            tokio::spawn(async move {
                store
                    .consume_credit(&merchant_id, &account_id, amount(dec!(1)))
                    .await
            })
        })
        .collect();

    let mut ok = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => ok += 1,
            Err(StoreError::Ledger(LedgerError::InsufficientMerchantCredit { .. })) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(ok, 10);
    let credit = store.get_merchant_credit(&merchant.id).await.unwrap().unwrap();
    assert_eq!(credit.utilized_amount, dec!(10.00));
    assert_eq!(
        store.get_pool().await.unwrap().available_amount,
        before - dec!(10)
    );
    let entries = store.list_ledger_entries(Some(&merchant.id)).await.unwrap();
    assert_eq!(entries.len(), 20);
    assert!(credit_pool_core::entries_are_paired(&entries));
}

#[tokio::test]
async fn completed_withdrawal_round_trips() {
    let Some(store) = store().await else {
        return;
    };
    store.top_up_pool(amount(dec!(100))).await.unwrap();
    let merchant = Merchant::new(format!("pg-{}", uuid::Uuid::new_v4()), dec!(50), "IBAN");
    let (account, _) = store.create_merchant(&merchant).await.unwrap();
    store.approve_merchant(&merchant.id, dec!(50)).await.unwrap();

    let withdrawal = WithdrawalRequest::new(merchant.id, account.id, amount(dec!(12.34)));
    store.create_withdrawal(&withdrawal).await.unwrap();
    assert_eq!(store.record_settlement_attempt(&withdrawal.id).await.unwrap(), 1);

    let completion = store
        .complete_withdrawal(&withdrawal.id, "BNK-PG")
        .await
        .unwrap();
    assert!(matches!(completion, Completion::Settled(_)));

    let stored = store.get_withdrawal(&withdrawal.id).await.unwrap().unwrap();
    assert_eq!(stored.status, WithdrawalStatus::Success);
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.bank_reference.as_deref(), Some("BNK-PG"));
    assert_eq!(stored.amount.value(), dec!(12.34));
}

#[tokio::test]
async fn expired_rate_limit_counters_are_deleted() {
    let Some(store) = store().await else {
        return;
    };
    let key = format!("rl:pg-{}", uuid::Uuid::new_v4());
    let t0 = chrono::Utc::now();
    let ttl = std::time::Duration::from_secs(5);
    assert_eq!(store.incr_window_counter(&key, ttl, t0).await.unwrap(), 1);

    let later = t0 + chrono::Duration::seconds(60);
    assert!(store.purge_expired_counters(later).await.unwrap() >= 1);
    // A purged key starts over.
    assert_eq!(store.incr_window_counter(&key, ttl, later).await.unwrap(), 1);
}
