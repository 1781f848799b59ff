//! Idempotent request handling.
//!
//! A request carrying an `Idempotency-Key` is fingerprinted and checked
//! against the write-once record stored under that key. Concurrent requests
//! with the same key on one node are serialized by an in-process key lock;
//! across nodes the store's unique key decides the winner and the loser
//! replays the winner's response.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use credit_pool_core::{IdempotencyRecord, MerchantId};
use credit_pool_store::{Result, Store, StoreError};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::OwnedMutexGuard;

type KeyLocks = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Fingerprint a request as lowercase hex SHA-256 of the canonical JSON of
/// `{"body": ..., "merchant_id": ...}`.
#[must_use]
pub fn fingerprint(merchant_id: &MerchantId, body: &Value) -> String {
    let envelope = serde_json::json!({
        "merchant_id": merchant_id.to_string(),
        "body": body,
    });
    let mut canonical = String::new();
    write_canonical(&envelope, &mut canonical);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Serialize with object keys sorted and no whitespace.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Outcome of checking a key.
#[derive(Debug)]
pub enum IdempotencyCheck {
    /// No record yet. Holds the key lock until committed or dropped.
    Fresh(Reservation),
    /// Same request seen before. Return the stored response verbatim.
    Replay(IdempotencyRecord),
    /// Key reused with a different request.
    Conflict,
}

/// Exclusive claim on an idempotency key within this process.
pub struct Reservation {
    key: String,
    fingerprint: String,
    locks: KeyLocks,
    _guard: OwnedMutexGuard<()>,
}

impl Reservation {
    /// The reserved key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map and our guard hold the lock: nobody is waiting.
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2)
        {
            locks.remove(&self.key);
        }
    }
}

/// Idempotency records with per-key request serialization.
#[derive(Clone)]
pub struct IdempotencyStore {
    store: Arc<dyn Store>,
    locks: KeyLocks,
}

impl IdempotencyStore {
    /// Create an idempotency store on top of `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Look up `key`, waiting for any in-flight request holding it.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read.
    pub async fn check_or_reserve(&self, key: &str, fingerprint: &str) -> Result<IdempotencyCheck> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        let reservation = Reservation {
            key: key.to_string(),
            fingerprint: fingerprint.to_string(),
            locks: Arc::clone(&self.locks),
            _guard: guard,
        };

        match self.store.get_idempotency_record(key).await? {
            Some(record) if record.matches(fingerprint) => Ok(IdempotencyCheck::Replay(record)),
            Some(_) => Ok(IdempotencyCheck::Conflict),
            None => Ok(IdempotencyCheck::Fresh(reservation)),
        }
    }

    /// Store the response for a reserved key and release it.
    ///
    /// If another node committed first, its record is returned instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written or read back.
    pub async fn commit(
        &self,
        reservation: Reservation,
        status_code: u16,
        response_body: Value,
    ) -> Result<IdempotencyRecord> {
        let record = IdempotencyRecord::new(
            reservation.key.clone(),
            reservation.fingerprint.clone(),
            status_code,
            response_body,
        );

        match self.store.insert_idempotency_record(&record).await {
            Ok(()) => Ok(record),
            Err(StoreError::DuplicateKey { .. }) => {
                tracing::info!(key = %reservation.key, "Idempotency key committed concurrently");
                self.store
                    .get_idempotency_record(&reservation.key)
                    .await?
                    .ok_or(StoreError::NotFound)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use credit_pool_store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn fingerprint_ignores_key_order() {
        let merchant = MerchantId::generate();
        let a = fingerprint(&merchant, &json!({"amount": "10.00", "note": {"x": 1, "y": 2}}));
        let b = fingerprint(&merchant, &json!({"note": {"y": 2, "x": 1}, "amount": "10.00"}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fingerprint_depends_on_merchant_and_body() {
        let body = json!({"amount": "10.00"});
        let one = MerchantId::generate();
        let two = MerchantId::generate();
        assert_ne!(fingerprint(&one, &body), fingerprint(&two, &body));
        assert_ne!(
            fingerprint(&one, &body),
            fingerprint(&one, &json!({"amount": "10.01"}))
        );
    }

    #[tokio::test]
    async fn commit_then_replay_or_conflict() {
        let idem = IdempotencyStore::new(Arc::new(MemoryStore::new()));

        let IdempotencyCheck::Fresh(reservation) = idem.check_or_reserve("k", "fp").await.unwrap()
        else {
            panic!("expected a fresh key");
        };
        idem.commit(reservation, 200, json!({"ok": true})).await.unwrap();

        match idem.check_or_reserve("k", "fp").await.unwrap() {
            IdempotencyCheck::Replay(record) => {
                assert_eq!(record.status_code, 200);
                assert_eq!(record.response_body, json!({"ok": true}));
            }
            other => panic!("expected replay, got {other:?}"),
        }
        assert!(matches!(
            idem.check_or_reserve("k", "other").await.unwrap(),
            IdempotencyCheck::Conflict
        ));
    }

    #[tokio::test]
    async fn second_request_waits_for_first() {
        let idem = IdempotencyStore::new(Arc::new(MemoryStore::new()));
        let IdempotencyCheck::Fresh(first) = idem.check_or_reserve("k", "fp").await.unwrap() else {
            panic!("expected a fresh key");
        };

        let waiter = {
            let idem = idem.clone();
            tokio::spawn(async move { idem.check_or_reserve("k", "fp").await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        idem.commit(first, 202, json!({"status": "QUEUED"})).await.unwrap();
        assert!(matches!(waiter.await.unwrap(), IdempotencyCheck::Replay(_)));
    }

    #[tokio::test]
    async fn dropped_reservation_frees_the_key() {
        let idem = IdempotencyStore::new(Arc::new(MemoryStore::new()));
        let check = idem.check_or_reserve("k", "fp").await.unwrap();
        drop(check);
        assert!(idem.locks.lock().unwrap().is_empty());
        assert!(matches!(
            idem.check_or_reserve("k", "fp").await.unwrap(),
            IdempotencyCheck::Fresh(_)
        ));
    }
}
