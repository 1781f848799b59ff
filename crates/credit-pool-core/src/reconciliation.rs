//! Settlements the ledger could not absorb.
//!
//! When the bank confirms a settlement but the local consumption fails, the
//! withdrawal is marked `FAILED` and one of these records is written in the
//! same unit of work. Operators resolve them by hand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MerchantId, ReconciliationId, WithdrawalId};
use crate::money::Amount;
use crate::withdrawal::{FailureReason, WithdrawalRequest};

/// An externally settled withdrawal with no matching ledger pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationRecord {
    /// Record identifier.
    pub id: ReconciliationId,
    /// The failed withdrawal.
    pub withdrawal_id: WithdrawalId,
    /// Its merchant.
    pub merchant_id: MerchantId,
    /// Amount the bank moved.
    pub amount: Amount,
    /// Reference returned by settlement.
    pub bank_reference: String,
    /// Why consumption failed.
    pub reason: FailureReason,
    /// Record time.
    pub created_at: DateTime<Utc>,
}

impl ReconciliationRecord {
    /// Record that `withdrawal` settled as `bank_reference` but failed locally.
    #[must_use]
    pub fn for_withdrawal(
        withdrawal: &WithdrawalRequest,
        bank_reference: impl Into<String>,
        reason: FailureReason,
    ) -> Self {
        Self {
            id: ReconciliationId::generate(),
            withdrawal_id: withdrawal.id,
            merchant_id: withdrawal.merchant_id,
            amount: withdrawal.amount,
            bank_reference: bank_reference.into(),
            reason,
            created_at: Utc::now(),
        }
    }
}
