//! Withdrawal requests and their state machine.
//!
//! ```text
//! PENDING ──────────────► SUCCESS | FAILED
//!    └──► QUEUED ───────► SUCCESS | FAILED
//! ```
//!
//! `SUCCESS` and `FAILED` are terminal; a terminal withdrawal never changes
//! again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::ids::{AccountId, MerchantId, TxId, WithdrawalId};
use crate::money::Amount;

/// Lifecycle state of a withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawalStatus {
    /// Created, settlement not yet attempted or in progress on the request path.
    Pending,
    /// Handed to the async settlement workers.
    Queued,
    /// Settled and consumed.
    Success,
    /// Settlement or consumption failed.
    Failed,
}

impl WithdrawalStatus {
    /// Whether no further transitions are allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Wire/database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Queued => "QUEUED",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    /// Parse the wire/database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "QUEUED" => Some(Self::Queued),
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Why a withdrawal ended up `FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// Settlement kept failing transiently until retries ran out.
    SettlementFailed,
    /// Settlement answered with a terminal rejection.
    SettlementRejected,
    /// Settlement succeeded but the merchant had no credit left.
    InsufficientMerchantCredit,
    /// Settlement succeeded but the pool was short.
    InsufficientPool,
    /// Settlement succeeded but consumption failed for another reason.
    ConsumptionFailed,
}

impl FailureReason {
    /// The `detail` string reported to callers.
    #[must_use]
    pub const fn as_detail(self) -> &'static str {
        match self {
            Self::SettlementFailed => "SETTLEMENT_FAILED",
            Self::SettlementRejected => "SETTLEMENT_REJECTED",
            Self::InsufficientMerchantCredit => "INSUFFICIENT_MERCHANT_CREDIT",
            Self::InsufficientPool => "INSUFFICIENT_POOL",
            Self::ConsumptionFailed => "CONSUMPTION_FAILED",
        }
    }

    /// Parse a stored `detail` string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SETTLEMENT_FAILED" => Some(Self::SettlementFailed),
            "SETTLEMENT_REJECTED" => Some(Self::SettlementRejected),
            "INSUFFICIENT_MERCHANT_CREDIT" => Some(Self::InsufficientMerchantCredit),
            "INSUFFICIENT_POOL" => Some(Self::InsufficientPool),
            "CONSUMPTION_FAILED" => Some(Self::ConsumptionFailed),
            _ => None,
        }
    }

    /// Map a consumption error to a failure reason.
    #[must_use]
    pub const fn from_consumption(err: &LedgerError) -> Self {
        match err {
            LedgerError::InsufficientMerchantCredit { .. } => Self::InsufficientMerchantCredit,
            LedgerError::InsufficientPool { .. } => Self::InsufficientPool,
            _ => Self::ConsumptionFailed,
        }
    }

    /// Whether the failure happened after the money left the bank.
    #[must_use]
    pub const fn is_post_settlement(self) -> bool {
        !matches!(self, Self::SettlementFailed | Self::SettlementRejected)
    }
}

/// A merchant's request to withdraw credit to their bank account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    /// Withdrawal identifier.
    pub id: WithdrawalId,
    /// Requesting merchant.
    pub merchant_id: MerchantId,
    /// The merchant's wallet account.
    pub account_id: AccountId,
    /// Amount to withdraw.
    pub amount: Amount,
    /// Current state.
    pub status: WithdrawalStatus,
    /// Settlement reference, set only on `SUCCESS`.
    pub bank_reference: Option<String>,
    /// Ledger transaction, set only on `SUCCESS`.
    pub tx_id: Option<TxId>,
    /// Set only on `FAILED`.
    pub failure_reason: Option<FailureReason>,
    /// Settlement calls made so far.
    pub attempts: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last transition time.
    pub updated_at: DateTime<Utc>,
}

impl WithdrawalRequest {
    /// Create a `PENDING` withdrawal.
    #[must_use]
    pub fn new(merchant_id: MerchantId, account_id: AccountId, amount: Amount) -> Self {
        let now = Utc::now();
        Self {
            id: WithdrawalId::generate(),
            merchant_id,
            account_id,
            amount,
            status: WithdrawalStatus::Pending,
            bank_reference: None,
            tx_id: None,
            failure_reason: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, to: WithdrawalStatus) -> Result<()> {
        let allowed = match (self.status, to) {
            (WithdrawalStatus::Pending, WithdrawalStatus::Queued) => true,
            (from, WithdrawalStatus::Success | WithdrawalStatus::Failed) => !from.is_terminal(),
            _ => false,
        };
        if !allowed {
            return Err(LedgerError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `PENDING → QUEUED`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidTransition` from any other state.
    pub fn mark_queued(&mut self) -> Result<()> {
        self.transition(WithdrawalStatus::Queued)
    }

    /// Move to `SUCCESS` with the settlement reference and ledger transaction.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidTransition` if already terminal.
    pub fn succeed(&mut self, tx_id: TxId, bank_reference: impl Into<String>) -> Result<()> {
        self.transition(WithdrawalStatus::Success)?;
        self.tx_id = Some(tx_id);
        self.bank_reference = Some(bank_reference.into());
        Ok(())
    }

    /// Move to `FAILED`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidTransition` if already terminal.
    pub fn fail(&mut self, reason: FailureReason) -> Result<()> {
        self.transition(WithdrawalStatus::Failed)?;
        self.failure_reason = Some(reason);
        Ok(())
    }

    /// Count one settlement call.
    pub fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
        self.updated_at = Utc::now();
    }

    /// Shorthand for `self.status.is_terminal()`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// The body returned to the caller for a processed withdrawal.
///
/// This is also what the idempotency store replays, so its serialization
/// must be stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalOutcome {
    /// The withdrawal.
    pub withdrawal_id: WithdrawalId,
    /// Its status when the response was produced.
    pub status: WithdrawalStatus,
    /// Requested amount.
    pub amount: Amount,
    /// Bank reference on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_reference: Option<String>,
    /// Ledger transaction on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<TxId>,
    /// Failure detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&WithdrawalRequest> for WithdrawalOutcome {
    fn from(w: &WithdrawalRequest) -> Self {
        Self {
            withdrawal_id: w.id,
            status: w.status,
            amount: w.amount,
            bank_reference: w.bank_reference.clone(),
            tx_id: w.tx_id,
            detail: w.failure_reason.map(|r| r.as_detail().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn withdrawal() -> WithdrawalRequest {
        WithdrawalRequest::new(
            MerchantId::generate(),
            AccountId::generate(),
            Amount::new(dec!(25)).unwrap(),
        )
    }

    #[test]
    fn pending_can_queue_then_succeed() {
        let mut w = withdrawal();
        assert_eq!(w.status, WithdrawalStatus::Pending);
        w.mark_queued().unwrap();
        let tx = TxId::generate();
        w.succeed(tx, "BNK-1").unwrap();
        assert_eq!(w.status, WithdrawalStatus::Success);
        assert_eq!(w.tx_id, Some(tx));
        assert_eq!(w.bank_reference.as_deref(), Some("BNK-1"));
    }

    #[test]
    fn terminal_states_are_immutable() {
        let mut w = withdrawal();
        w.fail(FailureReason::SettlementRejected).unwrap();

        assert!(w.succeed(TxId::generate(), "BNK-2").is_err());
        assert!(w.fail(FailureReason::SettlementFailed).is_err());
        assert!(w.mark_queued().is_err());
        assert_eq!(w.failure_reason, Some(FailureReason::SettlementRejected));
        assert!(w.bank_reference.is_none());
    }

    #[test]
    fn queued_cannot_requeue() {
        let mut w = withdrawal();
        w.mark_queued().unwrap();
        assert!(matches!(
            w.mark_queued(),
            Err(LedgerError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn outcome_omits_empty_fields() {
        let mut w = withdrawal();
        w.fail(FailureReason::SettlementFailed).unwrap();
        let json = serde_json::to_value(WithdrawalOutcome::from(&w)).unwrap();
        assert_eq!(json["status"], "FAILED");
        assert_eq!(json["amount"], "25.00");
        assert_eq!(json["detail"], "SETTLEMENT_FAILED");
        assert!(json.get("bank_reference").is_none());
        assert!(json.get("tx_id").is_none());
    }

    #[test]
    fn failure_reason_maps_consumption_errors() {
        let err = LedgerError::InsufficientPool {
            available: dec!(0),
            required: dec!(1),
        };
        let reason = FailureReason::from_consumption(&err);
        assert_eq!(reason, FailureReason::InsufficientPool);
        assert!(reason.is_post_settlement());
        assert!(!FailureReason::SettlementRejected.is_post_settlement());
    }
}
