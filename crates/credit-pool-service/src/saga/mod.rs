//! Settlement saga.
//!
//! Drives one withdrawal from `PENDING`/`QUEUED` to a terminal state:
//!
//! 1. A terminal withdrawal is returned unchanged.
//! 2. Settlement is called, retrying transient failures per [`RetryPolicy`].
//! 3. A settled withdrawal is consumed from the ledger and marked `SUCCESS`
//!    in one unit of work. If consumption fails the withdrawal is marked
//!    `FAILED` and a reconciliation record is written with it.
//!
//! The same path serves inline requests and background workers.

mod retry;
mod worker;

pub use retry::{Jitter, RetryPolicy};
pub use worker::{DispatchError, SettlementDispatcher};

use std::sync::Arc;

use credit_pool_core::{FailureReason, LedgerError, WithdrawalId, WithdrawalRequest};
use credit_pool_settlement::{SettlementGateway, SettlementRequest};
use credit_pool_store::{Completion, Result, Store};

/// Coordinates the settlement call and the ledger consumption.
pub struct SettlementSaga {
    store: Arc<dyn Store>,
    gateway: Arc<dyn SettlementGateway>,
    retry: RetryPolicy,
}

impl SettlementSaga {
    /// Create a saga.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn SettlementGateway>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            retry,
        }
    }

    /// Run the saga for one withdrawal and return it in its final state.
    ///
    /// Safe to call more than once for the same withdrawal.
    ///
    /// # Errors
    ///
    /// Returns an error if the withdrawal or its merchant cannot be loaded or
    /// a state change cannot be stored.
    pub async fn process(&self, withdrawal_id: &WithdrawalId) -> Result<WithdrawalRequest> {
        let withdrawal = self.store.get_withdrawal(withdrawal_id).await?.ok_or_else(|| {
            LedgerError::WithdrawalNotFound {
                withdrawal_id: withdrawal_id.to_string(),
            }
        })?;
        if withdrawal.is_terminal() {
            return Ok(withdrawal);
        }

        if !self.retry.can_retry(withdrawal.attempts) {
            tracing::warn!(
                withdrawal_id = %withdrawal_id,
                attempts = withdrawal.attempts,
                "Settlement attempts already exhausted"
            );
            return self
                .store
                .fail_withdrawal(withdrawal_id, FailureReason::SettlementFailed)
                .await;
        }

        let merchant = self
            .store
            .get_merchant(&withdrawal.merchant_id)
            .await?
            .ok_or_else(|| LedgerError::MerchantNotFound {
                merchant_id: withdrawal.merchant_id.to_string(),
            })?;

        let request = SettlementRequest {
            merchant_id: withdrawal.merchant_id,
            account_id: withdrawal.account_id,
            amount: withdrawal.amount,
            bank_account: merchant.bank_account,
        };

        loop {
            let attempt = self.store.record_settlement_attempt(withdrawal_id).await?;

            match self.gateway.settle(&request).await {
                Ok(receipt) => return self.finalize(withdrawal_id, &receipt.bank_reference).await,
                Err(e) if e.is_retryable() && self.retry.can_retry(attempt) => {
                    let delay = self.retry.delay(attempt);
                    tracing::debug!(
                        withdrawal_id = %withdrawal_id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Retrying settlement"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        withdrawal_id = %withdrawal_id,
                        attempts = attempt,
                        error = %e,
                        "Settlement failed after max retries"
                    );
                    return self
                        .store
                        .fail_withdrawal(withdrawal_id, FailureReason::SettlementFailed)
                        .await;
                }
                Err(e) => {
                    tracing::warn!(
                        withdrawal_id = %withdrawal_id,
                        attempt,
                        error = %e,
                        "Settlement rejected"
                    );
                    return self
                        .store
                        .fail_withdrawal(withdrawal_id, FailureReason::SettlementRejected)
                        .await;
                }
            }
        }
    }

    async fn finalize(
        &self,
        withdrawal_id: &WithdrawalId,
        bank_reference: &str,
    ) -> Result<WithdrawalRequest> {
        let completion = self
            .store
            .complete_withdrawal(withdrawal_id, bank_reference)
            .await?;

        match &completion {
            Completion::Settled(w) => {
                tracing::info!(
                    withdrawal_id = %withdrawal_id,
                    merchant_id = %w.merchant_id,
                    amount = %w.amount,
                    bank_reference = %bank_reference,
                    "Withdrawal settled"
                );
            }
            Completion::Unconsumed {
                withdrawal,
                error,
                reconciliation,
            } => {
                tracing::error!(
                    withdrawal_id = %withdrawal_id,
                    merchant_id = %withdrawal.merchant_id,
                    amount = %withdrawal.amount,
                    bank_reference = %bank_reference,
                    reconciliation_id = %reconciliation.id,
                    error = %error,
                    "Settled withdrawal could not be consumed; reconciliation required"
                );
            }
            Completion::AlreadyTerminal(w) => {
                tracing::debug!(
                    withdrawal_id = %withdrawal_id,
                    status = w.status.as_str(),
                    "Withdrawal finalized concurrently"
                );
            }
        }

        Ok(completion.withdrawal().clone())
    }
}
