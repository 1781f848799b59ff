//! Background settlement workers.

use std::sync::Arc;

use credit_pool_core::{WithdrawalId, WithdrawalStatus};
use credit_pool_store::{Store, StoreError};
use tokio::sync::{mpsc, Mutex};

use super::SettlementSaga;

/// Errors from handing work to the settlement workers.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Every worker has stopped.
    #[error("settlement queue closed")]
    QueueClosed,

    /// Queued work could not be listed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Bounded queue of withdrawals drained by a fixed set of tokio tasks.
#[derive(Clone)]
pub struct SettlementDispatcher {
    sender: mpsc::Sender<WithdrawalId>,
}

impl SettlementDispatcher {
    /// Start `workers` tasks sharing a queue of `capacity` withdrawals.
    ///
    /// Workers exit once every dispatcher handle is dropped.
    #[must_use]
    pub fn spawn(saga: Arc<SettlementSaga>, workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        for worker in 0..workers.max(1) {
            let receiver = Arc::clone(&receiver);
            let saga = Arc::clone(&saga);
            tokio::spawn(async move {
                loop {
                    let next = receiver.lock().await.recv().await;
                    let Some(withdrawal_id) = next else {
                        break;
                    };
                    match saga.process(&withdrawal_id).await {
                        Ok(withdrawal) => tracing::debug!(
                            worker,
                            withdrawal_id = %withdrawal_id,
                            status = withdrawal.status.as_str(),
                            "Queued withdrawal processed"
                        ),
                        Err(e) => tracing::error!(
                            worker,
                            withdrawal_id = %withdrawal_id,
                            error = %e,
                            "Queued withdrawal failed to process"
                        ),
                    }
                }
                tracing::debug!(worker, "Settlement worker stopped");
            });
        }

        Self { sender }
    }

    /// Queue a withdrawal, waiting for room if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::QueueClosed` if no worker is running.
    pub async fn enqueue(&self, withdrawal_id: WithdrawalId) -> Result<(), DispatchError> {
        self.sender
            .send(withdrawal_id)
            .await
            .map_err(|_| DispatchError::QueueClosed)
    }

    /// Re-queue withdrawals left `QUEUED` by a previous run.
    ///
    /// # Errors
    ///
    /// Returns an error if queued withdrawals cannot be listed or queued.
    pub async fn recover_queued(&self, store: &dyn Store) -> Result<usize, DispatchError> {
        let queued = store
            .list_withdrawals_by_status(WithdrawalStatus::Queued)
            .await?;
        let count = queued.len();
        for withdrawal in queued {
            self.enqueue(withdrawal.id).await?;
        }
        if count > 0 {
            tracing::info!(count, "Recovered queued withdrawals");
        }
        Ok(count)
    }
}
