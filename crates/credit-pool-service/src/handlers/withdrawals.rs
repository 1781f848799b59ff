//! Withdrawal handlers.
//!
//! Creating a withdrawal runs, in order: rate limit, idempotency check,
//! validation, approval check, then the settlement saga (inline) or the
//! settlement queue (async). Every outcome past the approval check is
//! stored under the idempotency key, failures included, so a retried
//! request never settles twice.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use credit_pool_core::{
    Amount, IdempotencyRecord, LedgerError, MerchantId, WithdrawalId, WithdrawalOutcome,
    WithdrawalRequest, WithdrawalStatus,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::AuthMerchant;
use crate::error::ApiError;
use crate::idempotency::{fingerprint, IdempotencyCheck, Reservation};
use crate::state::AppState;

const PATH: &str = "/v1/withdrawals";

/// Header carrying the client's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Withdrawal request body.
#[derive(Debug, Deserialize)]
pub struct CreateWithdrawalRequest {
    /// Amount to withdraw, as a string or number.
    pub amount: Decimal,
}

/// Request a withdrawal.
pub async fn create_withdrawal(
    State(state): State<Arc<AppState>>,
    auth: AuthMerchant,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let merchant_id = auth.merchant_id;
    let actor = Some(merchant_id.to_string());

    // Rate limit
    let limits = &state.config.rate_limit;
    let subject = format!("merchant:{merchant_id}:withdrawals");
    let decision = state
        .rate_limiter
        .allow(&subject, limits.max_requests, limits.window_seconds)
        .await?;
    if !decision.allowed {
        tracing::info!(merchant_id = %merchant_id, "Withdrawal rate limited");
        state
            .audit
            .record(
                "POST",
                PATH,
                429,
                actor,
                json!({ "phase": "ratelimit_exceeded", "request": body }),
            )
            .await;
        return Err(ApiError::RateLimited {
            retry_in_seconds: limits.window_seconds,
        });
    }

    // Idempotency
    let key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(ToString::to_string);

    let reservation = match &key {
        Some(key) => {
            let fp = fingerprint(&merchant_id, &body);
            match state.idempotency.check_or_reserve(key, &fp).await? {
                IdempotencyCheck::Fresh(reservation) => Some(reservation),
                IdempotencyCheck::Replay(record) => {
                    tracing::debug!(merchant_id = %merchant_id, key = %key, "Replaying withdrawal");
                    state
                        .audit
                        .record(
                            "POST",
                            PATH,
                            record.status_code,
                            actor,
                            json!({ "phase": "replayed", "idempotency_key": key }),
                        )
                        .await;
                    return Ok(replay(&record));
                }
                IdempotencyCheck::Conflict => {
                    state
                        .audit
                        .record(
                            "POST",
                            PATH,
                            409,
                            actor,
                            json!({ "phase": "idempotency_conflict", "idempotency_key": key }),
                        )
                        .await;
                    return Err(ApiError::IdempotencyConflict(key.clone()));
                }
            }
        }
        None => None,
    };

    // Validation
    let request: CreateWithdrawalRequest = serde_json::from_value(body.clone())
        .map_err(|e| ApiError::BadRequest(format!("invalid withdrawal request: {e}")))?;
    let amount = Amount::new(request.amount)?;

    let merchant = state
        .store
        .get_merchant(&merchant_id)
        .await?
        .ok_or_else(|| merchant_not_found(&merchant_id))?;
    if let Err(e) = merchant.ensure_approved() {
        state
            .audit
            .record(
                "POST",
                PATH,
                403,
                actor,
                json!({ "phase": "merchant_not_approved", "request": body }),
            )
            .await;
        return Err(e.into());
    }
    let account = state
        .store
        .get_wallet_account(&merchant_id)
        .await?
        .ok_or_else(|| merchant_not_found(&merchant_id))?;

    let withdrawal = WithdrawalRequest::new(merchant_id, account.id, amount);
    state.store.create_withdrawal(&withdrawal).await?;
    tracing::info!(
        merchant_id = %merchant_id,
        withdrawal_id = %withdrawal.id,
        amount = %amount,
        "Withdrawal requested"
    );

    // Detached so settlement and the idempotency commit finish even if the
    // request is dropped or the inline deadline passes.
    let pending = WithdrawalOutcome::from(&withdrawal);
    let task_state = Arc::clone(&state);
    let task_key = key.clone();
    let task_actor = actor.clone();
    let task = tokio::spawn(async move {
        settle_and_record(&task_state, withdrawal, reservation, task_key, task_actor).await
    });

    let deadline = state.config.inline_settlement_deadline();
    if let Ok(joined) = tokio::time::timeout(deadline, task).await {
        return joined.map_err(|e| ApiError::Internal(format!("withdrawal task failed: {e}")))?;
    }

    // Settlement is still retrying. The final outcome lands on the
    // withdrawal and under the idempotency key.
    tracing::warn!(
        merchant_id = %merchant_id,
        withdrawal_id = %pending.withdrawal_id,
        deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
        "Inline settlement deadline passed, answering accepted"
    );
    let response_body =
        serde_json::to_value(&pending).map_err(|e| ApiError::Internal(e.to_string()))?;
    state
        .audit
        .record(
            "POST",
            PATH,
            202,
            actor,
            json!({
                "phase": "queued_async",
                "withdrawal_id": pending.withdrawal_id,
                "idempotency_key": key,
                "response": response_body,
            }),
        )
        .await;
    Ok((StatusCode::ACCEPTED, Json(response_body)).into_response())
}

/// Settle (or queue) a created withdrawal, store the idempotent response and
/// audit the outcome.
async fn settle_and_record(
    state: &AppState,
    withdrawal: WithdrawalRequest,
    reservation: Option<Reservation>,
    key: Option<String>,
    actor: Option<String>,
) -> Result<Response, ApiError> {
    let withdrawal = match &state.dispatcher {
        Some(dispatcher) => {
            let queued = state.store.mark_withdrawal_queued(&withdrawal.id).await?;
            if let Err(e) = dispatcher.enqueue(queued.id).await {
                // Still QUEUED in the store; recovered on the next start.
                tracing::error!(withdrawal_id = %queued.id, error = %e, "Failed to queue withdrawal");
            }
            queued
        }
        None => state.saga.process(&withdrawal.id).await?,
    };

    let (status, phase) = classify(&withdrawal);
    let response_body = serde_json::to_value(WithdrawalOutcome::from(&withdrawal))
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let (status, response_body) = match reservation {
        Some(reservation) => {
            let record = state
                .idempotency
                .commit(reservation, status.as_u16(), response_body)
                .await?;
            (
                StatusCode::from_u16(record.status_code).unwrap_or(status),
                record.response_body,
            )
        }
        None => (status, response_body),
    };

    state
        .audit
        .record(
            "POST",
            PATH,
            status.as_u16(),
            actor,
            json!({
                "phase": phase,
                "withdrawal_id": withdrawal.id,
                "idempotency_key": key,
                "response": response_body,
            }),
        )
        .await;

    Ok((status, Json(response_body)).into_response())
}

/// Get one of the authenticated merchant's withdrawals.
pub async fn get_withdrawal(
    State(state): State<Arc<AppState>>,
    auth: AuthMerchant,
    Path(withdrawal_id): Path<String>,
) -> Result<Json<WithdrawalOutcome>, ApiError> {
    let withdrawal_id: WithdrawalId = withdrawal_id
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid withdrawal id".into()))?;

    // Other merchants' withdrawals are reported as missing.
    let withdrawal = state
        .store
        .get_withdrawal(&withdrawal_id)
        .await?
        .filter(|w| w.merchant_id == auth.merchant_id)
        .ok_or_else(|| ApiError::NotFound(format!("withdrawal not found: {withdrawal_id}")))?;

    Ok(Json(WithdrawalOutcome::from(&withdrawal)))
}

/// HTTP status and audit phase for a processed withdrawal.
fn classify(withdrawal: &WithdrawalRequest) -> (StatusCode, &'static str) {
    match (withdrawal.status, withdrawal.failure_reason) {
        (WithdrawalStatus::Success, _) => (StatusCode::OK, "finalized"),
        (WithdrawalStatus::Failed, Some(reason)) if reason.is_post_settlement() => {
            (StatusCode::CONFLICT, "consumption_failed")
        }
        (WithdrawalStatus::Failed, _) => (StatusCode::BAD_GATEWAY, "settlement_failed"),
        (WithdrawalStatus::Pending | WithdrawalStatus::Queued, _) => {
            (StatusCode::ACCEPTED, "queued_async")
        }
    }
}

fn replay(record: &IdempotencyRecord) -> Response {
    let status = StatusCode::from_u16(record.status_code).unwrap_or(StatusCode::OK);
    (status, Json(record.response_body.clone())).into_response()
}

fn merchant_not_found(merchant_id: &MerchantId) -> LedgerError {
    LedgerError::MerchantNotFound {
        merchant_id: merchant_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use credit_pool_core::{AccountId, FailureReason};
    use rust_decimal_macros::dec;

    fn withdrawal() -> WithdrawalRequest {
        WithdrawalRequest::new(
            MerchantId::generate(),
            AccountId::generate(),
            Amount::new(dec!(10)).unwrap(),
        )
    }

    #[test]
    fn statuses_follow_outcome() {
        let mut w = withdrawal();
        assert_eq!(classify(&w).0, StatusCode::ACCEPTED);

        let mut rejected = w.clone();
        rejected.fail(FailureReason::SettlementRejected).unwrap();
        assert_eq!(classify(&rejected), (StatusCode::BAD_GATEWAY, "settlement_failed"));

        let mut short = w.clone();
        short.fail(FailureReason::InsufficientPool).unwrap();
        assert_eq!(classify(&short), (StatusCode::CONFLICT, "consumption_failed"));

        w.succeed(credit_pool_core::TxId::generate(), "BR").unwrap();
        assert_eq!(classify(&w), (StatusCode::OK, "finalized"));
    }
}
