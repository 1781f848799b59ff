//! Operator endpoints.
//!
//! All routes here require `AdminAuth`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use credit_pool_core::{bounded_credit, Amount, MerchantId, ReconciliationRecord};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Approval request.
#[derive(Debug, Deserialize)]
pub struct ApproveMerchantRequest {
    /// New credit limit. Defaults to the credit requested at registration.
    #[serde(default)]
    pub credit_limit: Option<Decimal>,
}

/// Approval response.
#[derive(Debug, Serialize)]
pub struct ApproveMerchantResponse {
    /// Approved merchant.
    pub merchant_id: String,
    /// Always `true`.
    pub approved: bool,
    /// Limit now in force.
    pub credit_limit: Decimal,
}

/// Approve a merchant and set its credit limit.
pub async fn approve_merchant(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(merchant_id): Path<String>,
    body: Result<Json<ApproveMerchantRequest>, JsonRejection>,
) -> Result<Json<ApproveMerchantResponse>, ApiError> {
    let merchant_id: MerchantId = merchant_id
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid merchant id".into()))?;

    // No JSON body means approve at the requested credit.
    let requested = match body {
        Ok(Json(b)) => b.credit_limit,
        Err(JsonRejection::MissingJsonContentType(_)) => None,
        Err(e) => return Err(e.into()),
    };
    let credit_limit = match requested {
        Some(limit) => bounded_credit("credit_limit", limit)?,
        None => {
            state
                .store
                .get_merchant(&merchant_id)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("merchant not found: {merchant_id}")))?
                .requested_credit
        }
    };

    let credit = state
        .store
        .approve_merchant(&merchant_id, credit_limit)
        .await?;

    tracing::info!(
        admin_id = %admin.admin_id,
        merchant_id = %merchant_id,
        credit_limit = %credit.credit_limit,
        "Merchant approved"
    );

    state
        .audit
        .record(
            "POST",
            &format!("/v1/admin/merchants/{merchant_id}/approve"),
            200,
            Some(admin.admin_id),
            json!({ "phase": "merchant_approved", "credit_limit": credit.credit_limit }),
        )
        .await;

    Ok(Json(ApproveMerchantResponse {
        merchant_id: merchant_id.to_string(),
        approved: true,
        credit_limit: credit.credit_limit,
    }))
}

/// Pool top-up request.
#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    /// Amount to add. Must be positive.
    pub amount: Decimal,
}

/// Pool balance.
#[derive(Debug, Serialize)]
pub struct PoolResponse {
    /// Credit left in the pool.
    pub pool_available: Decimal,
}

/// Add credit to the pool.
pub async fn top_up_pool(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    body: Result<Json<TopUpRequest>, JsonRejection>,
) -> Result<Json<PoolResponse>, ApiError> {
    let Json(body) = body?;
    let amount = Amount::new(body.amount)?;
    let pool = state.store.top_up_pool(amount).await?;

    tracing::info!(
        admin_id = %admin.admin_id,
        amount = %amount,
        pool_available = %pool.available_amount,
        "Pool topped up"
    );

    state
        .audit
        .record(
            "POST",
            "/v1/admin/pool/topup",
            200,
            Some(admin.admin_id),
            json!({ "phase": "pool_topup", "amount": amount }),
        )
        .await;

    Ok(Json(PoolResponse {
        pool_available: pool.available_amount,
    }))
}

/// Get the pool balance.
pub async fn get_pool(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
) -> Result<Json<PoolResponse>, ApiError> {
    let pool = state.store.get_pool().await?;
    Ok(Json(PoolResponse {
        pool_available: pool.available_amount,
    }))
}

/// Reconciliation records.
#[derive(Debug, Serialize)]
pub struct ReconciliationResponse {
    /// Settled withdrawals missing from the ledger.
    pub records: Vec<ReconciliationRecord>,
}

/// List settlements that could not be reflected in the ledger.
pub async fn list_reconciliation(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
) -> Result<Json<ReconciliationResponse>, ApiError> {
    let records = state.store.list_reconciliation_records().await?;
    Ok(Json(ReconciliationResponse { records }))
}
