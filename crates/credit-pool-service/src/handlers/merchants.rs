//! Merchant registration and profile handlers.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use credit_pool_core::{bounded_credit, quantize, LedgerError, Merchant};
use credit_pool_store::StoreError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::auth::AuthMerchant;
use crate::error::ApiError;
use crate::state::AppState;

/// Registration request.
#[derive(Debug, Deserialize)]
pub struct RegisterMerchantRequest {
    /// Unique merchant name.
    pub username: String,
    /// Credit the merchant asks for. Granted on approval.
    #[serde(default)]
    pub requested_credit: Decimal,
    /// Destination for settlements.
    #[serde(default)]
    pub bank_account: String,
}

/// Registration response.
#[derive(Debug, Serialize)]
pub struct RegisterMerchantResponse {
    /// New merchant ID.
    pub merchant_id: String,
    /// Always `PENDING_APPROVAL`.
    pub status: &'static str,
}

/// Register a merchant, its wallet account and a zero-limit credit row.
pub async fn register_merchant(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RegisterMerchantRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterMerchantResponse>), ApiError> {
    let Json(body) = body?;
    let username = body.username.trim();
    if username.is_empty() {
        return Err(ApiError::BadRequest("username is required".into()));
    }
    let requested_credit = bounded_credit("requested_credit", body.requested_credit)?;

    let merchant = Merchant::new(username, requested_credit, body.bank_account);
    match state.store.create_merchant(&merchant).await {
        Ok(_) => {}
        Err(StoreError::DuplicateKey { .. }) => {
            return Err(ApiError::Conflict(format!(
                "username {username} is already registered"
            )));
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!(
        merchant_id = %merchant.id,
        username = %merchant.username,
        "Merchant registered"
    );

    Ok((
        StatusCode::CREATED,
        Json(RegisterMerchantResponse {
            merchant_id: merchant.id.to_string(),
            status: "PENDING_APPROVAL",
        }),
    ))
}

/// Merchant profile.
#[derive(Debug, Serialize)]
pub struct MerchantProfile {
    /// Merchant ID.
    pub merchant_id: String,
    /// Merchant name.
    pub username: String,
    /// Whether withdrawals are allowed.
    pub is_approved: bool,
    /// Wallet account ID.
    pub account_id: Option<String>,
    /// Settlement destination.
    pub bank_account: String,
    /// Credit ceiling.
    pub credit_limit: Decimal,
    /// Credit used so far.
    pub utilized_amount: Decimal,
    /// `credit_limit - utilized_amount`.
    pub available_credit: Decimal,
}

/// Get the authenticated merchant's profile.
pub async fn me(
    State(state): State<Arc<AppState>>,
    auth: AuthMerchant,
) -> Result<Json<MerchantProfile>, ApiError> {
    let not_found = || LedgerError::MerchantNotFound {
        merchant_id: auth.merchant_id.to_string(),
    };

    let merchant = state
        .store
        .get_merchant(&auth.merchant_id)
        .await?
        .ok_or_else(not_found)?;
    let account = state.store.get_wallet_account(&auth.merchant_id).await?;
    let credit = state
        .store
        .get_merchant_credit(&auth.merchant_id)
        .await?
        .ok_or_else(not_found)?;

    Ok(Json(MerchantProfile {
        merchant_id: merchant.id.to_string(),
        username: merchant.username,
        is_approved: merchant.is_approved,
        account_id: account.map(|a| a.id.to_string()),
        bank_account: merchant.bank_account,
        credit_limit: quantize(credit.credit_limit),
        utilized_amount: quantize(credit.utilized_amount),
        available_credit: credit.available(),
    }))
}
