//! Authentication extractors.
//!
//! - `AuthMerchant` - merchant requests, HS256 JWT whose `sub` is the merchant ID
//! - `AdminAuth` - operator requests, `X-Admin-Key` header

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use credit_pool_core::MerchantId;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

/// A merchant authenticated by bearer token.
#[derive(Debug, Clone)]
pub struct AuthMerchant {
    /// The merchant ID from the `sub` claim.
    pub merchant_id: MerchantId,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthMerchant {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;

        let claims = validate_jwt(token, &state.config.jwt_secret)?;

        let merchant_id = claims
            .sub
            .parse::<MerchantId>()
            .map_err(|_| ApiError::Unauthorized)?;

        Ok(Self { merchant_id })
    }
}

/// Admin authentication via API key.
///
/// Requires the `X-Admin-Key` header to match the configured admin key.
/// With no key configured every admin request is rejected.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// Admin identifier (for audit logging).
    pub admin_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let admin_key = parts
            .headers
            .get("x-admin-key")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let expected_key = state
            .config
            .admin_api_key
            .as_ref()
            .ok_or(ApiError::Unauthorized)?;

        if admin_key != expected_key {
            return Err(ApiError::Unauthorized);
        }

        let admin_id = parts
            .headers
            .get("x-admin-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("admin")
            .to_string();

        tracing::info!(admin_id = %admin_id, "Admin authenticated");

        Ok(Self { admin_id })
    }
}

/// Merchant token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (merchant ID).
    pub sub: String,
    /// Expiration time.
    pub exp: i64,
}

/// Validate an HS256 token against the shared secret.
fn validate_jwt(token: &str, secret: &str) -> Result<JwtClaims, ApiError> {
    let validation = Validation::new(Algorithm::HS256);
    let key = DecodingKey::from_secret(secret.as_bytes());

    let token_data = decode::<JwtClaims>(token, &key, &validation).map_err(|e| {
        tracing::debug!(error = %e, "JWT validation failed");
        ApiError::Unauthorized
    })?;

    Ok(token_data.claims)
}
