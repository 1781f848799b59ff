//! API error types and responses.

use axum::extract::rejection::JsonRejection;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use credit_pool_core::LedgerError;
use credit_pool_store::StoreError;
use rust_decimal::Decimal;
use serde::Serialize;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - resource already exists or invalid state transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The merchant has not been approved yet.
    #[error("merchant not approved")]
    MerchantNotApproved,

    /// Credit check failed.
    #[error("insufficient {scope}: available={available}, required={required}")]
    InsufficientCredit {
        /// `merchant_credit` or `pool`.
        scope: &'static str,
        /// What was left.
        available: Decimal,
        /// What was asked for.
        required: Decimal,
    },

    /// Idempotency key reused with a different payload.
    #[error("idempotency key conflict: {0}")]
    IdempotencyConflict(String),

    /// Too many requests in the current window.
    #[error("rate limit exceeded")]
    RateLimited {
        /// Seconds until the client may retry.
        retry_in_seconds: u64,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl ApiError {
    /// The HTTP status this error maps to.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::MerchantNotApproved => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) | Self::InsufficientCredit { .. } | Self::IdempotencyConflict(_) => {
                StatusCode::CONFLICT
            }
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, message, details) = match &self {
            Self::Unauthorized => ("unauthorized", self.to_string(), None),
            Self::NotFound(msg) => ("not_found", msg.clone(), None),
            Self::BadRequest(msg) => ("bad_request", msg.clone(), None),
            Self::Conflict(msg) => ("conflict", msg.clone(), None),
            Self::MerchantNotApproved => (
                "merchant_not_approved",
                "Merchant is not approved for withdrawals".to_string(),
                None,
            ),
            Self::InsufficientCredit {
                scope,
                available,
                required,
            } => (
                "insufficient_credit",
                self.to_string(),
                Some(serde_json::json!({
                    "scope": scope,
                    "available": available,
                    "required": required
                })),
            ),
            Self::IdempotencyConflict(key) => (
                "idempotency_conflict",
                format!("Idempotency key {key} was used with a different request"),
                None,
            ),
            Self::RateLimited { retry_in_seconds } => (
                "rate_limited",
                self.to_string(),
                Some(serde_json::json!({ "retry_in_seconds": retry_in_seconds })),
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let retry_after = match &self {
            Self::RateLimited { retry_in_seconds } => {
                HeaderValue::from_str(&retry_in_seconds.to_string()).ok()
            }
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(value) = retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientMerchantCredit {
                available,
                required,
            } => Self::InsufficientCredit {
                scope: "merchant_credit",
                available,
                required,
            },
            LedgerError::InsufficientPool {
                available,
                required,
            } => Self::InsufficientCredit {
                scope: "pool",
                available,
                required,
            },
            LedgerError::MerchantNotFound { merchant_id } => {
                Self::NotFound(format!("merchant not found: {merchant_id}"))
            }
            LedgerError::WithdrawalNotFound { withdrawal_id } => {
                Self::NotFound(format!("withdrawal not found: {withdrawal_id}"))
            }
            LedgerError::MerchantNotApproved { .. } => Self::MerchantNotApproved,
            LedgerError::InvalidAmount(msg) => Self::BadRequest(msg),
            LedgerError::CreditLimitBelowUtilization { .. }
            | LedgerError::InvalidTransition { .. } => Self::Conflict(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Ledger(e) => e.into(),
            StoreError::NotFound => Self::NotFound("resource not found".to_string()),
            StoreError::DuplicateKey { key } => Self::Conflict(format!("{key} already exists")),
            StoreError::Database(msg)
            | StoreError::Serialization(msg)
            | StoreError::ConstraintViolation(msg) => Self::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rate_limited_sets_retry_after() {
        let response = ApiError::RateLimited {
            retry_in_seconds: 60,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");
    }

    #[test]
    fn ledger_errors_map_to_statuses() {
        let insufficient: ApiError = LedgerError::InsufficientPool {
            available: dec!(1.00),
            required: dec!(2.00),
        }
        .into();
        assert_eq!(insufficient.status(), StatusCode::CONFLICT);

        let not_approved: ApiError = LedgerError::MerchantNotApproved {
            merchant_id: "m".to_string(),
        }
        .into();
        assert_eq!(not_approved.status(), StatusCode::FORBIDDEN);

        let store: ApiError = StoreError::Database("boom".to_string()).into();
        assert_eq!(store.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
