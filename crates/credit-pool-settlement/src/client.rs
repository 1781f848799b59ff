//! Settlement HTTP client implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::error::SettlementError;
use crate::types::{SettlementReceipt, SettlementRequest, SettlementResponse, STATUS_SUCCESS};

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2500);

/// Anything that can settle a withdrawal.
///
/// The saga depends on this trait rather than on the HTTP client so tests
/// can substitute a scripted gateway.
#[async_trait]
pub trait SettlementGateway: Send + Sync {
    /// Make one settlement attempt.
    ///
    /// # Errors
    ///
    /// Returns a classified [`SettlementError`]; see
    /// [`SettlementError::is_retryable`].
    async fn settle(&self, request: &SettlementRequest)
        -> Result<SettlementReceipt, SettlementError>;
}

/// Client options.
#[derive(Debug, Clone)]
pub struct SettlementOptions {
    /// Per-call timeout.
    pub timeout: Duration,
}

impl Default for SettlementOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// HTTP client for the settlement service.
#[derive(Debug, Clone)]
pub struct HttpSettlementClient {
    client: Client,
    url: String,
    token: String,
}

impl HttpSettlementClient {
    /// Create a client with default options.
    ///
    /// # Arguments
    ///
    /// * `url` - Full settlement endpoint URL
    /// * `token` - Internal bearer token
    ///
    /// # Errors
    ///
    /// Returns `SettlementError::Configuration` if the URL or token is empty
    /// or the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Result<Self, SettlementError> {
        Self::with_options(url, token, SettlementOptions::default())
    }

    /// Create a client with custom options.
    ///
    /// # Errors
    ///
    /// Returns `SettlementError::Configuration` if the URL or token is empty
    /// or the HTTP client cannot be built.
    pub fn with_options(
        url: impl Into<String>,
        token: impl Into<String>,
        options: SettlementOptions,
    ) -> Result<Self, SettlementError> {
        let url = url.into();
        let token = token.into();
        if url.is_empty() {
            return Err(SettlementError::Configuration(
                "settlement URL is empty".to_string(),
            ));
        }
        if token.is_empty() {
            return Err(SettlementError::Configuration(
                "settlement token is empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| SettlementError::Configuration(e.to_string()))?;

        Ok(Self { client, url, token })
    }

    /// The endpoint this client posts to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SettlementGateway for HttpSettlementClient {
    async fn settle(
        &self,
        request: &SettlementRequest,
    ) -> Result<SettlementReceipt, SettlementError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let outcome = match response.text().await {
            Ok(body) => classify(status, &body),
            Err(e) => Err(classify_unread(status, &e)),
        };

        match &outcome {
            Ok(receipt) => tracing::debug!(
                merchant_id = %request.merchant_id,
                bank_reference = %receipt.bank_reference,
                "settlement confirmed"
            ),
            Err(e) => tracing::debug!(
                merchant_id = %request.merchant_id,
                status = status.as_u16(),
                error = %e,
                "settlement not confirmed"
            ),
        }

        outcome
    }
}

/// Classify a settlement response.
///
/// # Errors
///
/// - `SettlementError::Upstream` for 5xx
/// - `SettlementError::Rejected` for any other non-200, or a 200 whose body
///   is not a `SUCCESS`
pub fn classify(status: StatusCode, body: &str) -> Result<SettlementReceipt, SettlementError> {
    if status.is_server_error() {
        return Err(SettlementError::Upstream {
            status: status.as_u16(),
        });
    }
    let rejected = || SettlementError::Rejected {
        status: status.as_u16(),
        body: body.to_string(),
    };
    if status != StatusCode::OK {
        return Err(rejected());
    }

    let parsed: SettlementResponse = serde_json::from_str(body).map_err(|_| rejected())?;
    if parsed.status.as_deref() != Some(STATUS_SUCCESS) {
        return Err(rejected());
    }

    Ok(SettlementReceipt {
        bank_reference: parsed.bank_reference.unwrap_or_default(),
    })
}

/// Classify a response whose body failed to arrive.
///
/// Only a 5xx stays retryable. Any other status, a 200 above all, may
/// already have moved funds.
pub fn classify_unread(status: StatusCode, reason: &dyn std::fmt::Display) -> SettlementError {
    if status.is_server_error() {
        SettlementError::Upstream {
            status: status.as_u16(),
        }
    } else {
        SettlementError::UnreadableBody {
            status: status.as_u16(),
            reason: reason.to_string(),
        }
    }
}
