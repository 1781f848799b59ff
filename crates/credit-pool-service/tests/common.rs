//! Common test utilities for credit pool integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_test::TestServer;
use chrono::{TimeZone, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rust_decimal::Decimal;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use credit_pool_core::MerchantId;
use credit_pool_service::auth::JwtClaims;
use credit_pool_service::config::{RateLimitConfig, RetryConfig, SettlementConfig};
use credit_pool_service::{create_router, AppState, ManualClock, ServiceConfig};
use credit_pool_settlement::{HttpSettlementClient, SettlementOptions};
use credit_pool_store::MemoryStore;

pub const SETTLEMENT_PATH: &str = "/api/settlement/withdraw";
pub const JWT_SECRET: &str = "test-jwt-secret";
pub const ADMIN_KEY: &str = "test-admin-key";

static USERNAMES: AtomicUsize = AtomicUsize::new(0);

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The store behind the server, for asserting on ledger state.
    pub store: Arc<MemoryStore>,
    /// Mock settlement service.
    pub settlement: MockServer,
    /// Clock driving the rate limiter.
    pub clock: ManualClock,
}

impl TestHarness {
    /// Create a harness with inline settlement and fast retries.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a harness, adjusting the default test configuration first.
    pub async fn with_config(customize: impl FnOnce(&mut ServiceConfig)) -> Self {
        let settlement = MockServer::start().await;

        let mut config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            jwt_secret: JWT_SECRET.into(),
            admin_api_key: Some(ADMIN_KEY.into()),
            settlement: SettlementConfig {
                url: format!("{}{SETTLEMENT_PATH}", settlement.uri()),
                token: "test-internal-token".into(),
                timeout: Duration::from_millis(500),
                async_dispatch: false,
                workers: 2,
                queue_capacity: 16,
            },
            retry: RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                jitter: false,
            },
            rate_limit: RateLimitConfig {
                window_seconds: 60,
                max_requests: 120,
            },
            ..ServiceConfig::default()
        };
        customize(&mut config);

        let gateway = HttpSettlementClient::with_options(
            config.settlement.url.clone(),
            config.settlement.token.clone(),
            SettlementOptions {
                timeout: config.settlement.timeout,
            },
        )
        .expect("Failed to create settlement client");

        // Start of a minute so a 60s window begins fresh.
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let store = Arc::new(MemoryStore::new());

        let state = AppState::new(
            store.clone(),
            Arc::new(gateway),
            Arc::new(clock.clone()),
            config,
        );
        let router: Router = create_router(state);
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            settlement,
            clock,
        }
    }

    /// Bearer header for a merchant.
    pub fn merchant_auth_header(merchant_id: &MerchantId) -> String {
        let claims = JwtClaims {
            sub: merchant_id.to_string(),
            exp: Utc::now().timestamp() + 3600,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("Failed to sign token");
        format!("Bearer {token}")
    }

    /// Register a merchant and return its ID.
    pub async fn register_merchant(&self, requested_credit: Decimal) -> MerchantId {
        let n = USERNAMES.fetch_add(1, Ordering::Relaxed);
        let response = self
            .server
            .post("/v1/merchants")
            .json(&json!({
                "username": format!("merchant-{n}"),
                "requested_credit": requested_credit,
                "bank_account": "NL91ABNA0417164300",
            }))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);

        let body: serde_json::Value = response.json();
        body["merchant_id"]
            .as_str()
            .expect("merchant_id missing")
            .parse()
            .expect("invalid merchant_id")
    }

    /// Approve a merchant with `credit_limit`.
    pub async fn approve(&self, merchant_id: &MerchantId, credit_limit: Decimal) {
        self.server
            .post(&format!("/v1/admin/merchants/{merchant_id}/approve"))
            .add_header("x-admin-key", ADMIN_KEY)
            .json(&json!({ "credit_limit": credit_limit }))
            .await
            .assert_status_ok();
    }

    /// Add `amount` to the pool.
    pub async fn top_up(&self, amount: Decimal) {
        self.server
            .post("/v1/admin/pool/topup")
            .add_header("x-admin-key", ADMIN_KEY)
            .json(&json!({ "amount": amount }))
            .await
            .assert_status_ok();
    }

    /// Register and approve a merchant, returning its ID and auth header.
    pub async fn approved_merchant(&self, credit_limit: Decimal) -> (MerchantId, String) {
        let merchant_id = self.register_merchant(credit_limit).await;
        self.approve(&merchant_id, credit_limit).await;
        (merchant_id, Self::merchant_auth_header(&merchant_id))
    }

    /// Make settlement answer every call with success.
    pub async fn settlement_succeeds(&self, bank_reference: &str) {
        Mock::given(method("POST"))
            .and(path(SETTLEMENT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "SUCCESS",
                "bank_reference": bank_reference,
            })))
            .mount(&self.settlement)
            .await;
    }

    /// Make settlement answer every call with `status` and an empty body.
    pub async fn settlement_responds(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path(SETTLEMENT_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.settlement)
            .await;
    }

    /// Number of calls the settlement service received.
    pub async fn settlement_calls(&self) -> usize {
        self.settlement
            .received_requests()
            .await
            .map_or(0, |requests| requests.len())
    }
}
