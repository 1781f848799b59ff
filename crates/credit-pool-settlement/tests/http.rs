//! Settlement client tests against a mock settlement service.

use std::time::Duration;

use credit_pool_core::{AccountId, Amount, MerchantId};
use credit_pool_settlement::{
    HttpSettlementClient, SettlementError, SettlementGateway, SettlementOptions,
    SettlementRequest,
};
use rust_decimal_macros::dec;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "internal-test-token";

fn request() -> SettlementRequest {
    SettlementRequest {
        merchant_id: MerchantId::generate(),
        account_id: AccountId::generate(),
        amount: Amount::new(dec!(42.5)).unwrap(),
        bank_account: "NL91ABNA0417164300".to_string(),
    }
}

fn client(server: &MockServer) -> HttpSettlementClient {
    HttpSettlementClient::new(format!("{}/api/settlement/withdraw", server.uri()), TOKEN).unwrap()
}

#[tokio::test]
async fn posts_bearer_token_and_string_amount() {
    let server = MockServer::start().await;
    let req = request();

    Mock::given(method("POST"))
        .and(path("/api/settlement/withdraw"))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
        .and(body_partial_json(serde_json::json!({
            "merchant_id": req.merchant_id.to_string(),
            "amount": "42.50",
            "bank_account": "NL91ABNA0417164300",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "SUCCESS",
            "bank_reference": "BNK-42",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let receipt = client(&server).settle(&req).await.unwrap();
    assert_eq!(receipt.bank_reference, "BNK-42");
}

#[tokio::test]
async fn upstream_500_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = client(&server).settle(&request()).await.unwrap_err();
    assert!(matches!(err, SettlementError::Upstream { status: 500 }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn forbidden_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string(r#"{"detail":"Forbidden"}"#))
        .mount(&server)
        .await;

    let err = client(&server).settle(&request()).await.unwrap_err();
    match err {
        SettlementError::Rejected { status, body } => {
            assert_eq!(status, 403);
            assert!(body.contains("Forbidden"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn slow_upstream_times_out_as_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"status": "SUCCESS", "bank_reference": "late"}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let client = HttpSettlementClient::with_options(
        format!("{}/api/settlement/withdraw", server.uri()),
        TOKEN,
        SettlementOptions {
            timeout: Duration::from_millis(50),
        },
    )
    .unwrap();

    let err = client.settle(&request()).await.unwrap_err();
    assert!(matches!(err, SettlementError::Http(_)));
    assert!(err.is_retryable());
}
