use std::time::Duration;

use cafescope_backend::billing::{months_from_order_name, PaymentGateway, TossGateway};
use cafescope_backend::config::GatewayConfig;
use cafescope_backend::error::AppError;
use httpmock::prelude::*;
use serde_json::json;

fn config(api_base: String, sandbox: bool) -> GatewayConfig {
    GatewayConfig {
        api_base,
        client_key: "test_ck_abcdef".to_string(),
        secret_key: if sandbox {
            "test_sk_abcdef".to_string()
        } else {
            "live_sk_abcdef".to_string()
        },
        sandbox,
        webhook_secret: None,
        confirm_timeout: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn confirm_success_returns_verified_confirmation() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/payments/confirm")
            .header_exists("authorization")
            .json_body(json!({
                "paymentKey": "pk_1",
                "orderId": "o1",
                "amount": 9500,
            }));
        then.status(200).json_body(json!({
            "status": "DONE",
            "orderId": "o1",
            "totalAmount": 9500,
            "method": "카드",
            "orderName": "프리미엄 6개월",
        }));
    });

    let gateway = TossGateway::new(config(server.base_url(), false));
    let confirmation = gateway.confirm("pk_1", "o1", 9500).await.unwrap();
    mock.assert();
    assert_eq!(confirmation.status, "DONE");
    assert_eq!(confirmation.method, "카드");
    assert_eq!(months_from_order_name(confirmation.order_name.as_deref()), 6);
}

#[tokio::test]
async fn confirm_failure_carries_the_gateway_message() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/payments/confirm");
        then.status(400).json_body(json!({
            "code": "ALREADY_PROCESSED_PAYMENT",
            "message": "이미 처리된 결제 입니다.",
        }));
    });

    let gateway = TossGateway::new(config(server.base_url(), false));
    let outcome = gateway.confirm("pk_1", "o1", 9500).await;
    match outcome {
        Err(AppError::GatewayVerification(message)) => {
            assert!(message.contains("이미 처리된"));
        }
        other => panic!("expected verification failure, got {other:?}"),
    }
}

#[tokio::test]
async fn confirm_rejects_mismatched_order() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/payments/confirm");
        then.status(200).json_body(json!({
            "status": "DONE",
            "orderId": "someone_elses_order",
            "totalAmount": 9500,
            "method": "카드",
        }));
    });

    let gateway = TossGateway::new(config(server.base_url(), false));
    let outcome = gateway.confirm("pk_1", "o1", 9500).await;
    assert!(matches!(outcome, Err(AppError::GatewayVerification(_))));
}

#[tokio::test]
async fn confirm_rejects_mismatched_amount() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/payments/confirm");
        then.status(200).json_body(json!({
            "status": "DONE",
            "orderId": "o1",
            "totalAmount": 100,
            "method": "카드",
        }));
    });

    let gateway = TossGateway::new(config(server.base_url(), false));
    let outcome = gateway.confirm("pk_1", "o1", 9500).await;
    assert!(matches!(outcome, Err(AppError::GatewayVerification(_))));
}

#[tokio::test]
async fn sandbox_keys_skip_the_confirm_round_trip() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/payments/confirm");
        then.status(500);
    });

    let gateway = TossGateway::new(config(server.base_url(), true));
    let confirmation = gateway.confirm("tgen_test_key", "o1", 5000).await.unwrap();
    assert_eq!(confirmation.status, "DONE");
    assert_eq!(confirmation.total_amount, 5000);
    assert_eq!(mock.hits(), 0);
}

#[tokio::test]
async fn sandbox_prefix_alone_does_not_bypass_verification() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/payments/confirm");
        then.status(401).json_body(json!({"message": "인증되지 않은 시크릿 키입니다."}));
    });

    // Live credentials: the sandbox key still goes to the gateway and fails.
    let gateway = TossGateway::new(config(server.base_url(), false));
    let outcome = gateway.confirm("tgen_test_key", "o1", 5000).await;
    assert!(matches!(outcome, Err(AppError::GatewayVerification(_))));
    assert_eq!(mock.hits(), 1);
}
