use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use crate::config::GatewayConfig;
use crate::error::AppError;

/// Prefix the gateway puts on sandbox transaction keys.
pub const SANDBOX_KEY_PREFIX: &str = "tgen_";

const FALLBACK_CONFIRM_FAILURE: &str = "결제 승인에 실패했습니다.";

/// Verified confirmation returned by the gateway's confirm endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfirmation {
    pub status: String,
    pub order_id: String,
    pub total_amount: i32,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub order_name: Option<String>,
}

/// Seam between the payment flow and the external processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn confirm(
        &self,
        transaction_key: &str,
        order_id: &str,
        amount: i32,
    ) -> Result<GatewayConfirmation, AppError>;
}

/// Toss-style confirm client: Basic auth with the secret key, JSON body,
/// bounded request timeout.
pub struct TossGateway {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl TossGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.confirm_timeout)
            .build()
            .expect("http client construction");
        Self { config, client }
    }

    fn authorization_header(&self) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{}:", self.config.secret_key))
        )
    }
}

#[async_trait]
impl PaymentGateway for TossGateway {
    async fn confirm(
        &self,
        transaction_key: &str,
        order_id: &str,
        amount: i32,
    ) -> Result<GatewayConfirmation, AppError> {
        // Sandbox keys short-circuit only under sandbox credentials; the
        // config constructor refuses to arm this for live secret keys.
        if self.config.sandbox && transaction_key.starts_with(SANDBOX_KEY_PREFIX) {
            return Ok(GatewayConfirmation {
                status: "DONE".to_string(),
                order_id: order_id.to_string(),
                total_amount: amount,
                method: "카드".to_string(),
                order_name: None,
            });
        }

        let response = self
            .client
            .post(format!("{}/v1/payments/confirm", self.config.api_base))
            .header(axum::http::header::AUTHORIZATION, self.authorization_header())
            .json(&json!({
                "paymentKey": transaction_key,
                "orderId": order_id,
                "amount": amount,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            let message = body
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or(FALLBACK_CONFIRM_FAILURE)
                .to_string();
            return Err(AppError::GatewayVerification(message));
        }

        let confirmation: GatewayConfirmation = response.json().await?;
        if confirmation.order_id != order_id || confirmation.total_amount != amount {
            return Err(AppError::GatewayVerification(
                "주문 정보가 승인 응답과 일치하지 않습니다.".to_string(),
            ));
        }
        Ok(confirmation)
    }
}

static ORDER_NAME_MONTHS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*개월").expect("valid month pattern"));

/// Subscription length hint carried in the gateway's order name, e.g.
/// "프리미엄 6개월" -> 6.
pub fn parse_subscription_months(order_name: &str) -> Option<i32> {
    ORDER_NAME_MONTHS
        .captures(order_name)
        .and_then(|caps| caps[1].parse::<i32>().ok())
        .filter(|months| *months >= 1)
}

/// Defaulting variant: one month when the hint is absent or unparseable.
pub fn months_from_order_name(order_name: Option<&str>) -> i32 {
    order_name.and_then(parse_subscription_months).unwrap_or(1)
}
