use axum::{extract::Extension, http::HeaderMap, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::info;

use crate::billing::LedgerService;
use crate::config::GatewayConfig;
use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct GatewayWebhookRequest {
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(default)]
    pub data: WebhookPaymentData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPaymentData {
    pub payment_key: Option<String>,
    pub order_id: Option<String>,
    pub status: Option<String>,
}

/// Asynchronous status notifications from the payment gateway. Signature
/// verification is enforced only when a webhook secret is configured; the
/// response is 200 for unknown orders and unrecognized statuses so the
/// gateway stops retrying.
pub async fn payment_webhook(
    Extension(pool): Extension<PgPool>,
    Extension(config): Extension<GatewayConfig>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> AppResult<Json<Value>> {
    if let Some(secret) = &config.webhook_secret {
        verify_signature(secret, &headers, &body)?;
    }

    let payload: GatewayWebhookRequest =
        serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(format!("bad payload: {e}")))?;

    if payload.event_type != "PAYMENT_STATUS_CHANGED" {
        return Ok(Json(json!({ "success": true, "ignored": true })));
    }
    let (Some(order_id), Some(status)) = (payload.data.order_id, payload.data.status) else {
        return Err(AppError::MissingParameters("orderId, status"));
    };

    let ledger = LedgerService::new(pool);
    let applied = ledger
        .apply_gateway_status(
            &order_id,
            payload.data.payment_key.as_deref(),
            &status,
            Utc::now(),
        )
        .await?;

    match applied {
        Some(payment) => {
            info!(order_id = %payment.order_id, status = %payment.status, "gateway status applied");
            Ok(Json(json!({ "success": true })))
        }
        None => Ok(Json(json!({ "success": true, "ignored": true }))),
    }
}

/// HMAC-SHA256 over the raw body, hex-encoded with a `sha256=` prefix in the
/// `x-webhook-signature` header.
fn verify_signature(secret: &str, headers: &HeaderMap, body: &[u8]) -> Result<(), AppError> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let sig_header = headers
        .get("x-webhook-signature")
        .ok_or(AppError::BadRequest("Missing signature".into()))?;
    let sig = sig_header
        .to_str()
        .map_err(|_| AppError::BadRequest("Bad signature".into()))?;
    let expected = {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can use any key length");
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    };
    if expected != sig {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn signature_round_trip() {
        let body = br#"{"eventType":"PAYMENT_STATUS_CHANGED"}"#;
        let mut headers = HeaderMap::new();
        headers.insert("x-webhook-signature", sign("hook-secret", body).parse().unwrap());
        assert!(verify_signature("hook-secret", &headers, body).is_ok());
        assert!(verify_signature("other-secret", &headers, body).is_err());
    }

    #[test]
    fn missing_signature_rejected() {
        let headers = HeaderMap::new();
        assert!(verify_signature("hook-secret", &headers, b"{}").is_err());
    }
}
