use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::billing::{
    months_from_order_name, parse_subscription_months, LedgerService, PaymentGateway,
};
use crate::config::PlanPricing;
use crate::error::{AppError, AppResult};
use crate::extractor::{AuthUser, OptionalAuthUser};

const FALLBACK_FAILURE_MESSAGE: &str = "결제가 취소되었습니다.";

pub fn routes() -> Router {
    Router::new()
        .route("/api/payments/orders", post(create_order))
        .route("/api/payments/success", post(payment_success))
        .route("/api/payments/fail", post(payment_fail))
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub amount: i32,
    /// Server-generated when absent, so callers never have to invent one.
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub months: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub success: bool,
    pub payment_id: i32,
    pub order_id: String,
}

/// Creates the payment intent for a checkout: validates the client-submitted
/// amount against the plan price table and pre-links the authenticated user to
/// the order id.
pub async fn create_order(
    Extension(pool): Extension<PgPool>,
    Extension(pricing): Extension<PlanPricing>,
    AuthUser { user_id, .. }: AuthUser,
    Json(payload): Json<CreateOrderRequest>,
) -> AppResult<Json<CreateOrderResponse>> {
    let order_id = match payload.order_id.as_deref().map(str::trim) {
        Some("") | None => format!("order_{}", Uuid::new_v4().simple()),
        Some(order_id) => order_id.to_string(),
    };
    let plan = payload.plan.as_deref().unwrap_or("premium");
    let Some(expected) = pricing.price_for(plan) else {
        return Err(AppError::BadRequest(format!("unknown plan: {plan}")));
    };
    if payload.amount != expected {
        return Err(AppError::InvalidAmount);
    }
    let months = payload.months.unwrap_or(1);
    if months < 1 {
        return Err(AppError::BadRequest("months must be positive".into()));
    }

    let ledger = LedgerService::new(pool);
    let payment = ledger
        .create_payment_intent(user_id, payload.amount, &order_id, months)
        .await?;
    info!(user_id, order_id = %payment.order_id, "payment order created");
    Ok(Json(CreateOrderResponse {
        success: true,
        payment_id: payment.id,
        order_id: payment.order_id,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessCallback {
    pub payment_key: Option<String>,
    pub order_id: Option<String>,
    pub amount: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct PaymentOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i32>,
}

/// Gateway redirect after an approved checkout. The order's intent row names
/// the owner; without one the authenticated session is the fallback, and with
/// neither the callback is rejected. Verification happens against the gateway
/// before anything is written.
pub async fn payment_success(
    Extension(pool): Extension<PgPool>,
    Extension(gateway): Extension<Arc<dyn PaymentGateway>>,
    OptionalAuthUser(session_user): OptionalAuthUser,
    Json(payload): Json<SuccessCallback>,
) -> AppResult<Json<PaymentOutcome>> {
    let (Some(transaction_key), Some(order_id), Some(amount)) =
        (payload.payment_key, payload.order_id, payload.amount)
    else {
        return Err(AppError::MissingParameters("paymentKey, orderId, amount"));
    };

    let ledger = LedgerService::new(pool);
    let intent = ledger.payment_for_order(&order_id).await?;
    let user_id = match &intent {
        Some(payment) => payment.user_id,
        None => session_user
            .map(|user| user.user_id)
            .ok_or(AppError::UserResolutionFailure)?,
    };
    if let Some(payment) = &intent {
        if payment.is_terminal() {
            return Err(AppError::DuplicateTransaction);
        }
        if payment.amount != amount {
            return Err(AppError::InvalidAmount);
        }
    }

    let confirmation = gateway.confirm(&transaction_key, &order_id, amount).await?;
    let now = Utc::now();
    let payment = match &intent {
        Some(_) => {
            let months = confirmation
                .order_name
                .as_deref()
                .and_then(parse_subscription_months);
            ledger
                .complete_pending_payment(&order_id, &transaction_key, &confirmation.method, months, now)
                .await?
        }
        None => {
            let months = months_from_order_name(confirmation.order_name.as_deref());
            ledger
                .settle_completed_payment(
                    user_id,
                    amount,
                    None,
                    &transaction_key,
                    &order_id,
                    months,
                    &confirmation.method,
                    now,
                )
                .await?
        }
    };
    info!(user_id, order_id = %payment.order_id, amount, "payment completed");

    Ok(Json(PaymentOutcome {
        success: true,
        message: "결제가 성공적으로 완료되었습니다.".to_string(),
        code: None,
        user_id: Some(user_id),
        order_id: Some(payment.order_id),
        amount: Some(payment.amount),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailCallback {
    pub code: Option<String>,
    pub message: Option<String>,
    pub order_id: Option<String>,
}

/// Gateway redirect after an aborted checkout. An unknown or already-settled
/// order is tolerated; the pending row, if any, moves to failed.
pub async fn payment_fail(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<FailCallback>,
) -> AppResult<Json<PaymentOutcome>> {
    let order_id = match payload.order_id.as_deref() {
        Some(order_id) => {
            let ledger = LedgerService::new(pool);
            ledger.mark_failed(order_id).await?;
            Some(order_id.to_string())
        }
        None => None,
    };

    Ok(Json(PaymentOutcome {
        success: false,
        message: payload
            .message
            .unwrap_or_else(|| FALLBACK_FAILURE_MESSAGE.to_string()),
        code: payload.code,
        user_id: None,
        order_id,
        amount: None,
    }))
}
