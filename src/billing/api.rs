use axum::{extract::Extension, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

use super::models::{BillingPlan, PaymentRecord, SubscriptionProfile, DAILY_FREE_QUOTA};
use super::service::LedgerService;

pub fn routes() -> Router {
    Router::new()
        .route("/api/billing/plans", get(list_plans))
        .route("/api/accounts/usage", get(usage_api))
        .route("/api/accounts/subscription", get(get_subscription))
        .route("/api/payments/history", get(payment_history))
}

pub async fn list_plans(Extension(pool): Extension<PgPool>) -> AppResult<Json<Vec<BillingPlan>>> {
    let plans = sqlx::query_as::<_, BillingPlan>(
        "SELECT * FROM billing_plans WHERE active = TRUE ORDER BY price ASC",
    )
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!(?e, "DB error listing billing plans");
        AppError::Db(e)
    })?;
    Ok(Json(plans))
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub success: bool,
    pub daily_usage: i32,
    pub daily_limit: i32,
    pub can_use: bool,
    pub is_premium: bool,
}

/// Usage readout for the account page. Quota exhaustion is reported as a
/// boolean; the gating decision stays with the caller.
pub async fn usage_api(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<UsageResponse>> {
    let ledger = LedgerService::new(pool);
    let (profile, is_premium, can_use) = ledger.usage_snapshot(user_id, Utc::now()).await?;
    Ok(Json(UsageResponse {
        success: true,
        daily_usage: profile.daily_usage_count,
        daily_limit: DAILY_FREE_QUOTA,
        can_use,
        is_premium,
    }))
}

#[derive(Debug, Serialize)]
pub struct SubscriptionEnvelope {
    pub profile: SubscriptionProfile,
    pub is_premium: bool,
}

pub async fn get_subscription(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<SubscriptionEnvelope>> {
    let ledger = LedgerService::new(pool);
    let profile = ledger.profile_for_user(user_id).await?;
    let is_premium = profile.is_premium(Utc::now());
    Ok(Json(SubscriptionEnvelope {
        profile,
        is_premium,
    }))
}

pub async fn payment_history(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<Vec<PaymentRecord>>> {
    let ledger = LedgerService::new(pool);
    let payments = ledger.payments_for_user(user_id).await?;
    Ok(Json(payments))
}
