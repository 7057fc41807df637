use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use sqlx::PgPool;

use crate::billing::PaymentGateway;
use crate::config::{GatewayConfig, PlanPricing};
use crate::{auth, billing, cafes, payments, trends, webhooks};

async fn root() -> &'static str {
    "Cafescope API"
}

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/register", post(auth::register_user))
        .route("/api/login", post(auth::login_user))
        .route("/api/logout", post(auth::logout_user))
        .route("/api/me", get(auth::current_user))
        .route("/api/payments/webhook", post(webhooks::payment_webhook))
        .merge(billing::api::routes())
        .merge(payments::routes())
        .merge(cafes::routes())
        .merge(trends::routes())
}

/// The application minus observability: API routes, the root banner and the
/// shared state layers. The binary wraps this with the prometheus layer.
pub fn app(
    pool: PgPool,
    gateway: Arc<dyn PaymentGateway>,
    gateway_config: GatewayConfig,
    pricing: PlanPricing,
) -> Router {
    Router::new()
        .route("/", get(root))
        .merge(api_routes())
        .layer(Extension(pool))
        .layer(Extension(gateway))
        .layer(Extension(gateway_config))
        .layer(Extension(pricing))
}
