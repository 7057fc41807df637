pub mod api;
pub mod gateway;
pub mod models;
pub mod service;

pub use api::{SubscriptionEnvelope, UsageResponse};
pub use gateway::{
    months_from_order_name, parse_subscription_months, GatewayConfirmation, PaymentGateway,
    TossGateway, SANDBOX_KEY_PREFIX,
};
pub use models::{
    BillingPlan, PaymentRecord, SubscriptionProfile, UsageDecision, DAILY_FREE_QUOTA,
    DAYS_PER_SUBSCRIPTION_MONTH, STATUS_CANCELLED, STATUS_COMPLETED, STATUS_FAILED,
    STATUS_PENDING, TIER_FREE, TIER_PREMIUM,
};
pub use service::LedgerService;
