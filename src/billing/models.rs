use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const TIER_FREE: &str = "free";
pub const TIER_PREMIUM: &str = "premium";

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_CANCELLED: &str = "cancelled";

/// Daily allowance on gated features for free-tier accounts.
pub const DAILY_FREE_QUOTA: i32 = 10;

/// Subscription days granted per purchased month.
pub const DAYS_PER_SUBSCRIPTION_MONTH: i64 = 30;

/// One row per user: subscription window plus the daily usage counter.
/// `daily_usage_count` is only meaningful relative to `daily_usage_date`;
/// every access path reconciles the date first.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SubscriptionProfile {
    pub id: i32,
    pub user_id: i32,
    pub subscription_tier: String,
    pub subscription_start: Option<DateTime<Utc>>,
    pub subscription_end: Option<DateTime<Utc>>,
    pub daily_usage_count: i32,
    pub daily_usage_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionProfile {
    /// Premium entitlement at `now`. The expiry boundary is inclusive:
    /// `now == subscription_end` still counts as premium.
    pub fn is_premium(&self, now: DateTime<Utc>) -> bool {
        if self.subscription_tier != TIER_PREMIUM {
            return false;
        }
        match self.subscription_end {
            Some(end) => now <= end,
            None => false,
        }
    }
}

/// Append-only payment record. `transaction_key` and `order_id` are unique at
/// the storage layer; a row in a terminal status never transitions again.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: i32,
    pub user_id: i32,
    pub amount: i32,
    pub transaction_key: String,
    pub order_id: String,
    pub status: String,
    pub subscription_months: i32,
    pub payment_method: String,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.as_str(),
            STATUS_COMPLETED | STATUS_FAILED | STATUS_CANCELLED
        )
    }
}

/// Subscription plan catalog entry.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BillingPlan {
    pub id: i32,
    pub code: String,
    pub name: String,
    pub price: i32,
    pub billing_cycle: String,
    pub features: serde_json::Value,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Outcome of an atomic quota consumption attempt.
#[derive(Debug, Clone, Serialize)]
pub struct UsageDecision {
    pub allowed: bool,
    pub premium: bool,
    pub daily_usage: i32,
}
