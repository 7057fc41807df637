use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, warn};

use crate::error::AppError;

use super::models::{
    PaymentRecord, SubscriptionProfile, UsageDecision, DAILY_FREE_QUOTA,
    DAYS_PER_SUBSCRIPTION_MONTH, STATUS_CANCELLED, STATUS_COMPLETED, STATUS_FAILED,
    STATUS_PENDING, TIER_PREMIUM,
};

/// Owns the subscription window and the daily usage counter for every user.
/// All callers receive the current timestamp as an argument so entitlement
/// checks stay deterministic under test.
#[derive(Clone)]
pub struct LedgerService {
    pool: PgPool,
}

impl LedgerService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Profiles materialize on first access, one per user.
    pub async fn profile_for_user(&self, user_id: i32) -> Result<SubscriptionProfile, AppError> {
        sqlx::query(
            "INSERT INTO subscription_profiles (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        let profile = sqlx::query_as::<_, SubscriptionProfile>(
            "SELECT * FROM subscription_profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(profile)
    }

    /// Creates the pending order row that pre-links the user to the order id,
    /// so the gateway callback never has to recover the owner from the order
    /// string itself.
    pub async fn create_payment_intent(
        &self,
        user_id: i32,
        amount: i32,
        order_id: &str,
        months: i32,
    ) -> Result<PaymentRecord, AppError> {
        sqlx::query_as::<_, PaymentRecord>(
            r#"
            INSERT INTO payments (user_id, amount, order_id, status, subscription_months)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .bind(order_id)
        .bind(STATUS_PENDING)
        .bind(months)
        .fetch_one(&self.pool)
        .await
        .map_err(Self::map_payment_conflict)
    }

    /// Records an already-verified completed payment. Duplicate transaction or
    /// order ids are rejected by the storage-layer unique constraints before
    /// any row is written.
    pub async fn record_payment(
        &self,
        user_id: i32,
        amount: i32,
        expected_amount: Option<i32>,
        transaction_key: &str,
        order_id: &str,
        months: i32,
        method: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentRecord, AppError> {
        if let Some(expected) = expected_amount {
            if amount != expected {
                return Err(AppError::InvalidAmount);
            }
        }
        let mut tx = self.pool.begin().await?;
        let payment = Self::insert_completed(
            &mut tx,
            user_id,
            amount,
            transaction_key,
            order_id,
            months,
            method,
            now,
        )
        .await?;
        tx.commit().await?;
        Ok(payment)
    }

    /// Records a completed payment and applies its subscription effect in one
    /// transaction: a persisted completed payment without entitlement cannot
    /// exist, even across a crash between the two writes.
    #[allow(clippy::too_many_arguments)]
    pub async fn settle_completed_payment(
        &self,
        user_id: i32,
        amount: i32,
        expected_amount: Option<i32>,
        transaction_key: &str,
        order_id: &str,
        months: i32,
        method: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentRecord, AppError> {
        if let Some(expected) = expected_amount {
            if amount != expected {
                return Err(AppError::InvalidAmount);
            }
        }
        let mut tx = self.pool.begin().await?;
        let payment = Self::insert_completed(
            &mut tx,
            user_id,
            amount,
            transaction_key,
            order_id,
            months,
            method,
            now,
        )
        .await?;
        Self::apply_activation(&mut tx, &payment, now).await?;
        tx.commit().await?;
        Ok(payment)
    }

    /// Confirms a pending order after gateway verification. Completion and
    /// activation share one transaction; a row that already reached a terminal
    /// status is reported as a duplicate instead of being settled twice.
    pub async fn complete_pending_payment(
        &self,
        order_id: &str,
        transaction_key: &str,
        method: &str,
        months: Option<i32>,
        now: DateTime<Utc>,
    ) -> Result<PaymentRecord, AppError> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query_as::<_, PaymentRecord>(
            r#"
            UPDATE payments
            SET status = $2,
                transaction_key = $3,
                payment_method = $4,
                subscription_months = COALESCE($5, subscription_months),
                approved_at = $6,
                updated_at = NOW()
            WHERE order_id = $1 AND status = $7
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(STATUS_COMPLETED)
        .bind(transaction_key)
        .bind(method)
        .bind(months)
        .bind(now)
        .bind(STATUS_PENDING)
        .fetch_optional(&mut tx)
        .await
        .map_err(Self::map_payment_conflict)?;

        let Some(payment) = updated else {
            let known: Option<i32> = sqlx::query_scalar("SELECT id FROM payments WHERE order_id = $1")
                .bind(order_id)
                .fetch_optional(&mut tx)
                .await?;
            return match known {
                Some(_) => Err(AppError::DuplicateTransaction),
                None => Err(AppError::NotFound),
            };
        };

        Self::apply_activation(&mut tx, &payment, now).await?;
        tx.commit().await?;
        Ok(payment)
    }

    /// Applies the effect of a completed payment to the owner's subscription
    /// window, in its own transaction.
    pub async fn activate_subscription(
        &self,
        payment: &PaymentRecord,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        Self::apply_activation(&mut tx, payment, now).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Applies a gateway status notification to the matching order. Unknown
    /// orders and unrecognized statuses are ignored; a row in a terminal
    /// status is never transitioned again.
    pub async fn apply_gateway_status(
        &self,
        order_id: &str,
        transaction_key: Option<&str>,
        gateway_status: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PaymentRecord>, AppError> {
        let mapped = match gateway_status {
            "DONE" => STATUS_COMPLETED,
            "CANCELED" => STATUS_CANCELLED,
            "FAILED" => STATUS_FAILED,
            other => {
                debug!(%order_id, status = other, "ignoring unrecognized gateway status");
                return Ok(None);
            }
        };

        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query_as::<_, PaymentRecord>(
            "SELECT * FROM payments WHERE order_id = $1 FOR UPDATE",
        )
        .bind(order_id)
        .fetch_optional(&mut tx)
        .await?;
        let Some(payment) = existing else {
            debug!(%order_id, "gateway notification for unknown order");
            return Ok(None);
        };
        if payment.is_terminal() {
            return Ok(Some(payment));
        }

        let payment = if mapped == STATUS_COMPLETED {
            let updated = sqlx::query_as::<_, PaymentRecord>(
                r#"
                UPDATE payments
                SET status = $2,
                    transaction_key = COALESCE(NULLIF($3, ''), transaction_key),
                    approved_at = $4,
                    updated_at = NOW()
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(payment.id)
            .bind(STATUS_COMPLETED)
            .bind(transaction_key.unwrap_or(""))
            .bind(now)
            .fetch_one(&mut tx)
            .await
            .map_err(Self::map_payment_conflict)?;
            Self::apply_activation(&mut tx, &updated, now).await?;
            updated
        } else {
            sqlx::query_as::<_, PaymentRecord>(
                "UPDATE payments SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
            )
            .bind(payment.id)
            .bind(mapped)
            .fetch_one(&mut tx)
            .await?
        };

        tx.commit().await?;
        Ok(Some(payment))
    }

    /// Marks a pending order failed. A missing or already-settled order is not
    /// an error on this path.
    pub async fn mark_failed(&self, order_id: &str) -> Result<Option<PaymentRecord>, AppError> {
        let updated = sqlx::query_as::<_, PaymentRecord>(
            "UPDATE payments SET status = $2, updated_at = NOW() WHERE order_id = $1 AND status = $3 RETURNING *",
        )
        .bind(order_id)
        .bind(STATUS_FAILED)
        .bind(STATUS_PENDING)
        .fetch_optional(&self.pool)
        .await?;
        Ok(updated)
    }

    pub async fn payment_for_order(
        &self,
        order_id: &str,
    ) -> Result<Option<PaymentRecord>, AppError> {
        let payment =
            sqlx::query_as::<_, PaymentRecord>("SELECT * FROM payments WHERE order_id = $1")
                .bind(order_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(payment)
    }

    pub async fn payments_for_user(&self, user_id: i32) -> Result<Vec<PaymentRecord>, AppError> {
        let payments = sqlx::query_as::<_, PaymentRecord>(
            "SELECT * FROM payments WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    /// Reconciled view of the counter plus the gating decision. Premium
    /// profiles bypass the counter entirely, so theirs may be stale.
    pub async fn usage_snapshot(
        &self,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> Result<(SubscriptionProfile, bool, bool), AppError> {
        let profile = self.profile_for_user(user_id).await?;
        if profile.is_premium(now) {
            return Ok((profile, true, true));
        }
        let profile = self.reconcile_usage_date(user_id, now.date_naive()).await?;
        let can_use = profile.daily_usage_count < DAILY_FREE_QUOTA;
        Ok((profile, false, can_use))
    }

    pub async fn can_use(&self, user_id: i32, now: DateTime<Utc>) -> Result<bool, AppError> {
        let (_, _, can_use) = self.usage_snapshot(user_id, now).await?;
        Ok(can_use)
    }

    /// Unconditional counter bump after date reconciliation. Callers of the
    /// legacy pair check `can_use` first; gated endpoints use `try_consume`
    /// instead.
    pub async fn increment_usage(
        &self,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> Result<SubscriptionProfile, AppError> {
        self.profile_for_user(user_id).await?;
        self.reconcile_usage_date(user_id, now.date_naive()).await?;
        let profile = sqlx::query_as::<_, SubscriptionProfile>(
            "UPDATE subscription_profiles SET daily_usage_count = daily_usage_count + 1, updated_at = NOW() WHERE user_id = $1 RETURNING *",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(profile)
    }

    /// Check-and-increment in a single conditional UPDATE, so concurrent
    /// requests from one user cannot push the counter past the quota.
    pub async fn try_consume(
        &self,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> Result<UsageDecision, AppError> {
        let profile = self.profile_for_user(user_id).await?;
        if profile.is_premium(now) {
            return Ok(UsageDecision {
                allowed: true,
                premium: true,
                daily_usage: profile.daily_usage_count,
            });
        }

        let today = now.date_naive();
        self.reconcile_usage_date(user_id, today).await?;
        let consumed: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE subscription_profiles
            SET daily_usage_count = daily_usage_count + 1, updated_at = NOW()
            WHERE user_id = $1 AND daily_usage_date = $2 AND daily_usage_count < $3
            RETURNING daily_usage_count
            "#,
        )
        .bind(user_id)
        .bind(today)
        .bind(DAILY_FREE_QUOTA)
        .fetch_optional(&self.pool)
        .await?;

        match consumed {
            Some(count) => Ok(UsageDecision {
                allowed: true,
                premium: false,
                daily_usage: count,
            }),
            None => {
                let profile = self.reconcile_usage_date(user_id, today).await?;
                Ok(UsageDecision {
                    allowed: false,
                    premium: false,
                    daily_usage: profile.daily_usage_count,
                })
            }
        }
    }

    /// Resets the counter when the stored date is not `today`. Executed at the
    /// start of every quota operation instead of by a scheduled job.
    async fn reconcile_usage_date(
        &self,
        user_id: i32,
        today: NaiveDate,
    ) -> Result<SubscriptionProfile, AppError> {
        let reset = sqlx::query_as::<_, SubscriptionProfile>(
            r#"
            UPDATE subscription_profiles
            SET daily_usage_count = 0, daily_usage_date = $2, updated_at = NOW()
            WHERE user_id = $1 AND daily_usage_date <> $2
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(today)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(profile) = reset {
            return Ok(profile);
        }
        let profile = sqlx::query_as::<_, SubscriptionProfile>(
            "SELECT * FROM subscription_profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(profile)
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_completed(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i32,
        amount: i32,
        transaction_key: &str,
        order_id: &str,
        months: i32,
        method: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentRecord, AppError> {
        sqlx::query_as::<_, PaymentRecord>(
            r#"
            INSERT INTO payments (
                user_id, amount, transaction_key, order_id, status,
                subscription_months, payment_method, approved_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .bind(transaction_key)
        .bind(order_id)
        .bind(STATUS_COMPLETED)
        .bind(months)
        .bind(method)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(Self::map_payment_conflict)
    }

    async fn apply_activation(
        tx: &mut Transaction<'_, Postgres>,
        payment: &PaymentRecord,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if payment.status != STATUS_COMPLETED {
            warn!(
                order_id = %payment.order_id,
                status = %payment.status,
                "subscription activation requested for a non-completed payment; ignoring"
            );
            return Ok(());
        }

        sqlx::query(
            "INSERT INTO subscription_profiles (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(payment.user_id)
        .execute(&mut *tx)
        .await?;
        let profile = sqlx::query_as::<_, SubscriptionProfile>(
            "SELECT * FROM subscription_profiles WHERE user_id = $1 FOR UPDATE",
        )
        .bind(payment.user_id)
        .fetch_one(&mut *tx)
        .await?;

        // An unexpired window extends from its current end, so a renewal never
        // loses paid time; a lapsed or free profile restarts at `now`.
        let extending = profile.is_premium(now);
        let base = match profile.subscription_end {
            Some(end) if extending => end,
            _ => now,
        };
        let start = if extending {
            profile.subscription_start
        } else {
            Some(base)
        };
        let end =
            base + Duration::days(DAYS_PER_SUBSCRIPTION_MONTH * i64::from(payment.subscription_months));

        sqlx::query(
            r#"
            UPDATE subscription_profiles
            SET subscription_tier = $2, subscription_start = $3, subscription_end = $4, updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(payment.user_id)
        .bind(TIER_PREMIUM)
        .bind(start)
        .bind(end)
        .execute(&mut *tx)
        .await?;
        Ok(())
    }

    fn map_payment_conflict(err: sqlx::Error) -> AppError {
        if let sqlx::Error::Database(db_err) = &err {
            if matches!(
                db_err.constraint(),
                Some("payments_transaction_key_key") | Some("payments_order_id_key")
            ) {
                return AppError::DuplicateTransaction;
            }
        }
        AppError::Db(err)
    }
}
