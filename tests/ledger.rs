use cafescope_backend::billing::{
    LedgerService, STATUS_CANCELLED, STATUS_COMPLETED, STATUS_FAILED, STATUS_PENDING, TIER_FREE,
    TIER_PREMIUM,
};
use cafescope_backend::error::AppError;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

async fn create_user(pool: &PgPool, email: &str) -> i32 {
    sqlx::query_scalar(
        "INSERT INTO users (username, email, password_hash) VALUES ($1, $2, 'hashed') RETURNING id",
    )
    .bind(email.split('@').next().unwrap())
    .bind(email)
    .fetch_one(pool)
    .await
    .unwrap()
}

fn close_to(left: DateTime<Utc>, right: DateTime<Utc>) -> bool {
    (left - right).num_seconds().abs() < 10
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn end_to_end_first_subscription(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = create_user(&pool, "first@example.com").await;
    let ledger = LedgerService::new(pool.clone());

    let profile = ledger.profile_for_user(user_id).await.unwrap();
    assert_eq!(profile.subscription_tier, TIER_FREE);
    assert_eq!(profile.daily_usage_count, 0);
    let now = Utc::now();
    assert!(!profile.is_premium(now));

    let payment = ledger
        .record_payment(user_id, 5000, None, "t1", "o1", 1, "카드", now)
        .await
        .unwrap();
    assert_eq!(payment.status, STATUS_COMPLETED);
    ledger.activate_subscription(&payment, now).await.unwrap();

    let profile = ledger.profile_for_user(user_id).await.unwrap();
    assert_eq!(profile.subscription_tier, TIER_PREMIUM);
    assert!(profile.is_premium(now));
    assert!(close_to(profile.subscription_start.unwrap(), now));
    assert!(close_to(
        profile.subscription_end.unwrap(),
        now + Duration::days(30)
    ));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn extension_keeps_start_and_extends_from_current_end(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = create_user(&pool, "extend@example.com").await;
    let ledger = LedgerService::new(pool.clone());
    let now = Utc::now();

    ledger
        .settle_completed_payment(user_id, 9500, None, "t1", "o1", 1, "카드", now)
        .await
        .unwrap();
    let before = ledger.profile_for_user(user_id).await.unwrap();
    let original_start = before.subscription_start.unwrap();
    let original_end = before.subscription_end.unwrap();

    ledger
        .settle_completed_payment(user_id, 9500, None, "t2", "o2", 1, "카드", now)
        .await
        .unwrap();
    let after = ledger.profile_for_user(user_id).await.unwrap();
    assert_eq!(after.subscription_start.unwrap(), original_start);
    assert_eq!(
        after.subscription_end.unwrap(),
        original_end + Duration::days(30)
    );
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn lapsed_subscription_restarts_from_now(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = create_user(&pool, "lapsed@example.com").await;
    let ledger = LedgerService::new(pool.clone());
    let now = Utc::now();

    // Expired window left over from an earlier subscription.
    ledger.profile_for_user(user_id).await.unwrap();
    sqlx::query(
        "UPDATE subscription_profiles SET subscription_tier = $2, subscription_start = $3, subscription_end = $4 WHERE user_id = $1",
    )
    .bind(user_id)
    .bind(TIER_PREMIUM)
    .bind(now - Duration::days(90))
    .bind(now - Duration::days(60))
    .execute(&pool)
    .await
    .unwrap();

    ledger
        .settle_completed_payment(user_id, 9500, None, "t1", "o1", 1, "카드", now)
        .await
        .unwrap();
    let profile = ledger.profile_for_user(user_id).await.unwrap();
    assert!(close_to(profile.subscription_start.unwrap(), now));
    assert!(close_to(
        profile.subscription_end.unwrap(),
        now + Duration::days(30)
    ));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn duplicate_transaction_key_rejected(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = create_user(&pool, "dupe@example.com").await;
    let ledger = LedgerService::new(pool.clone());
    let now = Utc::now();

    ledger
        .record_payment(user_id, 9500, None, "t1", "o1", 1, "카드", now)
        .await
        .unwrap();
    let second = ledger
        .record_payment(user_id, 9500, None, "t1", "o2", 1, "카드", now)
        .await;
    assert!(matches!(second, Err(AppError::DuplicateTransaction)));

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE transaction_key = 't1'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count, 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn duplicate_order_id_rejected_before_any_mutation(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = create_user(&pool, "order@example.com").await;
    let ledger = LedgerService::new(pool.clone());

    ledger
        .create_payment_intent(user_id, 9500, "o1", 1)
        .await
        .unwrap();
    let second = ledger.create_payment_intent(user_id, 9500, "o1", 1).await;
    assert!(matches!(second, Err(AppError::DuplicateTransaction)));

    let profile = ledger.profile_for_user(user_id).await.unwrap();
    assert_eq!(profile.subscription_tier, TIER_FREE);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn mismatched_amount_rejected(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = create_user(&pool, "amount@example.com").await;
    let ledger = LedgerService::new(pool.clone());

    let outcome = ledger
        .record_payment(user_id, 100, Some(9500), "t1", "o1", 1, "카드", Utc::now())
        .await;
    assert!(matches!(outcome, Err(AppError::InvalidAmount)));
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payments")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn activating_pending_payment_is_a_noop(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = create_user(&pool, "noop@example.com").await;
    let ledger = LedgerService::new(pool.clone());

    let intent = ledger
        .create_payment_intent(user_id, 9500, "o1", 1)
        .await
        .unwrap();
    assert_eq!(intent.status, STATUS_PENDING);
    ledger
        .activate_subscription(&intent, Utc::now())
        .await
        .unwrap();

    let profile = ledger.profile_for_user(user_id).await.unwrap();
    assert_eq!(profile.subscription_tier, TIER_FREE);
    assert!(profile.subscription_end.is_none());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn completing_pending_payment_twice_is_rejected(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = create_user(&pool, "twice@example.com").await;
    let ledger = LedgerService::new(pool.clone());
    let now = Utc::now();

    ledger
        .create_payment_intent(user_id, 9500, "o1", 1)
        .await
        .unwrap();
    let first = ledger
        .complete_pending_payment("o1", "t1", "카드", None, now)
        .await
        .unwrap();
    assert_eq!(first.status, STATUS_COMPLETED);

    let second = ledger
        .complete_pending_payment("o1", "t1", "카드", None, now)
        .await;
    assert!(matches!(second, Err(AppError::DuplicateTransaction)));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn webhook_done_completes_and_activates(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = create_user(&pool, "hook@example.com").await;
    let ledger = LedgerService::new(pool.clone());
    let now = Utc::now();

    ledger
        .create_payment_intent(user_id, 9500, "o1", 1)
        .await
        .unwrap();
    let applied = ledger
        .apply_gateway_status("o1", Some("t1"), "DONE", now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(applied.status, STATUS_COMPLETED);
    assert_eq!(applied.transaction_key, "t1");
    assert!(applied.approved_at.is_some());

    let profile = ledger.profile_for_user(user_id).await.unwrap();
    assert!(profile.is_premium(now));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn webhook_never_leaves_a_terminal_status(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = create_user(&pool, "terminal@example.com").await;
    let ledger = LedgerService::new(pool.clone());
    let now = Utc::now();

    ledger
        .create_payment_intent(user_id, 9500, "o1", 1)
        .await
        .unwrap();
    ledger
        .apply_gateway_status("o1", Some("t1"), "DONE", now)
        .await
        .unwrap();

    let after_cancel = ledger
        .apply_gateway_status("o1", None, "CANCELED", now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after_cancel.status, STATUS_COMPLETED);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn webhook_maps_cancel_and_fail_and_ignores_the_rest(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = create_user(&pool, "statuses@example.com").await;
    let ledger = LedgerService::new(pool.clone());
    let now = Utc::now();

    ledger
        .create_payment_intent(user_id, 9500, "o1", 1)
        .await
        .unwrap();
    ledger
        .create_payment_intent(user_id, 9500, "o2", 1)
        .await
        .unwrap();

    // Unrecognized statuses and unknown orders are ignored silently.
    assert!(ledger
        .apply_gateway_status("o1", None, "WAITING_FOR_DEPOSIT", now)
        .await
        .unwrap()
        .is_none());
    assert!(ledger
        .apply_gateway_status("missing", None, "DONE", now)
        .await
        .unwrap()
        .is_none());

    let cancelled = ledger
        .apply_gateway_status("o1", None, "CANCELED", now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cancelled.status, STATUS_CANCELLED);
    let failed = ledger
        .apply_gateway_status("o2", None, "FAILED", now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, STATUS_FAILED);

    let profile = ledger.profile_for_user(user_id).await.unwrap();
    assert!(!profile.is_premium(now));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn mark_failed_only_touches_pending_orders(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = create_user(&pool, "fail@example.com").await;
    let ledger = LedgerService::new(pool.clone());
    let now = Utc::now();

    assert!(ledger.mark_failed("missing").await.unwrap().is_none());

    ledger
        .create_payment_intent(user_id, 9500, "o1", 1)
        .await
        .unwrap();
    let failed = ledger.mark_failed("o1").await.unwrap().unwrap();
    assert_eq!(failed.status, STATUS_FAILED);

    ledger
        .create_payment_intent(user_id, 9500, "o2", 1)
        .await
        .unwrap();
    ledger
        .apply_gateway_status("o2", Some("t2"), "DONE", now)
        .await
        .unwrap();
    assert!(ledger.mark_failed("o2").await.unwrap().is_none());
}
