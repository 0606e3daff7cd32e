//! Integration tests for hour-aligned rate-limit windows.

use adpilot_core::rate_limit::window_start;
use adpilot_db::models::rate_limit::UpsertRateLimitCeiling;
use adpilot_db::repositories::RateLimitRepo;
use chrono::{TimeDelta, Utc};
use sqlx::PgPool;

const JOB: &str = "budget_change";

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_ceiling_upsert_replaces(pool: PgPool) {
    assert_eq!(RateLimitRepo::find_ceiling(&pool, 1, JOB).await.unwrap(), None);

    let input = UpsertRateLimitCeiling {
        tenant_id: 1,
        job_type: JOB.to_string(),
        max_per_hour: 15,
    };
    RateLimitRepo::upsert_ceiling(&pool, &input).await.unwrap();
    let updated = RateLimitRepo::upsert_ceiling(
        &pool,
        &UpsertRateLimitCeiling {
            max_per_hour: 20,
            ..input
        },
    )
    .await
    .unwrap();

    assert_eq!(updated.max_per_hour, 20);
    assert_eq!(RateLimitRepo::find_ceiling(&pool, 1, JOB).await.unwrap(), Some(20));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_increment_creates_then_counts(pool: PgPool) {
    let start = window_start(Utc::now()).unwrap();
    assert_eq!(RateLimitRepo::current_count(&pool, 1, JOB, start).await.unwrap(), 0);

    let first = RateLimitRepo::increment(&pool, 1, JOB, start).await.unwrap();
    assert_eq!(first.count, 1);
    let second = RateLimitRepo::increment(&pool, 1, JOB, start).await.unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.count, 2);

    // The next hour is a separate window.
    let next = start + TimeDelta::hours(1);
    assert_eq!(RateLimitRepo::current_count(&pool, 1, JOB, next).await.unwrap(), 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_try_acquire_stops_at_ceiling(pool: PgPool) {
    let start = window_start(Utc::now()).unwrap();

    for _ in 0..3 {
        let acquired = RateLimitRepo::try_acquire(&pool, 1, JOB, start, 3).await.unwrap();
        assert!(acquired.is_some());
    }
    let refused = RateLimitRepo::try_acquire(&pool, 1, JOB, start, 3).await.unwrap();
    assert!(refused.is_none());

    let window = RateLimitRepo::find_window(&pool, 1, JOB, start).await.unwrap().unwrap();
    assert_eq!(window.count, 3);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_concurrent_acquire_never_exceeds_ceiling(pool: PgPool) {
    let start = window_start(Utc::now()).unwrap();

    let attempts = (0..20).map(|_| {
        let pool = pool.clone();
        async move { RateLimitRepo::try_acquire(&pool, 1, JOB, start, 15).await.unwrap() }
    });
    let granted = futures::future::join_all(attempts)
        .await
        .into_iter()
        .filter(Option::is_some)
        .count();

    assert_eq!(granted, 15);
    assert_eq!(RateLimitRepo::current_count(&pool, 1, JOB, start).await.unwrap(), 15);
}
