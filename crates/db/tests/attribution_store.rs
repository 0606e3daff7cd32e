//! Integration tests for click/conversion storage and candidate lookups.

use adpilot_core::attribution::{AttributionMethod, LayerOutcome};
use adpilot_db::models::attribution_attempt::CreateAttributionAttempt;
use adpilot_db::models::click::CreateClick;
use adpilot_db::models::conversion::{ApplyAttribution, CreateConversion};
use adpilot_db::repositories::{AttributionAttemptRepo, ClickRepo, ConversionRepo};
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn click_at(clicked_at: DateTime<Utc>) -> CreateClick {
    CreateClick {
        tenant_id: 1,
        platform_click_id: None,
        click_id_source: None,
        campaign_id: Some("cmp-1".to_string()),
        ad_id: Some("ad-1".to_string()),
        fingerprint_hash: None,
        fingerprint_components: None,
        network_origin: None,
        device_class: None,
        clicked_at,
        expires_at: clicked_at + TimeDelta::days(7),
    }
}

fn conversion_at(converted_at: DateTime<Utc>) -> CreateConversion {
    CreateConversion {
        tenant_id: 1,
        event_type: "purchase".to_string(),
        value_cents: Some(4_999),
        external_click_id: None,
        fingerprint_hash: None,
        fingerprint_components: None,
        network_origin: None,
        device_class: None,
        converted_at,
    }
}

// ---------------------------------------------------------------------------
// Clicks
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_exact_lookup_honours_expiry(pool: PgPool) {
    let t0 = Utc::now() - TimeDelta::days(10);
    let click = ClickRepo::create(
        &pool,
        &CreateClick {
            platform_click_id: Some("gclid-abc".to_string()),
            ..click_at(t0)
        },
    )
    .await
    .unwrap();
    assert_eq!(click.window(), TimeDelta::days(7));

    // Converted inside the window, matched inside the window.
    let hit = ClickRepo::find_exact(&pool, 1, "gclid-abc", t0 + TimeDelta::hours(1), t0 + TimeDelta::hours(2))
        .await
        .unwrap();
    assert_eq!(hit.map(|c| c.id), Some(click.id));

    // Converted after expiry.
    let late = ClickRepo::find_exact(&pool, 1, "gclid-abc", t0 + TimeDelta::days(8), t0 + TimeDelta::days(8))
        .await
        .unwrap();
    assert!(late.is_none());

    // Converted inside the window but matched after expiry.
    let stale = ClickRepo::find_exact(&pool, 1, "gclid-abc", t0 + TimeDelta::hours(1), Utc::now())
        .await
        .unwrap();
    assert!(stale.is_none());

    // Another tenant's click is never a candidate.
    let other = ClickRepo::find_exact(&pool, 2, "gclid-abc", t0 + TimeDelta::hours(1), t0 + TimeDelta::hours(2))
        .await
        .unwrap();
    assert!(other.is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_fingerprint_candidates_most_recent_first(pool: PgPool) {
    let now = Utc::now();
    let with_hash = |at| CreateClick {
        fingerprint_hash: Some("fp-1".to_string()),
        ..click_at(at)
    };
    let older = ClickRepo::create(&pool, &with_hash(now - TimeDelta::hours(5))).await.unwrap();
    let newer = ClickRepo::create(&pool, &with_hash(now - TimeDelta::hours(1))).await.unwrap();
    // Clicked after the conversion: not a candidate.
    ClickRepo::create(&pool, &with_hash(now + TimeDelta::hours(1))).await.unwrap();

    let candidates = ClickRepo::find_fingerprint_candidates(&pool, 1, "fp-1", now, now)
        .await
        .unwrap();
    let ids: Vec<i64> = candidates.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![newer.id, older.id]);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_probabilistic_candidates_narrowing(pool: PgPool) {
    let now = Utc::now();
    let same_origin = ClickRepo::create(
        &pool,
        &CreateClick {
            network_origin: Some("203.0.113.0/24".to_string()),
            device_class: Some("desktop".to_string()),
            ..click_at(now - TimeDelta::hours(3))
        },
    )
    .await
    .unwrap();
    let near_device = ClickRepo::create(
        &pool,
        &CreateClick {
            network_origin: Some("198.51.100.0/24".to_string()),
            device_class: Some("mobile".to_string()),
            ..click_at(now - TimeDelta::minutes(10))
        },
    )
    .await
    .unwrap();
    // Same device class but far outside the proximity window.
    ClickRepo::create(
        &pool,
        &CreateClick {
            device_class: Some("mobile".to_string()),
            ..click_at(now - TimeDelta::hours(6))
        },
    )
    .await
    .unwrap();

    let candidates = ClickRepo::find_probabilistic_candidates(
        &pool,
        1,
        Some("203.0.113.0/24"),
        Some("mobile"),
        now,
        now,
        1_800,
    )
    .await
    .unwrap();
    let ids: Vec<i64> = candidates.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![near_device.id, same_origin.id]);

    let nothing = ClickRepo::find_probabilistic_candidates(&pool, 1, None, None, now, now, 1_800)
        .await
        .unwrap();
    assert!(nothing.is_empty());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_clicks_are_append_only(pool: PgPool) {
    let click = ClickRepo::create(&pool, &click_at(Utc::now())).await.unwrap();
    let result = sqlx::query("UPDATE clicks SET expires_at = NOW() + INTERVAL '30 days' WHERE id = $1")
        .bind(click.id)
        .execute(&pool)
        .await;
    assert!(result.is_err());
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_apply_attribution_compare_and_swap(pool: PgPool) {
    let now = Utc::now();
    let click = ClickRepo::create(&pool, &click_at(now - TimeDelta::hours(1))).await.unwrap();
    let conversion = ConversionRepo::create(&pool, &conversion_at(now)).await.unwrap();
    assert!(conversion.current_attribution().unwrap().is_none());

    let probabilistic = ApplyAttribution {
        click_id: Some(click.id),
        method: AttributionMethod::Probabilistic,
        confidence: 0.4,
    };
    let applied = ConversionRepo::apply_attribution(&pool, conversion.id, None, &probabilistic)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        applied.current_attribution().unwrap(),
        Some((AttributionMethod::Probabilistic, 0.4))
    );
    assert!(applied.attributed_at.is_some());

    // A writer that still believes the conversion is unattributed loses.
    let lost = ConversionRepo::apply_attribution(&pool, conversion.id, None, &probabilistic)
        .await
        .unwrap();
    assert!(lost.is_none());

    let upgrade = ApplyAttribution {
        click_id: Some(click.id),
        method: AttributionMethod::Exact,
        confidence: 1.0,
    };
    let upgraded = ConversionRepo::apply_attribution(
        &pool,
        conversion.id,
        Some((AttributionMethod::Probabilistic, 0.4)),
        &upgrade,
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(upgraded.attribution_method.as_deref(), Some("exact"));

    let result = ConversionRepo::attribution_result(&pool, conversion.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.attributed_click_id, Some(click.id));
    assert_eq!(result.method.as_deref(), Some("exact"));
    assert_eq!(result.confidence, Some(1.0));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_list_unattributed_and_labels(pool: PgPool) {
    let now = Utc::now();
    let click = ClickRepo::create(&pool, &click_at(now - TimeDelta::hours(2))).await.unwrap();
    let first = ConversionRepo::create(&pool, &conversion_at(now - TimeDelta::hours(1)))
        .await
        .unwrap();
    let second = ConversionRepo::create(&pool, &conversion_at(now)).await.unwrap();

    let queue = ConversionRepo::list_unattributed(&pool, 10).await.unwrap();
    let ids: Vec<i64> = queue.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);

    ConversionRepo::apply_attribution(
        &pool,
        first.id,
        None,
        &ApplyAttribution {
            click_id: Some(click.id),
            method: AttributionMethod::Fingerprint,
            confidence: 0.8,
        },
    )
    .await
    .unwrap()
    .unwrap();
    ConversionRepo::apply_attribution(
        &pool,
        second.id,
        None,
        &ApplyAttribution {
            click_id: None,
            method: AttributionMethod::Unattributed,
            confidence: 0.0,
        },
    )
    .await
    .unwrap()
    .unwrap();

    assert!(ConversionRepo::list_unattributed(&pool, 10).await.unwrap().is_empty());

    let labels = ConversionRepo::list_training_labels(&pool, Some(1), 0.5, 100)
        .await
        .unwrap();
    assert_eq!(labels.len(), 1);
    assert_eq!(labels[0].conversion_id, first.id);
    assert_eq!(labels[0].click_id, click.id);
    assert_eq!(labels[0].campaign_id.as_deref(), Some("cmp-1"));

    let strict = ConversionRepo::list_training_labels(&pool, None, 0.9, 100)
        .await
        .unwrap();
    assert!(strict.is_empty());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_recovery_stats(pool: PgPool) {
    let now = Utc::now();
    let click = ClickRepo::create(&pool, &click_at(now - TimeDelta::hours(1))).await.unwrap();
    let conversion = ConversionRepo::create(&pool, &conversion_at(now)).await.unwrap();

    let attempt = |method: AttributionMethod, click_id: Option<i64>| CreateAttributionAttempt {
        conversion_id: conversion.id,
        exact_outcome: LayerOutcome::Missed,
        fingerprint_outcome: LayerOutcome::Skipped,
        probabilistic_outcome: if matches!(method, AttributionMethod::Probabilistic) {
            LayerOutcome::Matched
        } else {
            LayerOutcome::Missed
        },
        matched_method: method,
        matched_click_id: click_id,
        confidence: 0.0,
        applied: false,
        latency_ms: 3,
    };
    AttributionAttemptRepo::insert(&pool, &attempt(AttributionMethod::Unattributed, None))
        .await
        .unwrap();
    AttributionAttemptRepo::insert(&pool, &attempt(AttributionMethod::Probabilistic, Some(click.id)))
        .await
        .unwrap();

    let logged = AttributionAttemptRepo::list_for_conversion(&pool, conversion.id)
        .await
        .unwrap();
    assert_eq!(logged.len(), 2);
    assert_eq!(logged[0].exact_outcome, "missed");

    let stats = AttributionAttemptRepo::recovery_stats(
        &pool,
        now - TimeDelta::hours(1),
        Utc::now() + TimeDelta::hours(1),
    )
    .await
    .unwrap();
    assert_eq!(stats.attempts, 2);
    assert_eq!(stats.probabilistic, 1);
    assert_eq!(stats.unattributed, 1);
    assert!((stats.recovery_rate() - 0.5).abs() < f64::EPSILON);

    // Exact ran and missed twice; fingerprint never ran; probabilistic ran
    // twice and matched once.
    assert_eq!((stats.exact_attempted, stats.exact_matched), (2, 0));
    assert_eq!((stats.fingerprint_attempted, stats.fingerprint_matched), (0, 0));
    assert_eq!((stats.probabilistic_attempted, stats.probabilistic_matched), (2, 1));
    assert_eq!(stats.layer_recovery_rate(AttributionMethod::Exact), Some(0.0));
    assert_eq!(stats.layer_recovery_rate(AttributionMethod::Fingerprint), Some(0.0));
    assert_eq!(stats.layer_recovery_rate(AttributionMethod::Probabilistic), Some(0.5));
    assert_eq!(stats.layer_recovery_rate(AttributionMethod::Unattributed), None);
}
