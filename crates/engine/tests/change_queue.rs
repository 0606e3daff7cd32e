//! Integration tests for the change queue service: the safety gate, jitter,
//! rate limiting, claim/complete with audit, cancellation, reaping and
//! requeue.

use std::time::Duration;

use adpilot_core::change::{
    ChangeType, ChangeValue, DeliveryStatus, EnqueueRequest, EntityType, ExecutionResult,
};
use adpilot_core::error::CoreError;
use adpilot_db::models::status::ChangeStatus;
use adpilot_engine::change_queue::{CancelOutcome, ReapPolicy};
use adpilot_engine::{ChangeQueue, EngineError, RejectionReason};
use assert_matches::assert_matches;
use chrono::TimeDelta;
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn budget_request(tenant_id: i64, from: i64, to: i64) -> EnqueueRequest {
    EnqueueRequest {
        tenant_id,
        entity_id: "cmp-1".to_string(),
        entity_type: EntityType::Campaign,
        change_type: ChangeType::Budget,
        current_value: ChangeValue::Budget { amount_cents: from },
        requested_value: ChangeValue::Budget { amount_cents: to },
        confidence_score: 0.9,
        jitter_min_ms: 0,
        jitter_max_ms: 0,
        triggered_by: "thompson-v2".to_string(),
        manual_override: false,
        requeued_from: None,
    }
}

fn pause_request(tenant_id: i64) -> EnqueueRequest {
    EnqueueRequest {
        entity_id: "ad-9".to_string(),
        entity_type: EntityType::Ad,
        change_type: ChangeType::Status,
        current_value: ChangeValue::Status {
            status: DeliveryStatus::Active,
        },
        requested_value: ChangeValue::Status {
            status: DeliveryStatus::Paused,
        },
        ..budget_request(tenant_id, 0, 0)
    }
}

/// Enqueue with zero jitter and claim it straight away.
async fn enqueue_and_claim(queue: &ChangeQueue, worker_id: &str) -> i64 {
    let change = queue.enqueue(&budget_request(1, 10_000, 11_000)).await.unwrap();
    let claimed = queue.claim(worker_id).await.unwrap().unwrap();
    assert_eq!(claimed.id, change.id);
    change.id
}

async fn age_claim(pool: &PgPool, id: i64, secs: f64) {
    sqlx::query(
        "UPDATE pending_changes \
         SET claimed_at = claimed_at - make_interval(secs => $2) WHERE id = $1",
    )
    .bind(id)
    .bind(secs)
    .execute(pool)
    .await
    .unwrap();
}

// ---------------------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_eligible_at_within_jitter_window(pool: PgPool) {
    let queue = ChangeQueue::new(pool);
    let request = EnqueueRequest {
        jitter_min_ms: 3_000,
        jitter_max_ms: 18_000,
        ..budget_request(1, 10_000, 12_000)
    };

    for _ in 0..10 {
        let change = queue.enqueue(&request).await.unwrap();
        let delay = change.eligible_at - change.enqueued_at;
        // Stored timestamps have microsecond precision.
        let slack = TimeDelta::microseconds(1);
        assert!(delay >= TimeDelta::milliseconds(3_000) - slack, "{delay:?} below min");
        assert!(delay <= TimeDelta::milliseconds(18_000) + slack, "{delay:?} above max");
        assert_eq!(change.jitter_min_ms, 3_000);
        assert_eq!(change.jitter_max_ms, 18_000);
        assert_eq!(change.status(), Some(ChangeStatus::Pending));
    }

    // Nothing is eligible before the minimum jitter has passed.
    assert!(queue.claim("w1").await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_invalid_request_is_validation_error(pool: PgPool) {
    let queue = ChangeQueue::new(pool);
    let request = EnqueueRequest {
        jitter_min_ms: 5_000,
        jitter_max_ms: 1_000,
        ..budget_request(1, 100, 100)
    };
    let err = queue.enqueue(&request).await.unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::Validation(_)));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_velocity_violation_rejected_and_audited(pool: PgPool) {
    let queue = ChangeQueue::new(pool);

    // +100% against the default 50% budget cap.
    let err = queue
        .enqueue(&budget_request(1, 10_000, 20_000))
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::Rejected(RejectionReason::SafetyCheck));
    assert_eq!(err.to_string(), "rejected: safety_check");

    let history = queue.history(&Default::default()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, "rejected");
    assert_eq!(history[0].rejection_reason.as_deref(), Some("safety_check"));
    assert_eq!(history[0].velocity_check_passed, Some(false));
    assert!(history[0].change_id.is_none());

    // No slot was consumed by the rejected proposal.
    let count = queue.rate_limiter().current_count(1, "budget_change").await.unwrap();
    assert_eq!(count, 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_manual_override_skips_safety(pool: PgPool) {
    let queue = ChangeQueue::new(pool);
    let request = EnqueueRequest {
        manual_override: true,
        confidence_score: 0.1,
        ..budget_request(1, 10_000, 40_000)
    };
    let change = queue.enqueue(&request).await.unwrap();
    assert!(change.manual_override);
    assert!(!change.velocity_check_passed);

    // The worker-side re-check honours the override too.
    assert!(queue.recheck_safety(&change).is_ok());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_sixteenth_enqueue_hits_rate_limit(pool: PgPool) {
    let queue = ChangeQueue::new(pool);
    queue
        .rate_limiter()
        .set_ceiling(1, "budget_change", 15)
        .await
        .unwrap();

    for _ in 0..15 {
        queue.enqueue(&budget_request(1, 10_000, 11_000)).await.unwrap();
    }
    let err = queue
        .enqueue(&budget_request(1, 10_000, 11_000))
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::Rejected(RejectionReason::RateLimit));
    assert_eq!(err.to_string(), "rejected: rate_limit");

    assert!(!queue.rate_limiter().check_limit(1, "budget_change").await.unwrap());
    // Other job types and tenants have their own windows.
    queue.enqueue(&pause_request(1)).await.unwrap();
    queue.enqueue(&budget_request(2, 10_000, 11_000)).await.unwrap();

    let history = queue.history(&Default::default()).await.unwrap();
    let rejected: Vec<_> = history.iter().filter(|h| h.outcome == "rejected").collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].rate_limit_passed, Some(false));
    assert_eq!(rejected[0].rejection_reason.as_deref(), Some("rate_limit"));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_concurrent_enqueues_respect_ceiling(pool: PgPool) {
    let queue = ChangeQueue::new(pool);
    queue
        .rate_limiter()
        .set_ceiling(1, "budget_change", 5)
        .await
        .unwrap();

    let attempts = (0..12).map(|_| {
        let queue = queue.clone();
        async move { queue.enqueue(&budget_request(1, 10_000, 11_000)).await }
    });
    let results = futures::future::join_all(attempts).await;

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(EngineError::Rejected(RejectionReason::RateLimit))))
        .count();
    assert_eq!(accepted, 5);
    assert_eq!(rejected, 7);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_failed_insert_returns_rate_limit_slot(pool: PgPool) {
    let queue = ChangeQueue::new(pool);
    queue
        .rate_limiter()
        .set_ceiling(1, "budget_change", 1)
        .await
        .unwrap();

    // The foreign key on requeued_from fails the insert after the slot is
    // taken.
    let dangling = EnqueueRequest {
        requeued_from: Some(999_999),
        ..budget_request(1, 10_000, 11_000)
    };
    let err = queue.enqueue(&dangling).await.unwrap_err();
    assert_matches!(err, EngineError::Database(_));
    assert_eq!(
        queue.rate_limiter().current_count(1, "budget_change").await.unwrap(),
        0
    );
    assert!(queue.history(&Default::default()).await.unwrap().is_empty());

    queue.enqueue(&budget_request(1, 10_000, 11_000)).await.unwrap();
    assert_eq!(
        queue.rate_limiter().current_count(1, "budget_change").await.unwrap(),
        1
    );
}

// ---------------------------------------------------------------------------
// Claim and complete
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_two_workers_claim_single_change(pool: PgPool) {
    let queue = ChangeQueue::new(pool);
    let change = queue.enqueue(&budget_request(1, 10_000, 11_000)).await.unwrap();

    let (a, b) = tokio::join!(queue.claim("w1"), queue.claim("w2"));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.is_some() != b.is_some(), "exactly one worker receives the change");
    let winner = a.or(b).unwrap();
    assert_eq!(winner.id, change.id);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_complete_appends_history(pool: PgPool) {
    let queue = ChangeQueue::new(pool);
    let id = enqueue_and_claim(&queue, "w1").await;

    let executing = queue.mark_executing(id, "w1").await.unwrap().unwrap();
    assert_eq!(executing.status(), Some(ChangeStatus::Executing));

    let record = queue
        .complete("w1", &ExecutionResult::completed(id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.change_id, Some(id));
    assert_eq!(record.outcome, "completed");
    assert_eq!(record.executed_by.as_deref(), Some("w1"));
    assert_eq!(record.rate_limit_passed, Some(true));
    assert!(record.started_at.is_some());
    assert!(record.completed_at.is_some());

    let change = queue.find(id).await.unwrap();
    assert_eq!(change.status(), Some(ChangeStatus::Completed));
    assert!(change.executed_at.is_some());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_failed_execution_recorded(pool: PgPool) {
    let queue = ChangeQueue::new(pool);
    let id = enqueue_and_claim(&queue, "w1").await;

    let record = queue
        .complete("w1", &ExecutionResult::failed(id, "platform returned 500"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.outcome, "failed");
    assert_eq!(record.error_message.as_deref(), Some("platform returned 500"));

    let change = queue.find(id).await.unwrap();
    assert_eq!(change.status(), Some(ChangeStatus::Failed));
    assert_eq!(change.error_message.as_deref(), Some("platform returned 500"));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_reaped_worker_cannot_complete(pool: PgPool) {
    let queue = ChangeQueue::new(pool.clone());
    let id = enqueue_and_claim(&queue, "w1").await;
    age_claim(&pool, id, 600.0).await;

    let summary = queue.reap(&ReapPolicy::default()).await.unwrap();
    assert_eq!(summary.reverted, vec![id]);
    assert!(summary.failed.is_empty());

    let reclaimed = queue.claim("w2").await.unwrap().unwrap();
    assert_eq!(reclaimed.id, id);
    assert_eq!(reclaimed.reclaim_count, 1);

    let late = queue.complete("w1", &ExecutionResult::completed(id)).await.unwrap();
    assert!(late.is_none());
    assert!(queue.history_for_change(id).await.unwrap().is_empty());

    queue
        .complete("w2", &ExecutionResult::completed(id))
        .await
        .unwrap()
        .unwrap();
    let history = queue.history_for_change(id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].executed_by.as_deref(), Some("w2"));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_reaper_fails_after_max_reclaims(pool: PgPool) {
    let queue = ChangeQueue::new(pool.clone());
    let policy = ReapPolicy {
        claim_timeout: Duration::from_secs(60),
        execution_timeout: Duration::from_secs(60),
        max_reclaims: 1,
    };
    let id = enqueue_and_claim(&queue, "w1").await;
    age_claim(&pool, id, 120.0).await;
    assert_eq!(queue.reap(&policy).await.unwrap().reverted, vec![id]);

    queue.claim("w2").await.unwrap().unwrap();
    age_claim(&pool, id, 120.0).await;
    let summary = queue.reap(&policy).await.unwrap();
    assert_eq!(summary.failed, vec![id]);
    assert!(summary.reverted.is_empty());

    let change = queue.find(id).await.unwrap();
    assert_eq!(change.status(), Some(ChangeStatus::Failed));
    assert_eq!(change.error_message.as_deref(), Some("reclaim_limit"));
    let history = queue.history_for_change(id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].error_message.as_deref(), Some("reclaim_limit"));
}

// ---------------------------------------------------------------------------
// Cancel and requeue
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_cancel_by_state(pool: PgPool) {
    let queue = ChangeQueue::new(pool);

    let pending = queue
        .enqueue(&EnqueueRequest {
            jitter_min_ms: 600_000,
            jitter_max_ms: 600_000,
            ..budget_request(1, 10_000, 11_000)
        })
        .await
        .unwrap();
    let outcome = queue.cancel(pending.id).await.unwrap();
    assert_matches!(outcome, CancelOutcome::Cancelled(ref c) if c.error_message.as_deref() == Some("cancelled"));

    let again = queue.cancel(pending.id).await.unwrap();
    assert_matches!(again, CancelOutcome::AlreadyTerminal(_));

    let in_flight = enqueue_and_claim(&queue, "w1").await;
    let outcome = queue.cancel(in_flight).await.unwrap();
    assert_matches!(outcome, CancelOutcome::CancelRequested(_));
    assert!(queue.is_cancel_requested(in_flight).await.unwrap());

    let missing = queue.cancel(999_999).await.unwrap_err();
    assert_matches!(missing, EngineError::Core(CoreError::NotFound { .. }));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_requeue_failed_change(pool: PgPool) {
    let queue = ChangeQueue::new(pool);
    let id = enqueue_and_claim(&queue, "w1").await;

    let not_failed = queue.requeue(id, "operator").await.unwrap_err();
    assert_matches!(not_failed, EngineError::Core(CoreError::Validation(_)));

    queue
        .complete("w1", &ExecutionResult::failed(id, "timeout"))
        .await
        .unwrap()
        .unwrap();

    let requeued = queue.requeue(id, "operator").await.unwrap();
    assert_ne!(requeued.id, id);
    assert_eq!(requeued.requeued_from, Some(id));
    assert_eq!(requeued.triggered_by, "operator");
    assert_eq!(requeued.status(), Some(ChangeStatus::Pending));
    assert_eq!(requeued.requested_value.0, ChangeValue::Budget { amount_cents: 11_000 });
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_failed_change_requeued_once(pool: PgPool) {
    let queue = ChangeQueue::new(pool);
    let id = enqueue_and_claim(&queue, "w1").await;
    queue
        .complete("w1", &ExecutionResult::failed(id, "timeout"))
        .await
        .unwrap()
        .unwrap();

    queue.requeue(id, "operator").await.unwrap();
    let counted = queue.rate_limiter().current_count(1, "budget_change").await.unwrap();

    let again = queue.requeue(id, "operator").await.unwrap_err();
    assert_matches!(again, EngineError::Core(CoreError::Conflict(_)));
    assert_eq!(
        queue.rate_limiter().current_count(1, "budget_change").await.unwrap(),
        counted
    );

    let pending = queue
        .list(1, &Default::default())
        .await
        .unwrap()
        .into_iter()
        .filter(|c| c.requeued_from == Some(id))
        .count();
    assert_eq!(pending, 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_safety_recheck_uses_current_policy(pool: PgPool) {
    use adpilot_core::safety::SafetyPolicy;

    let lenient = ChangeQueue::new(pool.clone());
    let change = lenient.enqueue(&budget_request(1, 10_000, 14_000)).await.unwrap();

    let strict = ChangeQueue::new(pool).with_safety_policy(SafetyPolicy {
        max_budget_change_pct: 10.0,
        ..SafetyPolicy::default()
    });
    assert!(lenient.recheck_safety(&change).is_ok());
    assert!(strict.recheck_safety(&change).is_err());
}
