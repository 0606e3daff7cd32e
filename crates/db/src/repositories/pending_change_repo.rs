//! Repository for the `pending_changes` table.
//!
//! Uses `ChangeStatus` from `models::status` for every status literal.
//! Every state transition is a single conditional `UPDATE ... RETURNING`,
//! so a row is never observed in two states by two workers.

use adpilot_core::types::{DbId, TenantId};
use sqlx::{PgExecutor, PgPool};

use crate::models::pending_change::{
    CreatePendingChange, PendingChange, PendingChangeQuery, QueueDepth,
};
use crate::models::status::ChangeStatus;

/// Column list for `pending_changes` queries.
const COLUMNS: &str = "\
    id, tenant_id, entity_id, entity_type, change_type, \
    current_value, requested_value, confidence_score, \
    jitter_min_ms, jitter_max_ms, enqueued_at, eligible_at, \
    status_id, claimed_by, claimed_at, started_at, executed_at, \
    error_message, cancel_requested, reclaim_count, \
    triggered_by, manual_override, velocity_check_passed, requeued_from, \
    created_at, updated_at";

/// Staleness predicate shared by the reaper queries.
///
/// `$1` is the claim timeout and `$2` the execution timeout, both in seconds.
fn stale_predicate() -> String {
    format!(
        "((status_id = {} AND claimed_at < NOW() - make_interval(secs => $1)) \
         OR (status_id = {} AND started_at < NOW() - make_interval(secs => $2)))",
        ChangeStatus::Claimed.id(),
        ChangeStatus::Executing.id(),
    )
}

/// Maximum page size for listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for listing.
const DEFAULT_LIMIT: i64 = 50;

/// Provides queue operations for pending changes.
pub struct PendingChangeRepo;

impl PendingChangeRepo {
    /// Insert a new pending change.
    pub async fn create<'e, E>(
        executor: E,
        input: &CreatePendingChange,
    ) -> Result<PendingChange, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "INSERT INTO pending_changes \
                 (tenant_id, entity_id, entity_type, change_type, \
                  current_value, requested_value, confidence_score, \
                  jitter_min_ms, jitter_max_ms, enqueued_at, eligible_at, \
                  status_id, triggered_by, manual_override, velocity_check_passed, \
                  requeued_from) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PendingChange>(&query)
            .bind(input.tenant_id)
            .bind(&input.entity_id)
            .bind(input.entity_type.as_str())
            .bind(input.change_type.as_str())
            .bind(input.current_value.to_json())
            .bind(input.requested_value.to_json())
            .bind(input.confidence_score)
            .bind(input.jitter_min_ms)
            .bind(input.jitter_max_ms)
            .bind(input.enqueued_at)
            .bind(input.eligible_at)
            .bind(ChangeStatus::Pending.id())
            .bind(&input.triggered_by)
            .bind(input.manual_override)
            .bind(input.velocity_check_passed)
            .bind(input.requeued_from)
            .fetch_one(executor)
            .await
    }

    /// Atomically claim the oldest eligible pending change for a worker.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so a worker never waits on a row
    /// another worker is mid-claim on; it takes the next eligible row
    /// instead. Returns `None` when nothing is eligible.
    pub async fn claim_next(
        pool: &PgPool,
        worker_id: &str,
    ) -> Result<Option<PendingChange>, sqlx::Error> {
        let query = format!(
            "UPDATE pending_changes \
             SET status_id = $2, claimed_by = $1, claimed_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM pending_changes \
                 WHERE status_id = $3 AND eligible_at <= NOW() \
                 ORDER BY eligible_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             AND status_id = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PendingChange>(&query)
            .bind(worker_id)
            .bind(ChangeStatus::Claimed.id())
            .bind(ChangeStatus::Pending.id())
            .fetch_optional(pool)
            .await
    }

    /// `claimed -> executing`, only for the worker holding the claim.
    ///
    /// Returns `None` if the claim was lost (reaped or never held).
    pub async fn mark_executing(
        pool: &PgPool,
        change_id: DbId,
        worker_id: &str,
    ) -> Result<Option<PendingChange>, sqlx::Error> {
        let query = format!(
            "UPDATE pending_changes \
             SET status_id = $3, started_at = NOW() \
             WHERE id = $1 AND claimed_by = $2 AND status_id = $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PendingChange>(&query)
            .bind(change_id)
            .bind(worker_id)
            .bind(ChangeStatus::Executing.id())
            .bind(ChangeStatus::Claimed.id())
            .fetch_optional(pool)
            .await
    }

    /// Move a claimed or executing change owned by `worker_id` to a terminal
    /// status. Returns `None` if the worker no longer owns the change.
    pub async fn finish<'e, E>(
        executor: E,
        change_id: DbId,
        worker_id: &str,
        status: ChangeStatus,
        error_message: Option<&str>,
    ) -> Result<Option<PendingChange>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "UPDATE pending_changes \
             SET status_id = $3, executed_at = NOW(), error_message = $4 \
             WHERE id = $1 AND claimed_by = $2 AND status_id IN ($5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PendingChange>(&query)
            .bind(change_id)
            .bind(worker_id)
            .bind(status.id())
            .bind(error_message)
            .bind(ChangeStatus::Claimed.id())
            .bind(ChangeStatus::Executing.id())
            .fetch_optional(executor)
            .await
    }

    /// Fail a change that is still pending with the given reason.
    ///
    /// Returns `None` if the change is not pending.
    pub async fn cancel_pending<'e, E>(
        executor: E,
        change_id: DbId,
        reason: &str,
    ) -> Result<Option<PendingChange>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "UPDATE pending_changes \
             SET status_id = $2, executed_at = NOW(), error_message = $3 \
             WHERE id = $1 AND status_id = $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PendingChange>(&query)
            .bind(change_id)
            .bind(ChangeStatus::Failed.id())
            .bind(reason)
            .bind(ChangeStatus::Pending.id())
            .fetch_optional(executor)
            .await
    }

    /// Flag an in-flight change for advisory cancellation.
    ///
    /// Returns `None` if the change is not claimed or executing.
    pub async fn request_cancel(
        pool: &PgPool,
        change_id: DbId,
    ) -> Result<Option<PendingChange>, sqlx::Error> {
        let query = format!(
            "UPDATE pending_changes SET cancel_requested = true \
             WHERE id = $1 AND status_id IN ($2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PendingChange>(&query)
            .bind(change_id)
            .bind(ChangeStatus::Claimed.id())
            .bind(ChangeStatus::Executing.id())
            .fetch_optional(pool)
            .await
    }

    /// Fresh read of the advisory cancellation flag.
    pub async fn is_cancel_requested(pool: &PgPool, change_id: DbId) -> Result<bool, sqlx::Error> {
        let flag: Option<bool> =
            sqlx::query_scalar("SELECT cancel_requested FROM pending_changes WHERE id = $1")
                .bind(change_id)
                .fetch_optional(pool)
                .await?;
        Ok(flag.unwrap_or(false))
    }

    /// Fail stale in-flight changes that have already been reclaimed
    /// `max_reclaims` times.
    pub async fn fail_exhausted<'e, E>(
        executor: E,
        claim_timeout_secs: f64,
        execution_timeout_secs: f64,
        max_reclaims: i32,
        reason: &str,
    ) -> Result<Vec<PendingChange>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let stale = stale_predicate();
        let query = format!(
            "UPDATE pending_changes \
             SET status_id = $4, executed_at = NOW(), error_message = $5 \
             WHERE {stale} AND reclaim_count >= $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PendingChange>(&query)
            .bind(claim_timeout_secs)
            .bind(execution_timeout_secs)
            .bind(max_reclaims)
            .bind(ChangeStatus::Failed.id())
            .bind(reason)
            .fetch_all(executor)
            .await
    }

    /// Return stale claimed/executing changes to `pending`.
    ///
    /// This is the only path from an owned state back to `pending`. The
    /// original `eligible_at` is kept; jitter is never redrawn here.
    pub async fn revert_stale(
        pool: &PgPool,
        claim_timeout_secs: f64,
        execution_timeout_secs: f64,
        max_reclaims: i32,
    ) -> Result<Vec<PendingChange>, sqlx::Error> {
        let stale = stale_predicate();
        let query = format!(
            "UPDATE pending_changes \
             SET status_id = $4, claimed_by = NULL, claimed_at = NULL, \
                 started_at = NULL, reclaim_count = reclaim_count + 1 \
             WHERE {stale} AND reclaim_count < $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PendingChange>(&query)
            .bind(claim_timeout_secs)
            .bind(execution_timeout_secs)
            .bind(max_reclaims)
            .bind(ChangeStatus::Pending.id())
            .fetch_all(pool)
            .await
    }

    /// Find a change by its ID.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<PendingChange>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM pending_changes WHERE id = $1");
        sqlx::query_as::<_, PendingChange>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List a tenant's changes, newest first, with optional status filter.
    pub async fn list_by_tenant(
        pool: &PgPool,
        tenant_id: TenantId,
        params: &PendingChangeQuery,
    ) -> Result<Vec<PendingChange>, sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let offset = params.offset.unwrap_or(0);

        let status_clause = if params.status_id.is_some() {
            "AND status_id = $4"
        } else {
            ""
        };
        let query = format!(
            "SELECT {COLUMNS} FROM pending_changes \
             WHERE tenant_id = $1 {status_clause} \
             ORDER BY enqueued_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );

        let mut q = sqlx::query_as::<_, PendingChange>(&query)
            .bind(tenant_id)
            .bind(limit)
            .bind(offset);
        if let Some(sid) = params.status_id {
            q = q.bind(sid);
        }
        q.fetch_all(pool).await
    }

    /// Count changes per status.
    pub async fn queue_depth(pool: &PgPool) -> Result<Vec<QueueDepth>, sqlx::Error> {
        sqlx::query_as::<_, QueueDepth>(
            "SELECT status_id, COUNT(*)::BIGINT AS count \
             FROM pending_changes GROUP BY status_id ORDER BY status_id",
        )
        .fetch_all(pool)
        .await
    }
}
