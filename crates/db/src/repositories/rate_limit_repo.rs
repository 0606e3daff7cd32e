//! Repository for `rate_limit_windows` and `rate_limit_ceilings`.

use adpilot_core::types::{TenantId, Timestamp};
use sqlx::{PgExecutor, PgPool};

use crate::models::rate_limit::{RateLimitCeiling, RateLimitWindow, UpsertRateLimitCeiling};

const WINDOW_COLUMNS: &str =
    "id, tenant_id, job_type, window_start, count, created_at, updated_at";

const CEILING_COLUMNS: &str =
    "id, tenant_id, job_type, max_per_hour, created_at, updated_at";

/// Provides counter operations for hour-aligned rate-limit windows.
pub struct RateLimitRepo;

impl RateLimitRepo {
    /// Configured ceiling for a tenant/job type, if any.
    pub async fn find_ceiling<'e, E>(
        executor: E,
        tenant_id: TenantId,
        job_type: &str,
    ) -> Result<Option<i32>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar::<_, i32>(
            "SELECT max_per_hour FROM rate_limit_ceilings \
             WHERE tenant_id = $1 AND job_type = $2",
        )
        .bind(tenant_id)
        .bind(job_type)
        .fetch_optional(executor)
        .await
    }

    /// Create or replace a ceiling.
    pub async fn upsert_ceiling(
        pool: &PgPool,
        input: &UpsertRateLimitCeiling,
    ) -> Result<RateLimitCeiling, sqlx::Error> {
        let query = format!(
            "INSERT INTO rate_limit_ceilings (tenant_id, job_type, max_per_hour) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (tenant_id, job_type) \
             DO UPDATE SET max_per_hour = EXCLUDED.max_per_hour \
             RETURNING {CEILING_COLUMNS}"
        );
        sqlx::query_as::<_, RateLimitCeiling>(&query)
            .bind(input.tenant_id)
            .bind(&input.job_type)
            .bind(input.max_per_hour)
            .fetch_one(pool)
            .await
    }

    /// Current count in a window; zero if the window has no row yet.
    pub async fn current_count(
        pool: &PgPool,
        tenant_id: TenantId,
        job_type: &str,
        window_start: Timestamp,
    ) -> Result<i64, sqlx::Error> {
        let count: Option<i32> = sqlx::query_scalar(
            "SELECT count FROM rate_limit_windows \
             WHERE tenant_id = $1 AND job_type = $2 AND window_start = $3",
        )
        .bind(tenant_id)
        .bind(job_type)
        .bind(window_start)
        .fetch_optional(pool)
        .await?;
        Ok(count.map(i64::from).unwrap_or(0))
    }

    /// Unconditionally create-or-increment the window counter.
    pub async fn increment<'e, E>(
        executor: E,
        tenant_id: TenantId,
        job_type: &str,
        window_start: Timestamp,
    ) -> Result<RateLimitWindow, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "INSERT INTO rate_limit_windows (tenant_id, job_type, window_start, count) \
             VALUES ($1, $2, $3, 1) \
             ON CONFLICT (tenant_id, job_type, window_start) \
             DO UPDATE SET count = rate_limit_windows.count + 1 \
             RETURNING {WINDOW_COLUMNS}"
        );
        sqlx::query_as::<_, RateLimitWindow>(&query)
            .bind(tenant_id)
            .bind(job_type)
            .bind(window_start)
            .fetch_one(executor)
            .await
    }

    /// Check and increment in one statement.
    ///
    /// The upsert only bumps the counter while it is below `ceiling`, so two
    /// concurrent callers can never push the window past the ceiling. Returns
    /// `None` when the window is full. `ceiling` must be positive.
    ///
    /// Inside a transaction the window row stays locked until commit, and a
    /// rollback returns the slot.
    pub async fn try_acquire<'e, E>(
        executor: E,
        tenant_id: TenantId,
        job_type: &str,
        window_start: Timestamp,
        ceiling: i32,
    ) -> Result<Option<RateLimitWindow>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "INSERT INTO rate_limit_windows (tenant_id, job_type, window_start, count) \
             VALUES ($1, $2, $3, 1) \
             ON CONFLICT (tenant_id, job_type, window_start) \
             DO UPDATE SET count = rate_limit_windows.count + 1 \
             WHERE rate_limit_windows.count < $4 \
             RETURNING {WINDOW_COLUMNS}"
        );
        sqlx::query_as::<_, RateLimitWindow>(&query)
            .bind(tenant_id)
            .bind(job_type)
            .bind(window_start)
            .bind(ceiling)
            .fetch_optional(executor)
            .await
    }

    /// Window row for a key, if created.
    pub async fn find_window(
        pool: &PgPool,
        tenant_id: TenantId,
        job_type: &str,
        window_start: Timestamp,
    ) -> Result<Option<RateLimitWindow>, sqlx::Error> {
        let query = format!(
            "SELECT {WINDOW_COLUMNS} FROM rate_limit_windows \
             WHERE tenant_id = $1 AND job_type = $2 AND window_start = $3"
        );
        sqlx::query_as::<_, RateLimitWindow>(&query)
            .bind(tenant_id)
            .bind(job_type)
            .bind(window_start)
            .fetch_optional(pool)
            .await
    }
}
