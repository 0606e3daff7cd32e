//! Per-tenant, per-job-type hourly rate limiting.

use adpilot_core::error::CoreError;
use adpilot_core::rate_limit;
use adpilot_core::types::{TenantId, Timestamp};
use adpilot_db::models::rate_limit::{RateLimitCeiling, RateLimitWindow, UpsertRateLimitCeiling};
use adpilot_db::repositories::RateLimitRepo;
use chrono::Utc;
use sqlx::{PgConnection, PgPool};

use crate::error::EngineResult;

/// Hour-aligned counters backed by `rate_limit_windows`.
#[derive(Clone)]
pub struct RateLimiter {
    pool: PgPool,
}

impl RateLimiter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// True if one more job fits in the current window.
    ///
    /// Advisory only: another caller may take the last slot between this
    /// check and an [`increment`](Self::increment). Use
    /// [`try_acquire`](Self::try_acquire) to gate work.
    pub async fn check_limit(&self, tenant_id: TenantId, job_type: &str) -> EngineResult<bool> {
        self.check_limit_at(tenant_id, job_type, Utc::now()).await
    }

    pub async fn check_limit_at(
        &self,
        tenant_id: TenantId,
        job_type: &str,
        at: Timestamp,
    ) -> EngineResult<bool> {
        let ceiling = RateLimitRepo::find_ceiling(&self.pool, tenant_id, job_type).await?;
        if rate_limit::is_unlimited(ceiling) {
            return Ok(true);
        }
        let start = rate_limit::window_start(at)?;
        let count = RateLimitRepo::current_count(&self.pool, tenant_id, job_type, start).await?;
        Ok(rate_limit::allows(count, ceiling))
    }

    /// Create-or-increment the current window counter unconditionally.
    pub async fn increment(
        &self,
        tenant_id: TenantId,
        job_type: &str,
    ) -> EngineResult<RateLimitWindow> {
        let start = rate_limit::window_start(Utc::now())?;
        Ok(RateLimitRepo::increment(&self.pool, tenant_id, job_type, start).await?)
    }

    /// Check and increment as one atomic step.
    ///
    /// Returns `false` without touching the counter when the window is full.
    /// Unlimited keys are still counted.
    pub async fn try_acquire(&self, tenant_id: TenantId, job_type: &str) -> EngineResult<bool> {
        let mut tx = self.pool.begin().await?;
        let acquired = self.try_acquire_in(&mut *tx, tenant_id, job_type).await?;
        tx.commit().await?;
        Ok(acquired)
    }

    /// [`try_acquire`](Self::try_acquire) on a caller's connection.
    ///
    /// Run inside a transaction so the slot is only spent if the work it
    /// gates commits too.
    pub async fn try_acquire_in(
        &self,
        conn: &mut PgConnection,
        tenant_id: TenantId,
        job_type: &str,
    ) -> EngineResult<bool> {
        let start = rate_limit::window_start(Utc::now())?;
        match RateLimitRepo::find_ceiling(&mut *conn, tenant_id, job_type).await? {
            Some(ceiling) if ceiling > 0 => {
                let acquired =
                    RateLimitRepo::try_acquire(&mut *conn, tenant_id, job_type, start, ceiling)
                        .await?;
                Ok(acquired.is_some())
            }
            _ => {
                RateLimitRepo::increment(&mut *conn, tenant_id, job_type, start).await?;
                Ok(true)
            }
        }
    }

    /// Jobs counted so far in the current window.
    pub async fn current_count(&self, tenant_id: TenantId, job_type: &str) -> EngineResult<i64> {
        let start = rate_limit::window_start(Utc::now())?;
        Ok(RateLimitRepo::current_count(&self.pool, tenant_id, job_type, start).await?)
    }

    /// Set the hourly ceiling for a key. Zero means unlimited.
    pub async fn set_ceiling(
        &self,
        tenant_id: TenantId,
        job_type: &str,
        max_per_hour: i32,
    ) -> EngineResult<RateLimitCeiling> {
        if max_per_hour < 0 {
            return Err(CoreError::Validation(format!(
                "max_per_hour must not be negative, got {max_per_hour}"
            ))
            .into());
        }
        let input = UpsertRateLimitCeiling {
            tenant_id,
            job_type: job_type.to_string(),
            max_per_hour,
        };
        let ceiling = RateLimitRepo::upsert_ceiling(&self.pool, &input).await?;
        tracing::info!(tenant_id, job_type, max_per_hour, "Rate limit ceiling set");
        Ok(ceiling)
    }
}
