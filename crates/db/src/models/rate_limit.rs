//! Rate-limit window and ceiling models.

use adpilot_core::types::{DbId, TenantId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from `rate_limit_windows`: one per (tenant, job type, hour).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RateLimitWindow {
    pub id: DbId,
    pub tenant_id: TenantId,
    pub job_type: String,
    pub window_start: Timestamp,
    pub count: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A row from `rate_limit_ceilings`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RateLimitCeiling {
    pub id: DbId,
    pub tenant_id: TenantId,
    pub job_type: String,
    /// Zero means unlimited.
    pub max_per_hour: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for setting a ceiling.
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertRateLimitCeiling {
    pub tenant_id: TenantId,
    pub job_type: String,
    pub max_per_hour: i32,
}
