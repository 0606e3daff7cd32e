//! Pending change entity models and DTOs for the change queue.

use adpilot_core::change::{ChangeType, ChangeValue, EntityType};
use adpilot_core::error::CoreError;
use adpilot_core::types::{DbId, TenantId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

use super::status::{ChangeStatus, StatusId};

/// A row from the `pending_changes` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PendingChange {
    pub id: DbId,
    pub tenant_id: TenantId,
    pub entity_id: String,
    pub entity_type: String,
    pub change_type: String,
    pub current_value: Json<ChangeValue>,
    pub requested_value: Json<ChangeValue>,
    pub confidence_score: f64,
    pub jitter_min_ms: i32,
    pub jitter_max_ms: i32,
    pub enqueued_at: Timestamp,
    pub eligible_at: Timestamp,
    pub status_id: StatusId,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub executed_at: Option<Timestamp>,
    pub error_message: Option<String>,
    pub cancel_requested: bool,
    pub reclaim_count: i32,
    pub triggered_by: String,
    pub manual_override: bool,
    pub velocity_check_passed: bool,
    pub requeued_from: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl PendingChange {
    pub fn status(&self) -> Option<ChangeStatus> {
        ChangeStatus::from_id(self.status_id)
    }

    pub fn entity_type(&self) -> Result<EntityType, CoreError> {
        self.entity_type.parse()
    }

    pub fn change_type(&self) -> Result<ChangeType, CoreError> {
        self.change_type.parse()
    }
}

/// DTO for inserting a new pending change. `eligible_at` is computed by the
/// caller from the jitter window before insertion.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePendingChange {
    pub tenant_id: TenantId,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub change_type: ChangeType,
    pub current_value: ChangeValue,
    pub requested_value: ChangeValue,
    pub confidence_score: f64,
    pub jitter_min_ms: i32,
    pub jitter_max_ms: i32,
    pub enqueued_at: Timestamp,
    pub eligible_at: Timestamp,
    pub triggered_by: String,
    pub manual_override: bool,
    pub velocity_check_passed: bool,
    pub requeued_from: Option<DbId>,
}

/// Query parameters for listing a tenant's changes.
#[derive(Debug, Default, Deserialize)]
pub struct PendingChangeQuery {
    pub status_id: Option<StatusId>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Row count per status, for queue depth monitoring.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QueueDepth {
    pub status_id: StatusId,
    pub count: i64,
}
