//! Change history audit models (append-only; no `updated_at`).

use adpilot_core::change::{ChangeValue, HistoryOutcome};
use adpilot_core::types::{DbId, TenantId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

use super::pending_change::PendingChange;

/// A single audit entry. Immutable once created.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChangeHistoryRecord {
    pub id: DbId,
    pub change_id: Option<DbId>,
    pub tenant_id: TenantId,
    pub entity_id: String,
    pub entity_type: String,
    pub change_type: String,
    pub old_value: Json<ChangeValue>,
    pub new_value: Json<ChangeValue>,
    pub outcome: String,
    pub triggered_by: String,
    pub executed_by: Option<String>,
    pub rate_limit_passed: Option<bool>,
    pub velocity_check_passed: Option<bool>,
    pub manual_override: bool,
    pub rejection_reason: Option<String>,
    pub error_message: Option<String>,
    pub queued_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

/// DTO for appending an audit entry.
#[derive(Debug, Clone)]
pub struct CreateChangeHistory {
    pub change_id: Option<DbId>,
    pub tenant_id: TenantId,
    pub entity_id: String,
    pub entity_type: String,
    pub change_type: String,
    pub old_value: ChangeValue,
    pub new_value: ChangeValue,
    pub outcome: HistoryOutcome,
    pub triggered_by: String,
    pub executed_by: Option<String>,
    pub rate_limit_passed: Option<bool>,
    pub velocity_check_passed: Option<bool>,
    pub manual_override: bool,
    pub rejection_reason: Option<String>,
    pub error_message: Option<String>,
    pub queued_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl CreateChangeHistory {
    /// Audit entry for a queued change reaching a terminal state.
    ///
    /// A change that reached the queue passed the rate limit, so
    /// `rate_limit_passed` is always `Some(true)` here.
    pub fn from_change(
        change: &PendingChange,
        outcome: HistoryOutcome,
        executed_by: Option<&str>,
        error_message: Option<&str>,
    ) -> Self {
        Self {
            change_id: Some(change.id),
            tenant_id: change.tenant_id,
            entity_id: change.entity_id.clone(),
            entity_type: change.entity_type.clone(),
            change_type: change.change_type.clone(),
            old_value: change.current_value.0,
            new_value: change.requested_value.0,
            outcome,
            triggered_by: change.triggered_by.clone(),
            executed_by: executed_by.map(str::to_string),
            rate_limit_passed: Some(true),
            velocity_check_passed: Some(change.velocity_check_passed),
            manual_override: change.manual_override,
            rejection_reason: None,
            error_message: error_message.map(str::to_string),
            queued_at: Some(change.enqueued_at),
            started_at: change.started_at,
            completed_at: change.executed_at,
        }
    }
}

/// Filter parameters for querying the audit log.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub tenant_id: Option<TenantId>,
    pub entity_id: Option<String>,
    pub outcome: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
