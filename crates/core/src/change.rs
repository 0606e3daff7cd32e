//! Change proposals: entity/change kinds, typed values, and the change
//! state machine.
//!
//! This module lives in `core` (zero internal deps) so it can be used by the
//! repository layer, the engine, and the worker alike.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::jitter::{DEFAULT_JITTER_MAX_MS, DEFAULT_JITTER_MIN_MS, MAX_JITTER_MS};
use crate::types::{DbId, TenantId};

// ---------------------------------------------------------------------------
// Entity and change kinds
// ---------------------------------------------------------------------------

/// The ad-platform object a change targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Campaign,
    Adset,
    Ad,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Campaign => "campaign",
            EntityType::Adset => "adset",
            EntityType::Ad => "ad",
        }
    }
}

impl FromStr for EntityType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "campaign" => Ok(EntityType::Campaign),
            "adset" => Ok(EntityType::Adset),
            "ad" => Ok(EntityType::Ad),
            other => Err(CoreError::Validation(format!(
                "Unknown entity type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of mutation a change applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Budget,
    Status,
    Bid,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::Budget => "budget",
            ChangeType::Status => "status",
            ChangeType::Bid => "bid",
        }
    }

    /// Rate-limit job type key for this change type.
    pub fn job_type(self) -> &'static str {
        match self {
            ChangeType::Budget => "budget_change",
            ChangeType::Status => "status_change",
            ChangeType::Bid => "bid_change",
        }
    }
}

impl FromStr for ChangeType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "budget" => Ok(ChangeType::Budget),
            "status" => Ok(ChangeType::Status),
            "bid" => Ok(ChangeType::Bid),
            other => Err(CoreError::Validation(format!(
                "Unknown change type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status of an ad entity on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Active,
    Paused,
}

// ---------------------------------------------------------------------------
// Typed change values
// ---------------------------------------------------------------------------

/// A current or requested value, tagged by kind.
///
/// Monetary amounts are integer minor units (cents) to avoid float drift.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeValue {
    Budget { amount_cents: i64 },
    Bid { amount_cents: i64 },
    Status { status: DeliveryStatus },
}

impl ChangeValue {
    /// The change type this value belongs to.
    pub fn change_type(&self) -> ChangeType {
        match self {
            ChangeValue::Budget { .. } => ChangeType::Budget,
            ChangeValue::Bid { .. } => ChangeType::Bid,
            ChangeValue::Status { .. } => ChangeType::Status,
        }
    }

    /// Monetary amount for budget and bid values.
    pub fn amount_cents(&self) -> Option<i64> {
        match self {
            ChangeValue::Budget { amount_cents } | ChangeValue::Bid { amount_cents } => {
                Some(*amount_cents)
            }
            ChangeValue::Status { .. } => None,
        }
    }

    /// Serialize to JSON for storage in JSONB columns.
    pub fn to_json(&self) -> serde_json::Value {
        // A closed enum of integers and unit variants always serializes.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Parse from a stored JSONB column.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, CoreError> {
        serde_json::from_value(value.clone())
            .map_err(|e| CoreError::Validation(format!("Malformed change value: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Enqueue request
// ---------------------------------------------------------------------------

fn default_jitter_min_ms() -> u32 {
    DEFAULT_JITTER_MIN_MS
}

fn default_jitter_max_ms() -> u32 {
    DEFAULT_JITTER_MAX_MS
}

/// A change proposal from the decision producer.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EnqueueRequest {
    pub tenant_id: TenantId,
    #[validate(length(min = 1, max = 128))]
    pub entity_id: String,
    pub entity_type: EntityType,
    pub change_type: ChangeType,
    pub current_value: ChangeValue,
    pub requested_value: ChangeValue,
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence_score: f64,
    #[serde(default = "default_jitter_min_ms")]
    #[validate(range(max = 3600000))]
    pub jitter_min_ms: u32,
    #[serde(default = "default_jitter_max_ms")]
    #[validate(range(max = 3600000))]
    pub jitter_max_ms: u32,
    /// Actor that proposed the change (model name, user handle, ...).
    #[validate(length(min = 1, max = 128))]
    pub triggered_by: String,
    /// Skip the velocity check. The rate limit still applies.
    #[serde(default)]
    pub manual_override: bool,
    /// Set when this proposal re-submits a failed change.
    #[serde(default)]
    pub requeued_from: Option<DbId>,
}

impl EnqueueRequest {
    /// Field-level validation plus cross-field consistency checks.
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate()?;

        if self.jitter_min_ms > self.jitter_max_ms {
            return Err(CoreError::Validation(format!(
                "jitter_min_ms ({}) must not exceed jitter_max_ms ({})",
                self.jitter_min_ms, self.jitter_max_ms
            )));
        }
        if self.jitter_max_ms > MAX_JITTER_MS {
            return Err(CoreError::Validation(format!(
                "jitter_max_ms must not exceed {MAX_JITTER_MS}"
            )));
        }
        for (label, value) in [
            ("current_value", &self.current_value),
            ("requested_value", &self.requested_value),
        ] {
            if value.change_type() != self.change_type {
                return Err(CoreError::Validation(format!(
                    "{label} is a {} value but change_type is {}",
                    value.change_type(),
                    self.change_type
                )));
            }
            if value.amount_cents().is_some_and(|a| a < 0) {
                return Err(CoreError::Validation(format!(
                    "{label} must not be negative"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Execution outcome and audit outcome
// ---------------------------------------------------------------------------

/// Terminal result reported back by the platform executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed,
    Failed,
}

/// `{changeId, outcome, errorMessage?}` as returned by an executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub change_id: DbId,
    pub outcome: ExecutionOutcome,
    pub error_message: Option<String>,
}

impl ExecutionResult {
    pub fn completed(change_id: DbId) -> Self {
        Self {
            change_id,
            outcome: ExecutionOutcome::Completed,
            error_message: None,
        }
    }

    pub fn failed(change_id: DbId, error: impl Into<String>) -> Self {
        Self {
            change_id,
            outcome: ExecutionOutcome::Failed,
            error_message: Some(error.into()),
        }
    }
}

/// Outcome recorded in the change history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOutcome {
    Completed,
    Failed,
    Rejected,
}

impl HistoryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryOutcome::Completed => "completed",
            HistoryOutcome::Failed => "failed",
            HistoryOutcome::Rejected => "rejected",
        }
    }
}

impl From<ExecutionOutcome> for HistoryOutcome {
    fn from(outcome: ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Completed => HistoryOutcome::Completed,
            ExecutionOutcome::Failed => HistoryOutcome::Failed,
        }
    }
}

/// Error message stored when a pending change is cancelled.
pub const CANCELLED_REASON: &str = "cancelled";

/// Error message stored when the reaper gives up on a change.
pub const RECLAIM_LIMIT_REASON: &str = "reclaim_limit";

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Change status IDs matching `change_statuses` seed data (1-based SMALLSERIAL).
///
/// Duplicated from the `db` crate's `ChangeStatus` enum because `core` must
/// have zero internal deps.
pub mod state_machine {
    pub const PENDING: i16 = 1;
    pub const CLAIMED: i16 = 2;
    pub const EXECUTING: i16 = 3;
    pub const COMPLETED: i16 = 4;
    pub const FAILED: i16 = 5;

    /// Transitions a worker may perform.
    ///
    /// Reverting to pending is reserved for the timeout reaper and is
    /// checked separately by [`can_reap`].
    pub fn valid_transitions(from_status: i16) -> &'static [i16] {
        match from_status {
            // Pending -> Claimed, or Failed when cancelled
            PENDING => &[CLAIMED, FAILED],
            // Claimed -> Executing, or straight to a terminal state
            CLAIMED => &[EXECUTING, COMPLETED, FAILED],
            EXECUTING => &[COMPLETED, FAILED],
            COMPLETED | FAILED => &[],
            _ => &[],
        }
    }

    /// Check whether a worker may move a change from `from` to `to`.
    pub fn can_transition(from: i16, to: i16) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Only claimed and executing changes can be returned to pending.
    pub fn can_reap(from: i16) -> bool {
        matches!(from, CLAIMED | EXECUTING)
    }

    pub fn is_terminal(status: i16) -> bool {
        matches!(status, COMPLETED | FAILED)
    }

    /// Validate a state transition, returning an error message for invalid ones.
    pub fn validate_transition(from: i16, to: i16) -> Result<(), String> {
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(format!(
                "Invalid transition: {} ({from}) -> {} ({to})",
                status_name(from),
                status_name(to)
            ))
        }
    }

    /// Human-readable name for a status ID.
    pub fn status_name(id: i16) -> &'static str {
        match id {
            PENDING => "pending",
            CLAIMED => "claimed",
            EXECUTING => "executing",
            COMPLETED => "completed",
            FAILED => "failed",
            _ => "unknown",
        }
    }
}
