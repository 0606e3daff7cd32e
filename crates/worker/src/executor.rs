//! The seam between the change queue and an ad platform.

use adpilot_db::models::pending_change::PendingChange;
use async_trait::async_trait;

/// A platform call did not apply the change.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The platform refused the change (invalid entity, policy, ...).
    #[error("platform rejected change: {0}")]
    Rejected(String),

    /// Transport or availability failure.
    #[error("platform unavailable: {0}")]
    Unavailable(String),

    #[error("platform call timed out")]
    Timeout,
}

/// Applies one claimed change to the ad platform.
///
/// Implementations must be safe to call from several workers at once.
#[async_trait]
pub trait PlatformExecutor: Send + Sync {
    async fn execute(&self, change: &PendingChange) -> Result<(), ExecutionError>;
}

/// Logs each change instead of calling a platform.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunExecutor;

#[async_trait]
impl PlatformExecutor for DryRunExecutor {
    async fn execute(&self, change: &PendingChange) -> Result<(), ExecutionError> {
        tracing::info!(
            change_id = change.id,
            tenant_id = change.tenant_id,
            entity_id = %change.entity_id,
            change_type = %change.change_type,
            requested = ?change.requested_value.0,
            "Dry run: change not sent to platform",
        );
        Ok(())
    }
}
