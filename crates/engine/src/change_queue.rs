//! The change queue service: safety gate, jittered enqueue, claim,
//! completion with audit, cancellation, the timeout reaper and requeue.
//!
//! Every transition delegates to a single conditional statement in
//! [`PendingChangeRepo`]; this layer adds the safety gate, audit rows and
//! logging around them.

use std::time::Duration;

use adpilot_core::change::{
    state_machine, EnqueueRequest, ExecutionOutcome, ExecutionResult, HistoryOutcome,
    CANCELLED_REASON, RECLAIM_LIMIT_REASON,
};
use adpilot_core::error::CoreError;
use adpilot_core::jitter::JitterWindow;
use adpilot_core::safety::{SafetyPolicy, SafetyViolation};
use adpilot_core::types::{DbId, TenantId};
use adpilot_db::models::change_history::{ChangeHistoryRecord, CreateChangeHistory, HistoryQuery};
use adpilot_db::models::pending_change::{
    CreatePendingChange, PendingChange, PendingChangeQuery, QueueDepth,
};
use adpilot_db::models::status::ChangeStatus;
use adpilot_db::repositories::{ChangeHistoryRepo, PendingChangeRepo};
use chrono::Utc;
use sqlx::PgPool;

use crate::error::{classify_unique, EngineError, EngineResult, RejectionReason};
use crate::rate_limiter::RateLimiter;

/// Attempts before [`ChangeQueue::cancel`] gives up on a row that keeps
/// changing state underneath it.
const CANCEL_ATTEMPTS: usize = 3;

/// Timeouts for the stale-claim reaper.
#[derive(Debug, Clone, Copy)]
pub struct ReapPolicy {
    /// How long a change may sit in `claimed` without progress.
    pub claim_timeout: Duration,
    /// How long a change may sit in `executing`.
    pub execution_timeout: Duration,
    /// Reclaims allowed before the change is failed with `reclaim_limit`.
    pub max_reclaims: i32,
}

impl Default for ReapPolicy {
    fn default() -> Self {
        Self {
            claim_timeout: Duration::from_secs(300),
            execution_timeout: Duration::from_secs(900),
            max_reclaims: 3,
        }
    }
}

/// What one reaper pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapSummary {
    /// Changes returned to `pending`.
    pub reverted: Vec<DbId>,
    /// Changes failed after exhausting their reclaims.
    pub failed: Vec<DbId>,
}

impl ReapSummary {
    pub fn is_empty(&self) -> bool {
        self.reverted.is_empty() && self.failed.is_empty()
    }
}

/// Result of a cancellation request.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// The change was still pending and is now failed with `cancelled`.
    Cancelled(PendingChange),
    /// The change is in flight; the executor will see the flag.
    CancelRequested(PendingChange),
    /// The change had already finished.
    AlreadyTerminal(PendingChange),
}

/// Service over the `pending_changes` queue.
#[derive(Clone)]
pub struct ChangeQueue {
    pool: PgPool,
    limiter: RateLimiter,
    safety: SafetyPolicy,
}

impl ChangeQueue {
    /// Create a queue using the default safety thresholds.
    pub fn new(pool: PgPool) -> Self {
        Self {
            limiter: RateLimiter::new(pool.clone()),
            pool,
            safety: SafetyPolicy::default(),
        }
    }

    pub fn with_safety_policy(mut self, safety: SafetyPolicy) -> Self {
        self.safety = safety;
        self
    }

    pub fn safety_policy(&self) -> &SafetyPolicy {
        &self.safety
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    // -----------------------------------------------------------------------
    // Enqueue
    // -----------------------------------------------------------------------

    /// Validate, gate and queue a change proposal.
    ///
    /// Order: field validation, safety check (skipped on manual override),
    /// atomic rate-limit acquire, insert. A refusal by either gate appends a
    /// `rejected` audit row and returns [`EngineError::Rejected`].
    pub async fn enqueue(&self, request: &EnqueueRequest) -> EngineResult<PendingChange> {
        request.check()?;

        let window = JitterWindow::new(request.jitter_min_ms, request.jitter_max_ms)?;
        let enqueued_at = Utc::now();
        let eligible_at = window.eligible_at(enqueued_at, &mut rand::rng());

        // Always evaluated so the audit trail records the outcome; only
        // enforced without an override.
        let verdict = self.safety.check(
            &request.current_value,
            &request.requested_value,
            request.confidence_score,
            false,
        );
        let velocity_check_passed = verdict.is_ok();
        if let Err(violation) = verdict {
            if request.manual_override {
                tracing::info!(
                    tenant_id = request.tenant_id,
                    entity_id = %request.entity_id,
                    violation = %violation,
                    "Safety check overridden",
                );
            } else {
                return Err(self
                    .reject(request, RejectionReason::SafetyCheck, None, &violation.to_string())
                    .await);
            }
        }

        let input = CreatePendingChange {
            tenant_id: request.tenant_id,
            entity_id: request.entity_id.clone(),
            entity_type: request.entity_type,
            change_type: request.change_type,
            current_value: request.current_value,
            requested_value: request.requested_value,
            confidence_score: request.confidence_score,
            jitter_min_ms: jitter_ms(window.min_ms())?,
            jitter_max_ms: jitter_ms(window.max_ms())?,
            enqueued_at,
            eligible_at,
            triggered_by: request.triggered_by.clone(),
            manual_override: request.manual_override,
            velocity_check_passed,
            requeued_from: request.requeued_from,
        };

        // The slot and the row commit together; a failed insert drops the
        // transaction and returns the slot.
        let job_type = request.change_type.job_type();
        let mut tx = self.pool.begin().await?;
        if !self.limiter.try_acquire_in(&mut *tx, request.tenant_id, job_type).await? {
            tx.rollback().await?;
            return Err(self
                .reject(
                    request,
                    RejectionReason::RateLimit,
                    Some(velocity_check_passed),
                    &format!("hourly ceiling reached for {job_type}"),
                )
                .await);
        }
        let change = PendingChangeRepo::create(&mut *tx, &input)
            .await
            .map_err(|e| match request.requeued_from {
                Some(parent) => classify_unique(e, &format!("requeue of change {parent}")),
                None => e.into(),
            })?;
        tx.commit().await?;

        tracing::info!(
            change_id = change.id,
            tenant_id = change.tenant_id,
            entity_id = %change.entity_id,
            change_type = %change.change_type,
            eligible_at = %change.eligible_at,
            "Change enqueued",
        );
        Ok(change)
    }

    /// Append the rejection audit row and build the error to return.
    ///
    /// A failure to write the audit row is returned instead of the
    /// rejection, so a rejection is never reported without its record.
    async fn reject(
        &self,
        request: &EnqueueRequest,
        reason: RejectionReason,
        velocity_check_passed: Option<bool>,
        detail: &str,
    ) -> EngineError {
        let record = CreateChangeHistory {
            change_id: None,
            tenant_id: request.tenant_id,
            entity_id: request.entity_id.clone(),
            entity_type: request.entity_type.as_str().to_string(),
            change_type: request.change_type.as_str().to_string(),
            old_value: request.current_value,
            new_value: request.requested_value,
            outcome: HistoryOutcome::Rejected,
            triggered_by: request.triggered_by.clone(),
            executed_by: None,
            rate_limit_passed: match reason {
                RejectionReason::RateLimit => Some(false),
                RejectionReason::SafetyCheck => None,
            },
            velocity_check_passed: match reason {
                RejectionReason::SafetyCheck => Some(false),
                RejectionReason::RateLimit => velocity_check_passed,
            },
            manual_override: request.manual_override,
            rejection_reason: Some(reason.as_str().to_string()),
            error_message: Some(detail.to_string()),
            queued_at: None,
            started_at: None,
            completed_at: None,
        };
        if let Err(e) = ChangeHistoryRepo::insert(&self.pool, &record).await {
            return e.into();
        }

        tracing::warn!(
            tenant_id = request.tenant_id,
            entity_id = %request.entity_id,
            reason = %reason,
            detail,
            "Change rejected",
        );
        EngineError::Rejected(reason)
    }

    // -----------------------------------------------------------------------
    // Claim and execution
    // -----------------------------------------------------------------------

    /// Claim the oldest eligible change. `None` means poll later.
    pub async fn claim(&self, worker_id: &str) -> EngineResult<Option<PendingChange>> {
        let claimed = PendingChangeRepo::claim_next(&self.pool, worker_id).await?;
        if let Some(change) = &claimed {
            tracing::debug!(change_id = change.id, worker_id, "Change claimed");
        }
        Ok(claimed)
    }

    /// `claimed -> executing` for the owning worker. `None` if the claim was
    /// lost to the reaper.
    pub async fn mark_executing(
        &self,
        change_id: DbId,
        worker_id: &str,
    ) -> EngineResult<Option<PendingChange>> {
        Ok(PendingChangeRepo::mark_executing(&self.pool, change_id, worker_id).await?)
    }

    /// Re-run the safety gate on a claimed change.
    pub fn recheck_safety(&self, change: &PendingChange) -> Result<(), SafetyViolation> {
        self.safety.check(
            &change.current_value.0,
            &change.requested_value.0,
            change.confidence_score,
            change.manual_override,
        )
    }

    pub async fn is_cancel_requested(&self, change_id: DbId) -> EngineResult<bool> {
        Ok(PendingChangeRepo::is_cancel_requested(&self.pool, change_id).await?)
    }

    /// Record an execution result and append the audit row in one
    /// transaction.
    ///
    /// Returns `None` when `worker_id` no longer owns the change (it was
    /// reaped and possibly re-claimed); nothing is written in that case.
    pub async fn complete(
        &self,
        worker_id: &str,
        result: &ExecutionResult,
    ) -> EngineResult<Option<ChangeHistoryRecord>> {
        let (status, error_message) = match result.outcome {
            ExecutionOutcome::Completed => (ChangeStatus::Completed, None),
            ExecutionOutcome::Failed => (
                ChangeStatus::Failed,
                Some(result.error_message.as_deref().unwrap_or("unknown error")),
            ),
        };

        let mut tx = self.pool.begin().await?;
        let finished = PendingChangeRepo::finish(
            &mut *tx,
            result.change_id,
            worker_id,
            status,
            error_message,
        )
        .await?;
        let Some(change) = finished else {
            tx.rollback().await?;
            tracing::warn!(
                change_id = result.change_id,
                worker_id,
                "Completion ignored: claim no longer held",
            );
            return Ok(None);
        };

        let record = CreateChangeHistory::from_change(
            &change,
            result.outcome.into(),
            Some(worker_id),
            error_message,
        );
        let history = ChangeHistoryRepo::insert(&mut *tx, &record).await?;
        tx.commit().await?;

        match result.outcome {
            ExecutionOutcome::Completed => tracing::info!(
                change_id = change.id,
                worker_id,
                tenant_id = change.tenant_id,
                "Change completed",
            ),
            ExecutionOutcome::Failed => tracing::error!(
                change_id = change.id,
                worker_id,
                tenant_id = change.tenant_id,
                error = error_message.unwrap_or_default(),
                "Change failed",
            ),
        }
        Ok(Some(history))
    }

    // -----------------------------------------------------------------------
    // Cancellation, reaping, requeue
    // -----------------------------------------------------------------------

    /// Cancel a change: fail it if still pending, otherwise flag it for the
    /// executor.
    pub async fn cancel(&self, change_id: DbId) -> EngineResult<CancelOutcome> {
        for _ in 0..CANCEL_ATTEMPTS {
            let mut tx = self.pool.begin().await?;
            if let Some(change) =
                PendingChangeRepo::cancel_pending(&mut *tx, change_id, CANCELLED_REASON).await?
            {
                let record = CreateChangeHistory::from_change(
                    &change,
                    HistoryOutcome::Failed,
                    None,
                    Some(CANCELLED_REASON),
                );
                ChangeHistoryRepo::insert(&mut *tx, &record).await?;
                tx.commit().await?;
                tracing::info!(change_id, "Pending change cancelled");
                return Ok(CancelOutcome::Cancelled(change));
            }
            tx.rollback().await?;

            if let Some(change) = PendingChangeRepo::request_cancel(&self.pool, change_id).await? {
                tracing::info!(
                    change_id,
                    claimed_by = change.claimed_by.as_deref().unwrap_or_default(),
                    "Cancellation requested for in-flight change",
                );
                return Ok(CancelOutcome::CancelRequested(change));
            }

            let change = PendingChangeRepo::find_by_id(&self.pool, change_id)
                .await?
                .ok_or(CoreError::NotFound {
                    entity: "pending_change",
                    id: change_id,
                })?;
            if state_machine::is_terminal(change.status_id) {
                return Ok(CancelOutcome::AlreadyTerminal(change));
            }
            // The row moved between statements (claimed or reaped); retry.
        }
        Err(CoreError::Conflict(format!("change {change_id} kept changing state during cancel")).into())
    }

    /// One reaper pass: fail changes that exhausted their reclaims, then
    /// return the remaining stale claims to `pending`.
    pub async fn reap(&self, policy: &ReapPolicy) -> EngineResult<ReapSummary> {
        let claim_secs = policy.claim_timeout.as_secs_f64();
        let exec_secs = policy.execution_timeout.as_secs_f64();

        let mut tx = self.pool.begin().await?;
        let exhausted = PendingChangeRepo::fail_exhausted(
            &mut *tx,
            claim_secs,
            exec_secs,
            policy.max_reclaims,
            RECLAIM_LIMIT_REASON,
        )
        .await?;
        for change in &exhausted {
            let record = CreateChangeHistory::from_change(
                change,
                HistoryOutcome::Failed,
                change.claimed_by.as_deref(),
                Some(RECLAIM_LIMIT_REASON),
            );
            ChangeHistoryRepo::insert(&mut *tx, &record).await?;
        }
        tx.commit().await?;

        let reverted =
            PendingChangeRepo::revert_stale(&self.pool, claim_secs, exec_secs, policy.max_reclaims)
                .await?;

        for change in &exhausted {
            tracing::error!(
                change_id = change.id,
                reclaim_count = change.reclaim_count,
                "Change failed after exhausting reclaims",
            );
        }
        for change in &reverted {
            tracing::warn!(
                change_id = change.id,
                reclaim_count = change.reclaim_count,
                "Stale claim returned to pending",
            );
        }

        Ok(ReapSummary {
            reverted: reverted.iter().map(|c| c.id).collect(),
            failed: exhausted.iter().map(|c| c.id).collect(),
        })
    }

    /// Re-propose a failed change as a new pending change.
    ///
    /// Goes through the full gate again and draws fresh jitter. A change can
    /// be requeued once; a second attempt is [`CoreError::Conflict`] and
    /// spends no rate-limit slot.
    pub async fn requeue(&self, change_id: DbId, triggered_by: &str) -> EngineResult<PendingChange> {
        let change = self.find(change_id).await?;
        if change.status() != Some(ChangeStatus::Failed) {
            return Err(CoreError::Validation(format!(
                "only failed changes can be requeued; change {change_id} is {}",
                state_machine::status_name(change.status_id)
            ))
            .into());
        }

        let request = EnqueueRequest {
            tenant_id: change.tenant_id,
            entity_id: change.entity_id.clone(),
            entity_type: change.entity_type()?,
            change_type: change.change_type()?,
            current_value: change.current_value.0,
            requested_value: change.requested_value.0,
            confidence_score: change.confidence_score,
            jitter_min_ms: stored_jitter_ms(change.jitter_min_ms)?,
            jitter_max_ms: stored_jitter_ms(change.jitter_max_ms)?,
            triggered_by: triggered_by.to_string(),
            manual_override: change.manual_override,
            requeued_from: Some(change.id),
        };
        self.enqueue(&request).await
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn find(&self, change_id: DbId) -> EngineResult<PendingChange> {
        PendingChangeRepo::find_by_id(&self.pool, change_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound {
                    entity: "pending_change",
                    id: change_id,
                }
                .into()
            })
    }

    pub async fn list(
        &self,
        tenant_id: TenantId,
        query: &PendingChangeQuery,
    ) -> EngineResult<Vec<PendingChange>> {
        Ok(PendingChangeRepo::list_by_tenant(&self.pool, tenant_id, query).await?)
    }

    pub async fn queue_depth(&self) -> EngineResult<Vec<QueueDepth>> {
        Ok(PendingChangeRepo::queue_depth(&self.pool).await?)
    }

    pub async fn history(&self, query: &HistoryQuery) -> EngineResult<Vec<ChangeHistoryRecord>> {
        Ok(ChangeHistoryRepo::query(&self.pool, query).await?)
    }

    pub async fn history_for_change(&self, change_id: DbId) -> EngineResult<Vec<ChangeHistoryRecord>> {
        Ok(ChangeHistoryRepo::list_for_change(&self.pool, change_id).await?)
    }
}

fn jitter_ms(ms: u32) -> Result<i32, CoreError> {
    i32::try_from(ms).map_err(|_| CoreError::Validation(format!("jitter of {ms} ms is too large")))
}

fn stored_jitter_ms(ms: i32) -> Result<u32, CoreError> {
    u32::try_from(ms).map_err(|_| CoreError::Internal(format!("stored jitter {ms} ms is negative")))
}
