//! Change worker loop.
//!
//! Polls the queue every `poll_interval` and drains eligible changes one at
//! a time. Claiming goes through `FOR UPDATE SKIP LOCKED`, so any number of
//! workers may run this loop against the same database.

use std::sync::Arc;
use std::time::Duration;

use adpilot_core::change::{ExecutionResult, CANCELLED_REASON};
use adpilot_core::types::DbId;
use adpilot_engine::{ChangeQueue, EngineResult, RejectionReason};
use tokio_util::sync::CancellationToken;

use crate::executor::PlatformExecutor;

/// Default polling interval for the worker loop.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What one [`ChangeWorker::process_next`] call did.
#[derive(Debug, Clone)]
pub enum Step {
    /// Nothing eligible.
    Idle,
    /// The change reached a terminal state with this result.
    Finished(ExecutionResult),
    /// The reaper took the change back before this worker finished it.
    ClaimLost(DbId),
}

/// Claims queued changes and applies them through a [`PlatformExecutor`].
pub struct ChangeWorker {
    queue: ChangeQueue,
    executor: Arc<dyn PlatformExecutor>,
    worker_id: String,
    poll_interval: Duration,
}

impl ChangeWorker {
    pub fn new(queue: ChangeQueue, executor: Arc<dyn PlatformExecutor>, worker_id: String) -> Self {
        Self {
            queue,
            executor,
            worker_id,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run the worker loop until the cancellation token is triggered.
    ///
    /// An in-flight change is always finished before the loop exits.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        tracing::info!(
            worker_id = %self.worker_id,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Change worker started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(worker_id = %self.worker_id, "Change worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.drain(&cancel).await {
                        tracing::error!(worker_id = %self.worker_id, error = %e, "Worker cycle failed");
                    }
                }
            }
        }
    }

    /// Process changes until the queue has nothing eligible or shutdown is
    /// requested.
    async fn drain(&self, cancel: &CancellationToken) -> EngineResult<()> {
        while !cancel.is_cancelled() {
            if let Step::Idle = self.process_next().await? {
                break;
            }
        }
        Ok(())
    }

    /// Claim and execute a single change.
    ///
    /// The safety gate is re-run after the claim because the policy may have
    /// tightened since enqueue. A cancellation flag set while the change was
    /// claimed fails it with `cancelled` before the platform is called.
    pub async fn process_next(&self) -> EngineResult<Step> {
        let Some(change) = self.queue.claim(&self.worker_id).await? else {
            return Ok(Step::Idle);
        };

        let Some(change) = self.queue.mark_executing(change.id, &self.worker_id).await? else {
            tracing::warn!(
                change_id = change.id,
                worker_id = %self.worker_id,
                "Claim lost before execution",
            );
            return Ok(Step::ClaimLost(change.id));
        };

        let result = if let Err(violation) = self.queue.recheck_safety(&change) {
            tracing::warn!(
                change_id = change.id,
                violation = %violation,
                "Safety re-check failed after claim",
            );
            ExecutionResult::failed(
                change.id,
                format!("{}: {violation}", RejectionReason::SafetyCheck),
            )
        } else if self.queue.is_cancel_requested(change.id).await? {
            ExecutionResult::failed(change.id, CANCELLED_REASON)
        } else {
            match self.executor.execute(&change).await {
                Ok(()) => ExecutionResult::completed(change.id),
                Err(e) => ExecutionResult::failed(change.id, e.to_string()),
            }
        };

        match self.queue.complete(&self.worker_id, &result).await? {
            Some(_) => Ok(Step::Finished(result)),
            None => Ok(Step::ClaimLost(change.id)),
        }
    }
}
