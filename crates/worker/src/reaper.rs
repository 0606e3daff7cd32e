//! Periodic return of stale claims to the queue.

use std::time::Duration;

use adpilot_engine::change_queue::ReapPolicy;
use adpilot_engine::ChangeQueue;
use tokio_util::sync::CancellationToken;

/// Run the reaper loop until `cancel` is triggered.
///
/// Changes stuck in `claimed` or `executing` past their timeout go back to
/// `pending`; those that have already been reclaimed `max_reclaims` times
/// are failed instead.
pub async fn run(
    queue: ChangeQueue,
    policy: ReapPolicy,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        claim_timeout_secs = policy.claim_timeout.as_secs(),
        execution_timeout_secs = policy.execution_timeout.as_secs(),
        max_reclaims = policy.max_reclaims,
        "Reaper started",
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Reaper stopping");
                break;
            }
            _ = ticker.tick() => {
                match queue.reap(&policy).await {
                    Ok(summary) if summary.is_empty() => {
                        tracing::debug!("Reaper: nothing stale");
                    }
                    Ok(summary) => {
                        tracing::info!(
                            reverted = summary.reverted.len(),
                            failed = summary.failed.len(),
                            "Reaper: stale claims handled",
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Reaper pass failed");
                    }
                }
            }
        }
    }
}
