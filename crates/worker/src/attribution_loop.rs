//! Batch attribution of unattributed conversions.

use std::time::Duration;

use adpilot_engine::AttributionMatcher;
use tokio_util::sync::CancellationToken;

/// Run the attribution loop until `cancel` is triggered.
pub async fn run(
    matcher: AttributionMatcher,
    batch_size: i64,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        batch_size,
        interval_secs = interval.as_secs(),
        "Attribution loop started",
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Attribution loop stopping");
                break;
            }
            _ = ticker.tick() => {
                match matcher.run_batch(batch_size).await {
                    Ok(summary) if summary.processed == 0 => {
                        tracing::debug!("Attribution: no new conversions");
                    }
                    Ok(summary) => {
                        tracing::info!(
                            processed = summary.processed,
                            exact = summary.exact,
                            fingerprint = summary.fingerprint,
                            probabilistic = summary.probabilistic,
                            unattributed = summary.unattributed,
                            lost_races = summary.lost_races,
                            errors = summary.errors,
                            "Attribution batch done",
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Attribution batch failed");
                    }
                }
            }
        }
    }
}
