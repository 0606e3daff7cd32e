use std::sync::Arc;
use std::time::Duration;

use adpilot_engine::{AttributionMatcher, ChangeQueue};
use adpilot_worker::{attribution_loop, reaper, ChangeWorker, DryRunExecutor, WorkerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long each loop gets to finish its current pass after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "adpilot_worker=debug,adpilot_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env()?;
    tracing::info!(worker_id = %config.worker_id, "Worker starting");

    let pool = adpilot_db::create_pool(&config.database_url, config.db_max_connections).await?;
    adpilot_db::health_check(&pool).await?;
    tracing::info!("Database connection established");

    adpilot_db::run_migrations(&pool).await?;
    tracing::info!("Database migrations applied");

    let queue = ChangeQueue::new(pool.clone()).with_safety_policy(config.safety);
    let cancel = CancellationToken::new();

    let worker = ChangeWorker::new(
        queue.clone(),
        Arc::new(DryRunExecutor),
        config.worker_id.clone(),
    )
    .with_poll_interval(config.poll_interval);
    let worker_handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { worker.run(cancel).await }
    });

    let reaper_handle = tokio::spawn(reaper::run(
        queue,
        config.reap,
        config.reaper_interval,
        cancel.clone(),
    ));

    let attribution_handle = tokio::spawn(attribution_loop::run(
        AttributionMatcher::new(pool.clone()),
        config.attribution_batch_size,
        config.attribution_interval,
        cancel.clone(),
    ));

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping loops");
    cancel.cancel();

    let _ = tokio::time::timeout(SHUTDOWN_GRACE, worker_handle).await;
    tracing::info!("Change worker stopped");
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, reaper_handle).await;
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, attribution_handle).await;
    tracing::info!("Background loops stopped");

    pool.close().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
///
/// If a handler cannot be installed, the corresponding branch never fires
/// and the other signal still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
