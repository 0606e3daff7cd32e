//! Background loops for the ad change engine.
//!
//! A worker process runs three loops against one shared
//! [`CancellationToken`](tokio_util::sync::CancellationToken):
//!
//! - [`change_worker`]: claims queued changes and applies them through a
//!   [`PlatformExecutor`](executor::PlatformExecutor)
//! - [`reaper`]: returns stale claims to the queue
//! - [`attribution_loop`]: attributes new conversions in batches

pub mod attribution_loop;
pub mod change_worker;
pub mod config;
pub mod executor;
pub mod reaper;

pub use change_worker::ChangeWorker;
pub use config::WorkerConfig;
pub use executor::{DryRunExecutor, ExecutionError, PlatformExecutor};
