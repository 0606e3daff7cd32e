//! Services for the ad change engine.
//!
//! - [`change_queue`]: safety-gated, jittered change queue with audit trail
//! - [`rate_limiter`]: hour-aligned per-tenant ceilings
//! - [`ingest`]: click and conversion ingestion
//! - [`attribution`]: three-layer conversion attribution
//! - [`registry`]: champion/challenger model registry
//!
//! Services are cheap to clone; each holds a `PgPool` handle and no other
//! state, so any number of processes can run them side by side.

pub mod attribution;
pub mod change_queue;
pub mod error;
pub mod ingest;
pub mod rate_limiter;
pub mod registry;

pub use attribution::AttributionMatcher;
pub use change_queue::ChangeQueue;
pub use error::{EngineError, EngineResult, RejectionReason};
pub use ingest::ClickStore;
pub use rate_limiter::RateLimiter;
pub use registry::ModelRegistry;
