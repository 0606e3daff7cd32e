//! Pure domain logic for the change engine: change proposals, jitter, the
//! safety gate, rate-limit windows, attribution scoring, fingerprints, and
//! model registry rules.
//!
//! No database or runtime dependencies; everything here is unit-testable.

pub mod attribution;
pub mod change;
pub mod error;
pub mod fingerprint;
pub mod hashing;
pub mod jitter;
pub mod model_registry;
pub mod rate_limit;
pub mod safety;
pub mod types;
