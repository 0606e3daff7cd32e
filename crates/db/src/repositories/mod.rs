//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` (or any `PgExecutor` where a caller needs to compose
//! them inside a transaction) as the first argument.

pub mod attribution_attempt_repo;
pub mod change_history_repo;
pub mod click_repo;
pub mod conversion_repo;
pub mod model_version_repo;
pub mod pending_change_repo;
pub mod rate_limit_repo;

pub use attribution_attempt_repo::AttributionAttemptRepo;
pub use change_history_repo::ChangeHistoryRepo;
pub use click_repo::ClickRepo;
pub use conversion_repo::ConversionRepo;
pub use model_version_repo::ModelVersionRepo;
pub use pending_change_repo::PendingChangeRepo;
pub use rate_limit_repo::RateLimitRepo;
