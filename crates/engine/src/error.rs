use std::fmt;

use adpilot_core::error::CoreError;

/// Why the safety gate refused to queue a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    RateLimit,
    SafetyCheck,
}

impl RejectionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectionReason::RateLimit => "rate_limit",
            RejectionReason::SafetyCheck => "safety_check",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for engine services.
///
/// Wraps [`CoreError`] for domain errors and `sqlx::Error` for storage
/// failures, and adds the two outcomes that are not plain failures: a
/// rejection by the safety gate and an observed integrity violation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Refused before queueing. Logged, never retried.
    #[error("rejected: {0}")]
    Rejected(RejectionReason),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A state the schema should make impossible was observed.
    #[error("Integrity violation: {0}")]
    Integrity(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// True for errors a caller should retry: lost races with a concurrent
    /// writer.
    pub fn is_contention(&self) -> bool {
        match self {
            EngineError::Database(err) => adpilot_db::is_contention(err),
            EngineError::Core(CoreError::Conflict(_)) => true,
            _ => false,
        }
    }
}

/// Map a unique violation on a `uq_` constraint to [`CoreError::Conflict`];
/// pass every other error through.
pub(crate) fn classify_unique(err: sqlx::Error, what: &str) -> EngineError {
    if adpilot_db::is_unique_violation(&err, "uq_") {
        return EngineError::Core(CoreError::Conflict(format!("{what} already exists")));
    }
    EngineError::Database(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_display_matches_user_facing_text() {
        assert_eq!(
            EngineError::Rejected(RejectionReason::RateLimit).to_string(),
            "rejected: rate_limit"
        );
        assert_eq!(
            EngineError::Rejected(RejectionReason::SafetyCheck).to_string(),
            "rejected: safety_check"
        );
    }

    #[test]
    fn conflicts_are_contention() {
        let err = EngineError::Core(CoreError::Conflict("x".into()));
        assert!(err.is_contention());
        assert!(!EngineError::Rejected(RejectionReason::RateLimit).is_contention());
        assert!(!EngineError::Database(sqlx::Error::RowNotFound).is_contention());
    }
}
