//! Hour-aligned rate-limit window math.

use chrono::DateTime;

use crate::error::CoreError;
use crate::types::Timestamp;

/// Width of a rate-limit window in seconds.
pub const WINDOW_SECS: i64 = 3_600;

/// Start of the hour-aligned window containing `at`.
pub fn window_start(at: Timestamp) -> Result<Timestamp, CoreError> {
    let secs = at.timestamp();
    let aligned = secs - secs.rem_euclid(WINDOW_SECS);
    DateTime::from_timestamp(aligned, 0)
        .ok_or_else(|| CoreError::Internal(format!("Timestamp {at} out of range")))
}

/// A ceiling of zero (or none configured) means unlimited.
pub fn is_unlimited(ceiling: Option<i32>) -> bool {
    !matches!(ceiling, Some(c) if c > 0)
}

/// Whether a window holding `count` admits one more change.
pub fn allows(count: i64, ceiling: Option<i32>) -> bool {
    match ceiling {
        Some(c) if c > 0 => count < i64::from(c),
        _ => true,
    }
}
