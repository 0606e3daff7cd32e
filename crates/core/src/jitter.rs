//! Eligibility jitter for queued changes.
//!
//! A delay is drawn uniformly from `[min, max]` exactly once, at enqueue
//! time, so simultaneous proposals do not fire in lockstep.

use chrono::TimeDelta;
use rand::Rng;

use crate::error::CoreError;
use crate::types::Timestamp;

/// Default lower jitter bound (3 s).
pub const DEFAULT_JITTER_MIN_MS: u32 = 3_000;

/// Default upper jitter bound (18 s).
pub const DEFAULT_JITTER_MAX_MS: u32 = 18_000;

/// Upper bound accepted for any jitter window (1 h).
pub const MAX_JITTER_MS: u32 = 3_600_000;

/// An inclusive millisecond delay range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterWindow {
    min_ms: u32,
    max_ms: u32,
}

impl JitterWindow {
    pub fn new(min_ms: u32, max_ms: u32) -> Result<Self, CoreError> {
        if min_ms > max_ms {
            return Err(CoreError::Validation(format!(
                "Jitter min ({min_ms} ms) exceeds max ({max_ms} ms)"
            )));
        }
        if max_ms > MAX_JITTER_MS {
            return Err(CoreError::Validation(format!(
                "Jitter max must not exceed {MAX_JITTER_MS} ms"
            )));
        }
        Ok(Self { min_ms, max_ms })
    }

    pub fn min_ms(&self) -> u32 {
        self.min_ms
    }

    pub fn max_ms(&self) -> u32 {
        self.max_ms
    }

    /// Draw a delay uniformly from the window.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> TimeDelta {
        let ms = rng.random_range(self.min_ms..=self.max_ms);
        TimeDelta::milliseconds(i64::from(ms))
    }

    /// `enqueued_at + sample()`.
    pub fn eligible_at<R: Rng + ?Sized>(&self, enqueued_at: Timestamp, rng: &mut R) -> Timestamp {
        enqueued_at + self.sample(rng)
    }
}

impl Default for JitterWindow {
    fn default() -> Self {
        Self {
            min_ms: DEFAULT_JITTER_MIN_MS,
            max_ms: DEFAULT_JITTER_MAX_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn samples_stay_within_bounds() {
        let window = JitterWindow::new(3_000, 18_000).unwrap();
        let mut rng = rand::rng();
        let now = Utc::now();
        for _ in 0..1_000 {
            let delay = window.eligible_at(now, &mut rng) - now;
            assert!(delay >= TimeDelta::milliseconds(3_000), "{delay:?} below min");
            assert!(delay <= TimeDelta::milliseconds(18_000), "{delay:?} above max");
        }
    }

    #[test]
    fn zero_width_window_is_exact() {
        let window = JitterWindow::new(500, 500).unwrap();
        let delay = window.sample(&mut rand::rng());
        assert_eq!(delay, TimeDelta::milliseconds(500));
    }

    #[test]
    fn inverted_window_rejected() {
        assert!(JitterWindow::new(10, 5).is_err());
    }

    #[test]
    fn oversized_window_rejected() {
        assert!(JitterWindow::new(0, MAX_JITTER_MS + 1).is_err());
    }

    #[test]
    fn default_matches_constants() {
        let window = JitterWindow::default();
        assert_eq!(window.min_ms(), DEFAULT_JITTER_MIN_MS);
        assert_eq!(window.max_ms(), DEFAULT_JITTER_MAX_MS);
    }
}
