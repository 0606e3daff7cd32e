//! Attribution waterfall vocabulary and confidence scoring.
//!
//! Pure functions only; candidate lookup happens in the repository layer and
//! orchestration in the engine.

use std::fmt;
use std::str::FromStr;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default click attribution window.
pub const DEFAULT_ATTRIBUTION_WINDOW_DAYS: i64 = 7;

/// Confidence of a platform click-id match.
pub const EXACT_CONFIDENCE: f64 = 1.0;

pub const FINGERPRINT_MIN_CONFIDENCE: f64 = 0.6;
pub const FINGERPRINT_MAX_CONFIDENCE: f64 = 0.9;

pub const PROBABILISTIC_MIN_CONFIDENCE: f64 = 0.3;
pub const PROBABILISTIC_MAX_CONFIDENCE: f64 = 0.6;

/// A click this close to the conversion counts as near-simultaneous.
pub const PROXIMITY_WINDOW_SECS: i64 = 30 * 60;

/// Probabilistic matches need at least this many corroborating signals.
pub const MIN_PROBABILISTIC_SIGNALS: u32 = 2;

/// Total number of probabilistic signals (origin, device, proximity).
pub const PROBABILISTIC_SIGNAL_COUNT: u32 = 3;

pub fn default_window() -> TimeDelta {
    TimeDelta::days(DEFAULT_ATTRIBUTION_WINDOW_DAYS)
}

// ---------------------------------------------------------------------------
// Method / layer vocabulary
// ---------------------------------------------------------------------------

/// How a conversion was linked to a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionMethod {
    Exact,
    Fingerprint,
    Probabilistic,
    Unattributed,
}

impl AttributionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AttributionMethod::Exact => "exact",
            AttributionMethod::Fingerprint => "fingerprint",
            AttributionMethod::Probabilistic => "probabilistic",
            AttributionMethod::Unattributed => "unattributed",
        }
    }

    /// Strength order: exact > fingerprint > probabilistic > unattributed.
    pub fn rank(self) -> u8 {
        match self {
            AttributionMethod::Exact => 3,
            AttributionMethod::Fingerprint => 2,
            AttributionMethod::Probabilistic => 1,
            AttributionMethod::Unattributed => 0,
        }
    }
}

impl FromStr for AttributionMethod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(AttributionMethod::Exact),
            "fingerprint" => Ok(AttributionMethod::Fingerprint),
            "probabilistic" => Ok(AttributionMethod::Probabilistic),
            "unattributed" => Ok(AttributionMethod::Unattributed),
            other => Err(CoreError::Validation(format!(
                "Unknown attribution method '{other}'"
            ))),
        }
    }
}

impl fmt::Display for AttributionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-layer result of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerOutcome {
    Matched,
    Missed,
    /// The conversion lacked the input this layer needs, or an earlier layer
    /// already matched.
    Skipped,
}

impl LayerOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            LayerOutcome::Matched => "matched",
            LayerOutcome::Missed => "missed",
            LayerOutcome::Skipped => "skipped",
        }
    }
}

/// Returns true when `(new_method, new_confidence)` strictly beats the
/// stored attribution. Nothing stored always loses.
pub fn is_stronger(
    new_method: AttributionMethod,
    new_confidence: f64,
    existing: Option<(AttributionMethod, f64)>,
) -> bool {
    match existing {
        None => true,
        Some((method, confidence)) => match new_method.rank().cmp(&method.rank()) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => new_confidence > confidence,
        },
    }
}

// ---------------------------------------------------------------------------
// Confidence scoring
// ---------------------------------------------------------------------------

/// Fraction of the window that has elapsed, clamped to `0.0..=1.0`.
fn elapsed_fraction(elapsed: TimeDelta, window: TimeDelta) -> f64 {
    let window_ms = window.num_milliseconds();
    if window_ms <= 0 {
        return 1.0;
    }
    (elapsed.num_milliseconds() as f64 / window_ms as f64).clamp(0.0, 1.0)
}

/// Fingerprint confidence in `0.6..=0.9`.
///
/// Half the span comes from component similarity, half from recency.
pub fn fingerprint_confidence(similarity: f64, elapsed: TimeDelta, window: TimeDelta) -> f64 {
    let recency = 1.0 - elapsed_fraction(elapsed, window);
    let strength = 0.5 * similarity.clamp(0.0, 1.0) + 0.5 * recency;
    let span = FINGERPRINT_MAX_CONFIDENCE - FINGERPRINT_MIN_CONFIDENCE;
    (FINGERPRINT_MIN_CONFIDENCE + span * strength)
        .clamp(FINGERPRINT_MIN_CONFIDENCE, FINGERPRINT_MAX_CONFIDENCE)
}

/// Corroborating signals for a probabilistic candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbabilisticSignals {
    pub same_origin: bool,
    pub same_device_class: bool,
    pub near_simultaneous: bool,
}

impl ProbabilisticSignals {
    pub fn evaluate(
        same_origin: bool,
        same_device_class: bool,
        elapsed: TimeDelta,
    ) -> Self {
        Self {
            same_origin,
            same_device_class,
            near_simultaneous: elapsed >= TimeDelta::zero()
                && elapsed <= TimeDelta::seconds(PROXIMITY_WINDOW_SECS),
        }
    }

    pub fn count(&self) -> u32 {
        u32::from(self.same_origin)
            + u32::from(self.same_device_class)
            + u32::from(self.near_simultaneous)
    }

    pub fn is_sufficient(&self) -> bool {
        self.count() >= MIN_PROBABILISTIC_SIGNALS
    }
}

/// Probabilistic confidence in `0.3..=0.6`.
///
/// Increases with the number of signals, decreases monotonically with time
/// to conversion.
pub fn probabilistic_confidence(
    signals: ProbabilisticSignals,
    elapsed: TimeDelta,
    window: TimeDelta,
) -> f64 {
    let signal_strength =
        f64::from(signals.count()) / f64::from(PROBABILISTIC_SIGNAL_COUNT);
    let recency = 1.0 - elapsed_fraction(elapsed, window);
    let span = PROBABILISTIC_MAX_CONFIDENCE - PROBABILISTIC_MIN_CONFIDENCE;
    (PROBABILISTIC_MIN_CONFIDENCE + span * signal_strength * recency)
        .clamp(PROBABILISTIC_MIN_CONFIDENCE, PROBABILISTIC_MAX_CONFIDENCE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> TimeDelta {
        default_window()
    }

    #[test]
    fn method_strings_round_trip() {
        for m in [
            AttributionMethod::Exact,
            AttributionMethod::Fingerprint,
            AttributionMethod::Probabilistic,
            AttributionMethod::Unattributed,
        ] {
            assert_eq!(m.as_str().parse::<AttributionMethod>().unwrap(), m);
        }
    }

    #[test]
    fn fingerprint_bounds() {
        let best = fingerprint_confidence(1.0, TimeDelta::zero(), window());
        let worst = fingerprint_confidence(0.0, window() * 2, window());
        assert!((best - FINGERPRINT_MAX_CONFIDENCE).abs() < 1e-9);
        assert!((worst - FINGERPRINT_MIN_CONFIDENCE).abs() < 1e-9);
    }

    #[test]
    fn fingerprint_decays_with_time() {
        let early = fingerprint_confidence(1.0, TimeDelta::hours(1), window());
        let late = fingerprint_confidence(1.0, TimeDelta::days(5), window());
        assert!(early > late);
    }

    #[test]
    fn probabilistic_bounds() {
        let all = ProbabilisticSignals {
            same_origin: true,
            same_device_class: true,
            near_simultaneous: true,
        };
        let best = probabilistic_confidence(all, TimeDelta::zero(), window());
        assert!((best - PROBABILISTIC_MAX_CONFIDENCE).abs() < 1e-9);
        let none = ProbabilisticSignals::default();
        let worst = probabilistic_confidence(none, TimeDelta::zero(), window());
        assert!((worst - PROBABILISTIC_MIN_CONFIDENCE).abs() < 1e-9);
    }

    #[test]
    fn probabilistic_monotonic_in_time() {
        let signals = ProbabilisticSignals {
            same_origin: true,
            same_device_class: true,
            near_simultaneous: false,
        };
        let mut previous = f64::INFINITY;
        for hours in [1, 6, 24, 72, 160] {
            let c = probabilistic_confidence(signals, TimeDelta::hours(hours), window());
            assert!(c < previous, "confidence must fall as time grows");
            previous = c;
        }
    }

    #[test]
    fn probabilistic_increases_with_signals() {
        let elapsed = TimeDelta::minutes(10);
        let two = ProbabilisticSignals::evaluate(true, false, elapsed);
        let three = ProbabilisticSignals::evaluate(true, true, elapsed);
        assert_eq!(two.count(), 2);
        assert_eq!(three.count(), 3);
        assert!(
            probabilistic_confidence(three, elapsed, window())
                > probabilistic_confidence(two, elapsed, window())
        );
    }

    #[test]
    fn single_signal_is_insufficient() {
        let signals = ProbabilisticSignals::evaluate(false, true, TimeDelta::days(2));
        assert_eq!(signals.count(), 1);
        assert!(!signals.is_sufficient());
    }

    #[test]
    fn probabilistic_never_reaches_fingerprint_floor_from_below() {
        let all = ProbabilisticSignals::evaluate(true, true, TimeDelta::zero());
        assert!(probabilistic_confidence(all, TimeDelta::zero(), window()) <= FINGERPRINT_MIN_CONFIDENCE);
    }

    #[test]
    fn stronger_method_wins_regardless_of_confidence() {
        assert!(is_stronger(
            AttributionMethod::Fingerprint,
            0.6,
            Some((AttributionMethod::Probabilistic, 0.6))
        ));
        assert!(!is_stronger(
            AttributionMethod::Probabilistic,
            0.6,
            Some((AttributionMethod::Fingerprint, 0.6))
        ));
    }

    #[test]
    fn same_method_needs_higher_confidence() {
        let existing = Some((AttributionMethod::Fingerprint, 0.8));
        assert!(!is_stronger(AttributionMethod::Fingerprint, 0.8, existing));
        assert!(is_stronger(AttributionMethod::Fingerprint, 0.85, existing));
    }

    #[test]
    fn anything_beats_nothing_and_unattributed() {
        assert!(is_stronger(AttributionMethod::Unattributed, 0.0, None));
        assert!(is_stronger(
            AttributionMethod::Probabilistic,
            0.3,
            Some((AttributionMethod::Unattributed, 0.0))
        ));
        assert!(!is_stronger(
            AttributionMethod::Unattributed,
            0.0,
            Some((AttributionMethod::Unattributed, 0.0))
        ));
    }
}
