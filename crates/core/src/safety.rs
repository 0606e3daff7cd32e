//! Velocity and confidence checks applied before a change is queued and
//! again after a worker claims it.

use serde::{Deserialize, Serialize};

use crate::change::ChangeValue;

/// Default cap on a single budget move, as a percentage of the current value.
pub const DEFAULT_MAX_BUDGET_CHANGE_PCT: f64 = 50.0;

/// Default cap on a single bid move, as a percentage of the current value.
pub const DEFAULT_MAX_BID_CHANGE_PCT: f64 = 30.0;

/// Default minimum proposer confidence.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.5;

/// Thresholds for the safety gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyPolicy {
    pub max_budget_change_pct: f64,
    pub max_bid_change_pct: f64,
    pub min_confidence: f64,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            max_budget_change_pct: DEFAULT_MAX_BUDGET_CHANGE_PCT,
            max_bid_change_pct: DEFAULT_MAX_BID_CHANGE_PCT,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

/// Why the safety gate refused a change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum SafetyViolation {
    LowConfidence { confidence: f64, minimum: f64 },
    VelocityExceeded { change_pct: f64, limit_pct: f64 },
    /// Moving a monetary value away from zero has no relative bound.
    UnboundedFromZero,
}

impl std::fmt::Display for SafetyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SafetyViolation::LowConfidence {
                confidence,
                minimum,
            } => write!(f, "confidence {confidence:.2} below minimum {minimum:.2}"),
            SafetyViolation::VelocityExceeded {
                change_pct,
                limit_pct,
            } => write!(f, "change of {change_pct:.1}% exceeds limit of {limit_pct:.1}%"),
            SafetyViolation::UnboundedFromZero => {
                f.write_str("change from a zero value requires manual override")
            }
        }
    }
}

/// Absolute relative change in percent. `None` when `current` is zero.
pub fn relative_change_pct(current: i64, requested: i64) -> Option<f64> {
    if current == 0 {
        return None;
    }
    let delta = (requested - current) as f64;
    Some((delta / current as f64).abs() * 100.0)
}

impl SafetyPolicy {
    /// Run the confidence floor and the velocity bound.
    ///
    /// Status changes are not velocity-bounded. `manual_override` skips every
    /// check.
    pub fn check(
        &self,
        current: &ChangeValue,
        requested: &ChangeValue,
        confidence: f64,
        manual_override: bool,
    ) -> Result<(), SafetyViolation> {
        if manual_override {
            return Ok(());
        }

        if confidence < self.min_confidence {
            return Err(SafetyViolation::LowConfidence {
                confidence,
                minimum: self.min_confidence,
            });
        }

        let limit_pct = match requested {
            ChangeValue::Budget { .. } => self.max_budget_change_pct,
            ChangeValue::Bid { .. } => self.max_bid_change_pct,
            ChangeValue::Status { .. } => return Ok(()),
        };

        let (Some(from), Some(to)) = (current.amount_cents(), requested.amount_cents()) else {
            return Ok(());
        };
        if from == to {
            return Ok(());
        }

        match relative_change_pct(from, to) {
            None => Err(SafetyViolation::UnboundedFromZero),
            Some(change_pct) if change_pct > limit_pct => {
                Err(SafetyViolation::VelocityExceeded {
                    change_pct,
                    limit_pct,
                })
            }
            Some(_) => Ok(()),
        }
    }
}
