//! Attribution attempt log models (append-only).

use adpilot_core::attribution::{AttributionMethod, LayerOutcome};
use adpilot_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// One matching attempt for one conversion.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AttributionAttempt {
    pub id: DbId,
    pub conversion_id: DbId,
    pub exact_outcome: String,
    pub fingerprint_outcome: String,
    pub probabilistic_outcome: String,
    pub matched_method: String,
    pub matched_click_id: Option<DbId>,
    pub confidence: f64,
    /// Whether this attempt changed the stored attribution.
    pub applied: bool,
    pub latency_ms: i32,
    pub attempted_at: Timestamp,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct CreateAttributionAttempt {
    pub conversion_id: DbId,
    pub exact_outcome: LayerOutcome,
    pub fingerprint_outcome: LayerOutcome,
    pub probabilistic_outcome: LayerOutcome,
    pub matched_method: AttributionMethod,
    pub matched_click_id: Option<DbId>,
    pub confidence: f64,
    pub applied: bool,
    pub latency_ms: i32,
}

/// Attempt counts per outcome over a time range.
///
/// `*_attempted` counts attempts where the layer ran; a layer is skipped
/// when its input is missing or a stronger layer already matched.
/// `*_matched` counts attempts where it found a candidate.
#[derive(Debug, Clone, Default, FromRow, Serialize)]
pub struct RecoveryStats {
    pub attempts: i64,
    pub exact: i64,
    pub fingerprint: i64,
    pub probabilistic: i64,
    pub unattributed: i64,
    pub exact_attempted: i64,
    pub exact_matched: i64,
    pub fingerprint_attempted: i64,
    pub fingerprint_matched: i64,
    pub probabilistic_attempted: i64,
    pub probabilistic_matched: i64,
}

impl RecoveryStats {
    /// Share of attempts that found any click.
    pub fn recovery_rate(&self) -> f64 {
        ratio(self.exact + self.fingerprint + self.probabilistic, self.attempts)
    }

    /// Share of the attempts that reached `layer` in which it matched.
    /// `None` for [`AttributionMethod::Unattributed`], which is not a layer.
    pub fn layer_recovery_rate(&self, layer: AttributionMethod) -> Option<f64> {
        let (matched, attempted) = match layer {
            AttributionMethod::Exact => (self.exact_matched, self.exact_attempted),
            AttributionMethod::Fingerprint => (self.fingerprint_matched, self.fingerprint_attempted),
            AttributionMethod::Probabilistic => {
                (self.probabilistic_matched, self.probabilistic_attempted)
            }
            AttributionMethod::Unattributed => return None,
        };
        Some(ratio(matched, attempted))
    }
}

fn ratio(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64
}
