//! Three-layer attribution waterfall: exact click id, fingerprint hash,
//! probabilistic signals. The first layer to match wins; later layers are
//! recorded as skipped.
//!
//! Writes go through a compare-and-swap on the stored attribution, so two
//! matchers racing on one conversion cannot downgrade each other.

use std::time::Instant;

use adpilot_core::attribution::{
    fingerprint_confidence, is_stronger, probabilistic_confidence, AttributionMethod,
    LayerOutcome, ProbabilisticSignals, EXACT_CONFIDENCE, PROXIMITY_WINDOW_SECS,
};
use adpilot_core::error::CoreError;
use adpilot_core::types::{DbId, TenantId, Timestamp};
use adpilot_db::models::attribution_attempt::{CreateAttributionAttempt, RecoveryStats};
use adpilot_db::models::click::Click;
use adpilot_db::models::conversion::{
    ApplyAttribution, AttributionLabel, AttributionResult, Conversion,
};
use adpilot_db::repositories::{AttributionAttemptRepo, ClickRepo, ConversionRepo};
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;

use crate::error::EngineResult;

/// What the waterfall found for one conversion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Attribution {
    pub method: AttributionMethod,
    pub click_id: Option<DbId>,
    pub confidence: f64,
}

impl Attribution {
    pub fn unattributed() -> Self {
        Self {
            method: AttributionMethod::Unattributed,
            click_id: None,
            confidence: 0.0,
        }
    }
}

/// Per-layer outcome of one waterfall run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LayerTrace {
    pub exact: LayerOutcome,
    pub fingerprint: LayerOutcome,
    pub probabilistic: LayerOutcome,
}

impl Default for LayerTrace {
    fn default() -> Self {
        Self {
            exact: LayerOutcome::Skipped,
            fingerprint: LayerOutcome::Skipped,
            probabilistic: LayerOutcome::Skipped,
        }
    }
}

/// Result of attributing one conversion.
#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
    pub conversion_id: DbId,
    pub found: Attribution,
    pub layers: LayerTrace,
    /// Whether the stored attribution changed.
    pub applied: bool,
}

/// Counts from one [`AttributionMatcher::run_batch`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: u32,
    pub exact: u32,
    pub fingerprint: u32,
    pub probabilistic: u32,
    pub unattributed: u32,
    /// Another matcher wrote first.
    pub lost_races: u32,
    pub errors: u32,
}

impl BatchSummary {
    fn record(&mut self, outcome: &MatchOutcome) {
        self.processed += 1;
        match outcome.found.method {
            AttributionMethod::Exact => self.exact += 1,
            AttributionMethod::Fingerprint => self.fingerprint += 1,
            AttributionMethod::Probabilistic => self.probabilistic += 1,
            AttributionMethod::Unattributed => self.unattributed += 1,
        }
        if !outcome.applied {
            self.lost_races += 1;
        }
    }
}

/// Links conversions to the clicks that caused them.
#[derive(Clone)]
pub struct AttributionMatcher {
    pool: PgPool,
}

impl AttributionMatcher {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attribute a conversion the matcher has not processed yet.
    ///
    /// Returns `None` without running when the conversion already carries
    /// an attribution; use [`reattribute`](Self::reattribute) to re-run.
    pub async fn attribute(&self, conversion_id: DbId) -> EngineResult<Option<MatchOutcome>> {
        let conversion = self.find_conversion(conversion_id).await?;
        if conversion.attribution_method.is_some() {
            return Ok(None);
        }
        self.attribute_conversion(&conversion).await.map(Some)
    }

    /// Re-run the waterfall; the stored attribution changes only if the new
    /// result is strictly stronger.
    pub async fn reattribute(&self, conversion_id: DbId) -> EngineResult<MatchOutcome> {
        let conversion = self.find_conversion(conversion_id).await?;
        self.attribute_conversion(&conversion).await
    }

    /// Attribute up to `limit` unprocessed conversions, oldest first.
    ///
    /// A failure on one conversion is logged and counted; the batch goes on.
    pub async fn run_batch(&self, limit: i64) -> EngineResult<BatchSummary> {
        let conversions = ConversionRepo::list_unattributed(&self.pool, limit).await?;
        let mut summary = BatchSummary::default();

        for conversion in &conversions {
            match self.attribute_conversion(conversion).await {
                Ok(outcome) => summary.record(&outcome),
                Err(e) => {
                    summary.errors += 1;
                    tracing::error!(
                        conversion_id = conversion.id,
                        error = %e,
                        "Attribution attempt failed",
                    );
                }
            }
        }

        if summary.processed > 0 || summary.errors > 0 {
            tracing::info!(
                processed = summary.processed,
                exact = summary.exact,
                fingerprint = summary.fingerprint,
                probabilistic = summary.probabilistic,
                unattributed = summary.unattributed,
                errors = summary.errors,
                "Attribution batch finished",
            );
        }
        Ok(summary)
    }

    /// The attribution query contract.
    pub async fn query(&self, conversion_id: DbId) -> EngineResult<AttributionResult> {
        ConversionRepo::attribution_result(&self.pool, conversion_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound {
                    entity: "conversion",
                    id: conversion_id,
                }
                .into()
            })
    }

    /// Attempt counts per method in `[from, to)`.
    pub async fn recovery_stats(&self, from: Timestamp, to: Timestamp) -> EngineResult<RecoveryStats> {
        if from >= to {
            return Err(CoreError::Validation("recovery stats range is empty".into()).into());
        }
        Ok(AttributionAttemptRepo::recovery_stats(&self.pool, from, to).await?)
    }

    /// Attributed conversions at or above `min_confidence`, for retraining.
    pub async fn training_labels(
        &self,
        tenant_id: Option<TenantId>,
        min_confidence: f64,
        limit: i64,
    ) -> EngineResult<Vec<AttributionLabel>> {
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(CoreError::Validation(format!(
                "min_confidence must be within 0..=1, got {min_confidence}"
            ))
            .into());
        }
        Ok(ConversionRepo::list_training_labels(&self.pool, tenant_id, min_confidence, limit).await?)
    }

    // -----------------------------------------------------------------------
    // Waterfall
    // -----------------------------------------------------------------------

    async fn find_conversion(&self, conversion_id: DbId) -> EngineResult<Conversion> {
        ConversionRepo::find_by_id(&self.pool, conversion_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound {
                    entity: "conversion",
                    id: conversion_id,
                }
                .into()
            })
    }

    async fn attribute_conversion(&self, conversion: &Conversion) -> EngineResult<MatchOutcome> {
        let started = Instant::now();
        let (found, layers) = self.evaluate(conversion, Utc::now()).await?;

        let existing = conversion.current_attribution()?;
        let mut applied = false;
        if is_stronger(found.method, found.confidence, existing) {
            let write = ApplyAttribution {
                click_id: found.click_id,
                method: found.method,
                confidence: found.confidence,
            };
            applied = ConversionRepo::apply_attribution(&self.pool, conversion.id, existing, &write)
                .await?
                .is_some();
            if !applied {
                tracing::debug!(
                    conversion_id = conversion.id,
                    "Attribution changed concurrently; keeping the stored result",
                );
            }
        }

        let latency_ms = i32::try_from(started.elapsed().as_millis()).unwrap_or(i32::MAX);
        let attempt = CreateAttributionAttempt {
            conversion_id: conversion.id,
            exact_outcome: layers.exact,
            fingerprint_outcome: layers.fingerprint,
            probabilistic_outcome: layers.probabilistic,
            matched_method: found.method,
            matched_click_id: found.click_id,
            confidence: found.confidence,
            applied,
            latency_ms,
        };
        AttributionAttemptRepo::insert(&self.pool, &attempt).await?;

        tracing::debug!(
            conversion_id = conversion.id,
            method = %found.method,
            confidence = found.confidence,
            applied,
            latency_ms,
            "Conversion attributed",
        );
        Ok(MatchOutcome {
            conversion_id: conversion.id,
            found,
            layers,
            applied,
        })
    }

    /// Run the layers in order against clicks live at `as_of`.
    async fn evaluate(
        &self,
        conversion: &Conversion,
        as_of: Timestamp,
    ) -> EngineResult<(Attribution, LayerTrace)> {
        let mut layers = LayerTrace::default();

        if let Some(click_id) = conversion.external_click_id.as_deref() {
            let hit = ClickRepo::find_exact(
                &self.pool,
                conversion.tenant_id,
                click_id,
                conversion.converted_at,
                as_of,
            )
            .await?;
            if let Some(click) = hit {
                layers.exact = LayerOutcome::Matched;
                return Ok((
                    Attribution {
                        method: AttributionMethod::Exact,
                        click_id: Some(click.id),
                        confidence: EXACT_CONFIDENCE,
                    },
                    layers,
                ));
            }
            layers.exact = LayerOutcome::Missed;
        }

        if let Some(hash) = conversion.fingerprint_hash.as_deref() {
            let candidates = ClickRepo::find_fingerprint_candidates(
                &self.pool,
                conversion.tenant_id,
                hash,
                conversion.converted_at,
                as_of,
            )
            .await?;
            if let Some(found) = best_fingerprint_match(conversion, &candidates) {
                layers.fingerprint = LayerOutcome::Matched;
                return Ok((found, layers));
            }
            layers.fingerprint = LayerOutcome::Missed;
        }

        if conversion.network_origin.is_some() || conversion.device_class.is_some() {
            let candidates = ClickRepo::find_probabilistic_candidates(
                &self.pool,
                conversion.tenant_id,
                conversion.network_origin.as_deref(),
                conversion.device_class.as_deref(),
                conversion.converted_at,
                as_of,
                PROXIMITY_WINDOW_SECS,
            )
            .await?;
            if let Some(found) = best_probabilistic_match(conversion, &candidates) {
                layers.probabilistic = LayerOutcome::Matched;
                return Ok((found, layers));
            }
            layers.probabilistic = LayerOutcome::Missed;
        }

        Ok((Attribution::unattributed(), layers))
    }
}

/// The most recent candidate wins; confidence scales with component
/// similarity and decays with elapsed time.
fn best_fingerprint_match(conversion: &Conversion, candidates: &[Click]) -> Option<Attribution> {
    let click = candidates.iter().max_by_key(|c| (c.clicked_at, c.id))?;
    let similarity = conversion.components().similarity(&click.components());
    let elapsed = conversion.converted_at - click.clicked_at;
    Some(Attribution {
        method: AttributionMethod::Fingerprint,
        click_id: Some(click.id),
        confidence: fingerprint_confidence(similarity, elapsed, click.window()),
    })
}

/// Highest-confidence candidate with at least two corroborating signals.
/// Ties go to the more recent click.
fn best_probabilistic_match(conversion: &Conversion, candidates: &[Click]) -> Option<Attribution> {
    let mut best: Option<(Attribution, Timestamp)> = None;
    for click in candidates {
        let elapsed = conversion.converted_at - click.clicked_at;
        let same_origin = matches!(
            (&conversion.network_origin, &click.network_origin),
            (Some(a), Some(b)) if a == b
        );
        let same_device = matches!(
            (&conversion.device_class, &click.device_class),
            (Some(a), Some(b)) if a == b
        );
        let signals = ProbabilisticSignals::evaluate(same_origin, same_device, elapsed);
        if !signals.is_sufficient() {
            continue;
        }
        let confidence = probabilistic_confidence(signals, elapsed, click.window());
        let better = match &best {
            None => true,
            Some((current, clicked_at)) => {
                confidence > current.confidence
                    || (confidence == current.confidence && click.clicked_at > *clicked_at)
            }
        };
        if better {
            best = Some((
                Attribution {
                    method: AttributionMethod::Probabilistic,
                    click_id: Some(click.id),
                    confidence,
                },
                click.clicked_at,
            ));
        }
    }
    best.map(|(attribution, _)| attribution)
}
