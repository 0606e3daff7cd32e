//! Repository for the append-only `attribution_attempts` log.

use adpilot_core::attribution::{AttributionMethod, LayerOutcome};
use adpilot_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::attribution_attempt::{
    AttributionAttempt, CreateAttributionAttempt, RecoveryStats,
};

const COLUMNS: &str = "\
    id, conversion_id, exact_outcome, fingerprint_outcome, probabilistic_outcome, \
    matched_method, matched_click_id, confidence, applied, latency_ms, \
    attempted_at, created_at";

pub struct AttributionAttemptRepo;

impl AttributionAttemptRepo {
    pub async fn insert(
        pool: &PgPool,
        input: &CreateAttributionAttempt,
    ) -> Result<AttributionAttempt, sqlx::Error> {
        let query = format!(
            "INSERT INTO attribution_attempts \
                 (conversion_id, exact_outcome, fingerprint_outcome, probabilistic_outcome, \
                  matched_method, matched_click_id, confidence, applied, latency_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AttributionAttempt>(&query)
            .bind(input.conversion_id)
            .bind(input.exact_outcome.as_str())
            .bind(input.fingerprint_outcome.as_str())
            .bind(input.probabilistic_outcome.as_str())
            .bind(input.matched_method.as_str())
            .bind(input.matched_click_id)
            .bind(input.confidence)
            .bind(input.applied)
            .bind(input.latency_ms)
            .fetch_one(pool)
            .await
    }

    /// All attempts for a conversion, oldest first.
    pub async fn list_for_conversion(
        pool: &PgPool,
        conversion_id: DbId,
    ) -> Result<Vec<AttributionAttempt>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM attribution_attempts \
             WHERE conversion_id = $1 ORDER BY id ASC"
        );
        sqlx::query_as::<_, AttributionAttempt>(&query)
            .bind(conversion_id)
            .fetch_all(pool)
            .await
    }

    /// Attempt counts per matched method, and per layer how often it ran
    /// and matched, in `[from, to)`.
    pub async fn recovery_stats(
        pool: &PgPool,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<RecoveryStats, sqlx::Error> {
        sqlx::query_as::<_, RecoveryStats>(
            "SELECT COUNT(*)::BIGINT AS attempts, \
                    COUNT(*) FILTER (WHERE matched_method = $3)::BIGINT AS exact, \
                    COUNT(*) FILTER (WHERE matched_method = $4)::BIGINT AS fingerprint, \
                    COUNT(*) FILTER (WHERE matched_method = $5)::BIGINT AS probabilistic, \
                    COUNT(*) FILTER (WHERE matched_method = $6)::BIGINT AS unattributed, \
                    COUNT(*) FILTER (WHERE exact_outcome <> $7)::BIGINT AS exact_attempted, \
                    COUNT(*) FILTER (WHERE exact_outcome = $8)::BIGINT AS exact_matched, \
                    COUNT(*) FILTER (WHERE fingerprint_outcome <> $7)::BIGINT \
                        AS fingerprint_attempted, \
                    COUNT(*) FILTER (WHERE fingerprint_outcome = $8)::BIGINT \
                        AS fingerprint_matched, \
                    COUNT(*) FILTER (WHERE probabilistic_outcome <> $7)::BIGINT \
                        AS probabilistic_attempted, \
                    COUNT(*) FILTER (WHERE probabilistic_outcome = $8)::BIGINT \
                        AS probabilistic_matched \
             FROM attribution_attempts \
             WHERE attempted_at >= $1 AND attempted_at < $2",
        )
        .bind(from)
        .bind(to)
        .bind(AttributionMethod::Exact.as_str())
        .bind(AttributionMethod::Fingerprint.as_str())
        .bind(AttributionMethod::Probabilistic.as_str())
        .bind(AttributionMethod::Unattributed.as_str())
        .bind(LayerOutcome::Skipped.as_str())
        .bind(LayerOutcome::Matched.as_str())
        .fetch_one(pool)
        .await
    }
}
