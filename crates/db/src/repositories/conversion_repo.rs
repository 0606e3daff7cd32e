//! Repository for the `conversions` table.

use adpilot_core::attribution::AttributionMethod;
use adpilot_core::types::{DbId, TenantId};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::conversion::{
    ApplyAttribution, AttributionLabel, AttributionResult, Conversion, CreateConversion,
};

/// Column list for `conversions` queries.
const COLUMNS: &str = "\
    id, tenant_id, event_type, value_cents, external_click_id, \
    fingerprint_hash, fingerprint_components, network_origin, device_class, \
    converted_at, attributed_click_id, attribution_method, \
    attribution_confidence, attributed_at, created_at, updated_at";

/// Maximum batch size for unattributed scans and label exports.
const MAX_LIMIT: i64 = 1_000;

/// Provides ingestion and attribution writes for conversions.
pub struct ConversionRepo;

impl ConversionRepo {
    /// Insert a conversion with no attribution.
    pub async fn create(
        pool: &PgPool,
        input: &CreateConversion,
    ) -> Result<Conversion, sqlx::Error> {
        let query = format!(
            "INSERT INTO conversions \
                 (tenant_id, event_type, value_cents, external_click_id, \
                  fingerprint_hash, fingerprint_components, network_origin, \
                  device_class, converted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Conversion>(&query)
            .bind(input.tenant_id)
            .bind(&input.event_type)
            .bind(input.value_cents)
            .bind(&input.external_click_id)
            .bind(&input.fingerprint_hash)
            .bind(input.fingerprint_components.clone().map(Json))
            .bind(&input.network_origin)
            .bind(&input.device_class)
            .bind(input.converted_at)
            .fetch_one(pool)
            .await
    }

    /// Find a conversion by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Conversion>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM conversions WHERE id = $1");
        sqlx::query_as::<_, Conversion>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Conversions the matcher has not processed yet, oldest first.
    pub async fn list_unattributed(
        pool: &PgPool,
        limit: i64,
    ) -> Result<Vec<Conversion>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM conversions \
             WHERE attribution_method IS NULL \
             ORDER BY converted_at ASC, id ASC \
             LIMIT $1"
        );
        sqlx::query_as::<_, Conversion>(&query)
            .bind(limit.clamp(1, MAX_LIMIT))
            .fetch_all(pool)
            .await
    }

    /// Write an attribution if the stored one still equals `expected`.
    ///
    /// Compare-and-swap on `(attribution_method, attribution_confidence)`:
    /// when another matcher wrote first, the update touches no row and
    /// `None` is returned. Callers decide beforehand whether the new result
    /// is strong enough to replace `expected`.
    pub async fn apply_attribution(
        pool: &PgPool,
        conversion_id: DbId,
        expected: Option<(AttributionMethod, f64)>,
        input: &ApplyAttribution,
    ) -> Result<Option<Conversion>, sqlx::Error> {
        let query = format!(
            "UPDATE conversions \
             SET attributed_click_id = $2, attribution_method = $3, \
                 attribution_confidence = $4, attributed_at = NOW() \
             WHERE id = $1 \
               AND attribution_method IS NOT DISTINCT FROM $5 \
               AND attribution_confidence IS NOT DISTINCT FROM $6 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Conversion>(&query)
            .bind(conversion_id)
            .bind(input.click_id)
            .bind(input.method.as_str())
            .bind(input.confidence)
            .bind(expected.map(|(method, _)| method.as_str()))
            .bind(expected.map(|(_, confidence)| confidence))
            .fetch_optional(pool)
            .await
    }

    /// The attribution query contract for one conversion.
    pub async fn attribution_result(
        pool: &PgPool,
        conversion_id: DbId,
    ) -> Result<Option<AttributionResult>, sqlx::Error> {
        sqlx::query_as::<_, AttributionResult>(
            "SELECT id AS conversion_id, attributed_click_id, \
                    attribution_method AS method, attribution_confidence AS confidence \
             FROM conversions WHERE id = $1",
        )
        .bind(conversion_id)
        .fetch_optional(pool)
        .await
    }

    /// Attributed conversions joined to their clicks, newest first.
    pub async fn list_training_labels(
        pool: &PgPool,
        tenant_id: Option<TenantId>,
        min_confidence: f64,
        limit: i64,
    ) -> Result<Vec<AttributionLabel>, sqlx::Error> {
        sqlx::query_as::<_, AttributionLabel>(
            "SELECT cv.id AS conversion_id, ck.id AS click_id, cv.tenant_id, \
                    ck.campaign_id, ck.ad_id, cv.event_type, cv.value_cents, \
                    cv.attribution_method AS method, \
                    cv.attribution_confidence AS confidence, \
                    ck.clicked_at, cv.converted_at \
             FROM conversions cv \
             JOIN clicks ck ON ck.id = cv.attributed_click_id \
             WHERE ($1::BIGINT IS NULL OR cv.tenant_id = $1) \
               AND cv.attribution_confidence >= $2 \
             ORDER BY cv.converted_at DESC, cv.id DESC \
             LIMIT $3",
        )
        .bind(tenant_id)
        .bind(min_confidence)
        .bind(limit.clamp(1, MAX_LIMIT))
        .fetch_all(pool)
        .await
    }
}
