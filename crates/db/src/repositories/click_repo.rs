//! Repository for the append-only `clicks` table.
//!
//! Every candidate lookup applies the same expiry filter: the click must
//! precede the conversion, must still be inside its window at conversion
//! time, and must not have expired by `as_of` (the moment matching runs).

use adpilot_core::types::{DbId, TenantId, Timestamp};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::click::{Click, CreateClick};

/// Column list for `clicks` queries.
const COLUMNS: &str = "\
    id, tenant_id, platform_click_id, click_id_source, campaign_id, ad_id, \
    fingerprint_hash, fingerprint_components, network_origin, device_class, \
    clicked_at, expires_at, created_at";

/// Candidate filter shared by every matching query.
///
/// `$1` tenant, `$2` conversion time, `$3` matching time.
const LIVE_CANDIDATE: &str = "\
    tenant_id = $1 \
    AND clicked_at <= $2 \
    AND expires_at > $2 \
    AND expires_at > $3";

/// Upper bound on fingerprint candidates considered per conversion.
const MAX_FINGERPRINT_CANDIDATES: i64 = 20;

/// Upper bound on probabilistic candidates considered per conversion.
const MAX_PROBABILISTIC_CANDIDATES: i64 = 50;

/// Provides ingestion and candidate lookups for clicks.
pub struct ClickRepo;

impl ClickRepo {
    /// Insert a click. `expires_at` is stored as given and never recomputed.
    pub async fn create(pool: &PgPool, input: &CreateClick) -> Result<Click, sqlx::Error> {
        let query = format!(
            "INSERT INTO clicks \
                 (tenant_id, platform_click_id, click_id_source, campaign_id, ad_id, \
                  fingerprint_hash, fingerprint_components, network_origin, device_class, \
                  clicked_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Click>(&query)
            .bind(input.tenant_id)
            .bind(&input.platform_click_id)
            .bind(&input.click_id_source)
            .bind(&input.campaign_id)
            .bind(&input.ad_id)
            .bind(&input.fingerprint_hash)
            .bind(input.fingerprint_components.clone().map(Json))
            .bind(&input.network_origin)
            .bind(&input.device_class)
            .bind(input.clicked_at)
            .bind(input.expires_at)
            .fetch_one(pool)
            .await
    }

    /// Find a click by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Click>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM clicks WHERE id = $1");
        sqlx::query_as::<_, Click>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Most recent live click carrying the given platform click id.
    pub async fn find_exact(
        pool: &PgPool,
        tenant_id: TenantId,
        platform_click_id: &str,
        converted_at: Timestamp,
        as_of: Timestamp,
    ) -> Result<Option<Click>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM clicks \
             WHERE {LIVE_CANDIDATE} AND platform_click_id = $4 \
             ORDER BY clicked_at DESC, id DESC \
             LIMIT 1"
        );
        sqlx::query_as::<_, Click>(&query)
            .bind(tenant_id)
            .bind(converted_at)
            .bind(as_of)
            .bind(platform_click_id)
            .fetch_optional(pool)
            .await
    }

    /// Live clicks with the given fingerprint hash, most recent first.
    pub async fn find_fingerprint_candidates(
        pool: &PgPool,
        tenant_id: TenantId,
        fingerprint_hash: &str,
        converted_at: Timestamp,
        as_of: Timestamp,
    ) -> Result<Vec<Click>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM clicks \
             WHERE {LIVE_CANDIDATE} AND fingerprint_hash = $4 \
             ORDER BY clicked_at DESC, id DESC \
             LIMIT $5"
        );
        sqlx::query_as::<_, Click>(&query)
            .bind(tenant_id)
            .bind(converted_at)
            .bind(as_of)
            .bind(fingerprint_hash)
            .bind(MAX_FINGERPRINT_CANDIDATES)
            .fetch_all(pool)
            .await
    }

    /// Live clicks sharing at least one probabilistic signal that could
    /// reach the two-signal minimum: same network origin, or same device
    /// class within the proximity window.
    ///
    /// Scoring happens in the caller; this only narrows the search.
    pub async fn find_probabilistic_candidates(
        pool: &PgPool,
        tenant_id: TenantId,
        network_origin: Option<&str>,
        device_class: Option<&str>,
        converted_at: Timestamp,
        as_of: Timestamp,
        proximity_secs: i64,
    ) -> Result<Vec<Click>, sqlx::Error> {
        if network_origin.is_none() && device_class.is_none() {
            return Ok(Vec::new());
        }
        let query = format!(
            "SELECT {COLUMNS} FROM clicks \
             WHERE {LIVE_CANDIDATE} \
               AND ((network_origin IS NOT NULL AND network_origin = $4) \
                    OR (device_class IS NOT NULL AND device_class = $5 \
                        AND clicked_at >= $2 - make_interval(secs => $6))) \
             ORDER BY clicked_at DESC, id DESC \
             LIMIT $7"
        );
        sqlx::query_as::<_, Click>(&query)
            .bind(tenant_id)
            .bind(converted_at)
            .bind(as_of)
            .bind(network_origin)
            .bind(device_class)
            .bind(proximity_secs as f64)
            .bind(MAX_PROBABILISTIC_CANDIDATES)
            .fetch_all(pool)
            .await
    }
}
