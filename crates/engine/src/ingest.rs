//! Click and conversion ingestion.
//!
//! Derived fields are resolved here once and stored: a click's expiry, the
//! fingerprint hash, network origin and device class. Nothing downstream
//! recomputes them.

use adpilot_core::attribution::default_window;
use adpilot_core::error::CoreError;
use adpilot_core::fingerprint::FingerprintComponents;
use adpilot_core::types::{TenantId, Timestamp};
use adpilot_db::models::click::{Click, CreateClick};
use adpilot_db::models::conversion::{Conversion, CreateConversion};
use adpilot_db::repositories::{ClickRepo, ConversionRepo};
use chrono::TimeDelta;
use serde::Deserialize;
use sqlx::PgPool;

use crate::error::EngineResult;

/// Conversion event types accepted by the store.
pub const EVENT_TYPES: &[&str] = &["purchase", "lead"];

/// A click event as received from tracking.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClickEvent {
    pub tenant_id: TenantId,
    pub platform_click_id: Option<String>,
    /// Which platform issued the click id (`gclid`, `fbclid`, ...).
    pub click_id_source: Option<String>,
    pub campaign_id: Option<String>,
    pub ad_id: Option<String>,
    /// Precomputed hash. Computed from `fingerprint` when absent.
    pub fingerprint_hash: Option<String>,
    pub fingerprint: Option<FingerprintComponents>,
    pub clicked_at: Timestamp,
}

/// A conversion event as received from tracking.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversionEvent {
    pub tenant_id: TenantId,
    pub event_type: String,
    pub value_cents: Option<i64>,
    pub external_click_id: Option<String>,
    pub fingerprint_hash: Option<String>,
    pub fingerprint: Option<FingerprintComponents>,
    pub converted_at: Timestamp,
}

/// Fingerprint-derived columns shared by clicks and conversions.
struct FingerprintFields {
    hash: Option<String>,
    components: Option<FingerprintComponents>,
    network_origin: Option<String>,
    device_class: Option<String>,
}

fn fingerprint_fields(
    hash: Option<&str>,
    components: Option<&FingerprintComponents>,
) -> FingerprintFields {
    let components = components.filter(|c| !c.is_empty()).cloned();
    let hash = hash
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .or_else(|| components.as_ref().and_then(FingerprintComponents::hash));
    FingerprintFields {
        network_origin: components.as_ref().and_then(FingerprintComponents::network_origin),
        device_class: components
            .as_ref()
            .and_then(FingerprintComponents::device_class)
            .map(|d| d.as_str().to_string()),
        hash,
        components,
    }
}

/// Writes clicks and conversions with their derived fields.
#[derive(Clone)]
pub struct ClickStore {
    pool: PgPool,
    attribution_window: TimeDelta,
}

impl ClickStore {
    /// Create a store using the default 7-day attribution window.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            attribution_window: default_window(),
        }
    }

    /// Override the attribution window applied to newly recorded clicks.
    /// Clicks already stored keep the expiry they were created with.
    pub fn with_attribution_window(mut self, window: TimeDelta) -> Self {
        self.attribution_window = window;
        self
    }

    pub fn attribution_window(&self) -> TimeDelta {
        self.attribution_window
    }

    pub async fn record_click(&self, event: &ClickEvent) -> EngineResult<Click> {
        if self.attribution_window <= TimeDelta::zero() {
            return Err(CoreError::Validation("attribution window must be positive".into()).into());
        }
        let fp = fingerprint_fields(event.fingerprint_hash.as_deref(), event.fingerprint.as_ref());
        let input = CreateClick {
            tenant_id: event.tenant_id,
            platform_click_id: non_blank(event.platform_click_id.as_deref()),
            click_id_source: event.click_id_source.clone(),
            campaign_id: event.campaign_id.clone(),
            ad_id: event.ad_id.clone(),
            fingerprint_hash: fp.hash,
            fingerprint_components: fp.components,
            network_origin: fp.network_origin,
            device_class: fp.device_class,
            clicked_at: event.clicked_at,
            expires_at: event.clicked_at + self.attribution_window,
        };
        let click = ClickRepo::create(&self.pool, &input).await?;
        tracing::debug!(
            click_id = click.id,
            tenant_id = click.tenant_id,
            expires_at = %click.expires_at,
            "Click recorded",
        );
        Ok(click)
    }

    pub async fn record_conversion(&self, event: &ConversionEvent) -> EngineResult<Conversion> {
        if !EVENT_TYPES.contains(&event.event_type.as_str()) {
            return Err(CoreError::Validation(format!(
                "event_type must be one of {EVENT_TYPES:?}, got '{}'",
                event.event_type
            ))
            .into());
        }
        if event.value_cents.is_some_and(|v| v < 0) {
            return Err(CoreError::Validation("value_cents must not be negative".into()).into());
        }
        let fp = fingerprint_fields(event.fingerprint_hash.as_deref(), event.fingerprint.as_ref());
        let input = CreateConversion {
            tenant_id: event.tenant_id,
            event_type: event.event_type.clone(),
            value_cents: event.value_cents,
            external_click_id: non_blank(event.external_click_id.as_deref()),
            fingerprint_hash: fp.hash,
            fingerprint_components: fp.components,
            network_origin: fp.network_origin,
            device_class: fp.device_class,
            converted_at: event.converted_at,
        };
        let conversion = ConversionRepo::create(&self.pool, &input).await?;
        tracing::debug!(
            conversion_id = conversion.id,
            tenant_id = conversion.tenant_id,
            "Conversion recorded",
        );
        Ok(conversion)
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
