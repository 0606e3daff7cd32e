//! Conversion models and attribution read contracts.

use adpilot_core::attribution::AttributionMethod;
use adpilot_core::error::CoreError;
use adpilot_core::fingerprint::FingerprintComponents;
use adpilot_core::types::{DbId, TenantId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// A row from the `conversions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Conversion {
    pub id: DbId,
    pub tenant_id: TenantId,
    pub event_type: String,
    pub value_cents: Option<i64>,
    pub external_click_id: Option<String>,
    pub fingerprint_hash: Option<String>,
    pub fingerprint_components: Option<Json<FingerprintComponents>>,
    pub network_origin: Option<String>,
    pub device_class: Option<String>,
    pub converted_at: Timestamp,
    pub attributed_click_id: Option<DbId>,
    pub attribution_method: Option<String>,
    pub attribution_confidence: Option<f64>,
    pub attributed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Conversion {
    /// The stored attribution, if the matcher has run.
    pub fn current_attribution(&self) -> Result<Option<(AttributionMethod, f64)>, CoreError> {
        match &self.attribution_method {
            None => Ok(None),
            Some(method) => Ok(Some((
                method.parse()?,
                self.attribution_confidence.unwrap_or(0.0),
            ))),
        }
    }

    pub fn components(&self) -> FingerprintComponents {
        self.fingerprint_components
            .as_ref()
            .map(|c| c.0.clone())
            .unwrap_or_default()
    }
}

/// DTO for inserting a conversion.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateConversion {
    pub tenant_id: TenantId,
    pub event_type: String,
    pub value_cents: Option<i64>,
    pub external_click_id: Option<String>,
    pub fingerprint_hash: Option<String>,
    pub fingerprint_components: Option<FingerprintComponents>,
    pub network_origin: Option<String>,
    pub device_class: Option<String>,
    pub converted_at: Timestamp,
}

/// New attribution to write with compare-and-swap on the previous one.
#[derive(Debug, Clone)]
pub struct ApplyAttribution {
    pub click_id: Option<DbId>,
    pub method: AttributionMethod,
    pub confidence: f64,
}

/// `{attributedClickId?, method, confidence}` for reporting collaborators.
///
/// `method` is `None` while the matcher has not yet processed the conversion.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AttributionResult {
    pub conversion_id: DbId,
    pub attributed_click_id: Option<DbId>,
    pub method: Option<String>,
    pub confidence: Option<f64>,
}

/// An attributed conversion joined to its click, used as a training label.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AttributionLabel {
    pub conversion_id: DbId,
    pub click_id: DbId,
    pub tenant_id: TenantId,
    pub campaign_id: Option<String>,
    pub ad_id: Option<String>,
    pub event_type: String,
    pub value_cents: Option<i64>,
    pub method: String,
    pub confidence: f64,
    pub clicked_at: Timestamp,
    pub converted_at: Timestamp,
}
