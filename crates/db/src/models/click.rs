//! Click store models. Clicks are append-only.

use adpilot_core::fingerprint::FingerprintComponents;
use adpilot_core::types::{DbId, TenantId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// A row from the `clicks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Click {
    pub id: DbId,
    pub tenant_id: TenantId,
    pub platform_click_id: Option<String>,
    pub click_id_source: Option<String>,
    pub campaign_id: Option<String>,
    pub ad_id: Option<String>,
    pub fingerprint_hash: Option<String>,
    pub fingerprint_components: Option<Json<FingerprintComponents>>,
    pub network_origin: Option<String>,
    pub device_class: Option<String>,
    pub clicked_at: Timestamp,
    pub expires_at: Timestamp,
    pub created_at: Timestamp,
}

impl Click {
    /// The attribution window this click was created with.
    pub fn window(&self) -> chrono::TimeDelta {
        self.expires_at - self.clicked_at
    }

    /// True once `at` reaches `expires_at`.
    pub fn is_expired_at(&self, at: Timestamp) -> bool {
        at >= self.expires_at
    }

    pub fn components(&self) -> FingerprintComponents {
        self.fingerprint_components
            .as_ref()
            .map(|c| c.0.clone())
            .unwrap_or_default()
    }
}

/// DTO for inserting a click. Derived fields (`expires_at`, hash, origin,
/// device class) are resolved by the ingestion layer.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateClick {
    pub tenant_id: TenantId,
    pub platform_click_id: Option<String>,
    pub click_id_source: Option<String>,
    pub campaign_id: Option<String>,
    pub ad_id: Option<String>,
    pub fingerprint_hash: Option<String>,
    pub fingerprint_components: Option<FingerprintComponents>,
    pub network_origin: Option<String>,
    pub device_class: Option<String>,
    pub clicked_at: Timestamp,
    pub expires_at: Timestamp,
}
