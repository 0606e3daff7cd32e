//! Model registry models.

use adpilot_core::model_registry::ModelMetrics;
use adpilot_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// A row from the `model_versions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ModelVersion {
    pub id: DbId,
    pub family: String,
    pub version: String,
    pub artifact_path: String,
    pub metrics: Json<ModelMetrics>,
    pub is_champion: bool,
    pub promoted_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for registering a trained model.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateModelVersion {
    pub family: String,
    pub version: String,
    pub artifact_path: String,
    #[serde(default)]
    pub metrics: ModelMetrics,
}

/// Result of a champion swap.
#[derive(Debug, Clone)]
pub enum PromoteResult {
    Promoted(ModelVersion),
    /// The requested version already held the champion flag.
    AlreadyChampion(ModelVersion),
    NotFound,
}
