//! Champion/challenger model registry.

use adpilot_core::error::CoreError;
use adpilot_core::model_registry::{validate_name, ModelMetrics};
use adpilot_db::models::model_version::{CreateModelVersion, ModelVersion, PromoteResult};
use adpilot_db::repositories::ModelVersionRepo;
use sqlx::PgPool;

use crate::error::{classify_unique, EngineError, EngineResult};

/// Outcome of a promotion request.
#[derive(Debug, Clone)]
pub enum Promotion {
    /// The version is now champion; the previous champion was demoted.
    Promoted(ModelVersion),
    /// The version already was champion. Nothing changed.
    Unchanged(ModelVersion),
    /// A concurrent promotion won. The prior champion is unchanged; retry.
    Conflict,
}

impl Promotion {
    pub fn is_success(&self) -> bool {
        !matches!(self, Promotion::Conflict)
    }
}

/// Registry service over `model_versions`.
#[derive(Clone)]
pub struct ModelRegistry {
    pool: PgPool,
}

impl ModelRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a trained version as a challenger.
    ///
    /// A duplicate `(family, version)` is [`CoreError::Conflict`].
    pub async fn register(
        &self,
        family: &str,
        version: &str,
        artifact_path: &str,
        metrics: ModelMetrics,
    ) -> EngineResult<ModelVersion> {
        validate_name("family", family)?;
        validate_name("version", version)?;
        if artifact_path.trim().is_empty() {
            return Err(CoreError::Validation("artifact_path must not be empty".into()).into());
        }
        metrics.validate()?;

        let input = CreateModelVersion {
            family: family.to_string(),
            version: version.to_string(),
            artifact_path: artifact_path.to_string(),
            metrics,
        };
        let created = ModelVersionRepo::create(&self.pool, &input)
            .await
            .map_err(|e| classify_unique(e, &format!("model version {family}/{version}")))?;

        tracing::info!(
            model_version_id = created.id,
            family,
            version,
            "Model version registered",
        );
        Ok(created)
    }

    /// Make `version` the champion of `family`.
    ///
    /// An unknown version is [`CoreError::NotFound`]. Losing a race with a
    /// concurrent promotion yields [`Promotion::Conflict`] and leaves the
    /// prior champion in place.
    pub async fn promote(&self, family: &str, version: &str) -> EngineResult<Promotion> {
        let result = match ModelVersionRepo::promote(&self.pool, family, version).await {
            Ok(result) => result,
            Err(e) if adpilot_db::is_contention(&e) => {
                tracing::warn!(family, version, error = %e, "Promotion lost to a concurrent swap");
                return Ok(Promotion::Conflict);
            }
            Err(e) => return Err(e.into()),
        };

        match result {
            PromoteResult::Promoted(champion) => {
                tracing::info!(
                    model_version_id = champion.id,
                    family,
                    version,
                    "Model promoted to champion",
                );
                self.verify_single_champion(family).await?;
                Ok(Promotion::Promoted(champion))
            }
            PromoteResult::AlreadyChampion(champion) => Ok(Promotion::Unchanged(champion)),
            PromoteResult::NotFound => Err(CoreError::NotFoundByKey {
                entity: "model_version",
                key: format!("{family}/{version}"),
            }
            .into()),
        }
    }

    pub async fn find_champion(&self, family: &str) -> EngineResult<Option<ModelVersion>> {
        Ok(ModelVersionRepo::find_champion(&self.pool, family).await?)
    }

    pub async fn find(&self, family: &str, version: &str) -> EngineResult<Option<ModelVersion>> {
        Ok(ModelVersionRepo::find(&self.pool, family, version).await?)
    }

    pub async fn list_family(&self, family: &str) -> EngineResult<Vec<ModelVersion>> {
        Ok(ModelVersionRepo::list_by_family(&self.pool, family).await?)
    }

    /// Check that a family has at most one champion.
    ///
    /// The partial unique index makes a second champion impossible; seeing
    /// one is logged as an integrity violation and returned as an error.
    pub async fn verify_single_champion(&self, family: &str) -> EngineResult<()> {
        let champions = ModelVersionRepo::count_champions(&self.pool, family).await?;
        if champions > 1 {
            tracing::error!(integrity = true, family, champions, "Multiple champions observed");
            return Err(EngineError::Integrity(format!(
                "family {family} has {champions} champions"
            )));
        }
        Ok(())
    }
}
