//! Repository for the `model_versions` table.
//!
//! The partial unique index `uq_model_versions_single_champion` guarantees
//! at most one champion per family; [`ModelVersionRepo::promote`] swaps the
//! flag inside one transaction so the index is never violated mid-swap.

use adpilot_core::types::DbId;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::model_version::{CreateModelVersion, ModelVersion, PromoteResult};

/// Column list for `model_versions` queries.
const COLUMNS: &str = "\
    id, family, version, artifact_path, metrics, is_champion, promoted_at, \
    created_at, updated_at";

/// How long a promotion waits for a competing promotion's row locks.
const PROMOTE_LOCK_TIMEOUT: &str = "5s";

/// Provides registration, lookup and champion swap for model versions.
pub struct ModelVersionRepo;

impl ModelVersionRepo {
    /// Register a new, non-champion version.
    pub async fn create(
        pool: &PgPool,
        input: &CreateModelVersion,
    ) -> Result<ModelVersion, sqlx::Error> {
        let query = format!(
            "INSERT INTO model_versions (family, version, artifact_path, metrics) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ModelVersion>(&query)
            .bind(&input.family)
            .bind(&input.version)
            .bind(&input.artifact_path)
            .bind(Json(&input.metrics))
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<ModelVersion>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM model_versions WHERE id = $1");
        sqlx::query_as::<_, ModelVersion>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find(
        pool: &PgPool,
        family: &str,
        version: &str,
    ) -> Result<Option<ModelVersion>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM model_versions WHERE family = $1 AND version = $2");
        sqlx::query_as::<_, ModelVersion>(&query)
            .bind(family)
            .bind(version)
            .fetch_optional(pool)
            .await
    }

    /// All versions in a family, newest registration first.
    pub async fn list_by_family(
        pool: &PgPool,
        family: &str,
    ) -> Result<Vec<ModelVersion>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM model_versions WHERE family = $1 \
             ORDER BY created_at DESC, id DESC"
        );
        sqlx::query_as::<_, ModelVersion>(&query)
            .bind(family)
            .fetch_all(pool)
            .await
    }

    /// The current champion of a family (if any).
    pub async fn find_champion(
        pool: &PgPool,
        family: &str,
    ) -> Result<Option<ModelVersion>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM model_versions WHERE family = $1 AND is_champion = true"
        );
        sqlx::query_as::<_, ModelVersion>(&query)
            .bind(family)
            .fetch_optional(pool)
            .await
    }

    pub async fn count_champions(pool: &PgPool, family: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*)::BIGINT FROM model_versions \
             WHERE family = $1 AND is_champion = true",
        )
        .bind(family)
        .fetch_one(pool)
        .await
    }

    /// Make `version` the champion of `family`.
    ///
    /// Locks every row of the family in id order, so concurrent promotions
    /// of the same family serialize instead of racing the unique index. Any
    /// error rolls the transaction back and leaves the prior champion in
    /// place.
    pub async fn promote(
        pool: &PgPool,
        family: &str,
        version: &str,
    ) -> Result<PromoteResult, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query(&format!("SET LOCAL lock_timeout = '{PROMOTE_LOCK_TIMEOUT}'"))
            .execute(&mut *tx)
            .await?;

        let lock_query = format!(
            "SELECT {COLUMNS} FROM model_versions WHERE family = $1 \
             ORDER BY id ASC FOR UPDATE"
        );
        let rows = sqlx::query_as::<_, ModelVersion>(&lock_query)
            .bind(family)
            .fetch_all(&mut *tx)
            .await?;

        let Some(target) = rows.into_iter().find(|v| v.version == version) else {
            tx.rollback().await?;
            return Ok(PromoteResult::NotFound);
        };
        if target.is_champion {
            tx.commit().await?;
            return Ok(PromoteResult::AlreadyChampion(target));
        }

        // Demote the current champion (if any)
        sqlx::query(
            "UPDATE model_versions SET is_champion = false \
             WHERE family = $1 AND is_champion = true",
        )
        .bind(family)
        .execute(&mut *tx)
        .await?;

        let promote_query = format!(
            "UPDATE model_versions SET is_champion = true, promoted_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        let promoted = sqlx::query_as::<_, ModelVersion>(&promote_query)
            .bind(target.id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(PromoteResult::Promoted(promoted))
    }
}
