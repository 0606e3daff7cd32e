//! PostgreSQL persistence for the change engine.
//!
//! Models live in [`models`], repositories in [`repositories`]. Migrations
//! are embedded from `db/migrations` at the workspace root.

use sqlx::postgres::PgPoolOptions;

pub mod models;
pub mod repositories;

pub type DbPool = sqlx::PgPool;

/// PostgreSQL error code for unique constraint violations.
pub const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL error code for serialization failures.
pub const SERIALIZATION_FAILURE: &str = "40001";

/// PostgreSQL error code raised when `lock_timeout` expires.
pub const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to verify connectivity.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}

/// Apply all pending migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}

/// The SQLSTATE code of a database error, if any.
pub fn error_code(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|c| c.into_owned()),
        _ => None,
    }
}

/// True if `err` is a unique violation on a constraint whose name starts
/// with `prefix`.
pub fn is_unique_violation(err: &sqlx::Error, prefix: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some(UNIQUE_VIOLATION)
                && db_err.constraint().is_some_and(|c| c.starts_with(prefix))
        }
        _ => false,
    }
}

/// True for errors caused by losing a race with a concurrent writer.
pub fn is_contention(err: &sqlx::Error) -> bool {
    matches!(
        error_code(err).as_deref(),
        Some(UNIQUE_VIOLATION | SERIALIZATION_FAILURE | LOCK_NOT_AVAILABLE)
    )
}
