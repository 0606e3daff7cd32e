//! Repository for the append-only `change_history` table.
//!
//! There is deliberately no update or delete method; the table also carries
//! a trigger that rejects both.

use adpilot_core::types::DbId;
use sqlx::{PgExecutor, PgPool};

use crate::models::change_history::{ChangeHistoryRecord, CreateChangeHistory, HistoryQuery};

/// Column list for `change_history` SELECT queries.
const COLUMNS: &str = "\
    id, change_id, tenant_id, entity_id, entity_type, change_type, \
    old_value, new_value, outcome, triggered_by, executed_by, \
    rate_limit_passed, velocity_check_passed, manual_override, \
    rejection_reason, error_message, queued_at, started_at, completed_at, \
    created_at";

/// Maximum page size for history queries.
const MAX_LIMIT: i64 = 500;

/// Default page size for history queries.
const DEFAULT_LIMIT: i64 = 50;

/// Provides append and query operations for the change audit log.
pub struct ChangeHistoryRepo;

impl ChangeHistoryRepo {
    /// Append one audit entry. Accepts a pool or an open transaction.
    pub async fn insert<'e, E>(
        executor: E,
        input: &CreateChangeHistory,
    ) -> Result<ChangeHistoryRecord, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "INSERT INTO change_history \
                 (change_id, tenant_id, entity_id, entity_type, change_type, \
                  old_value, new_value, outcome, triggered_by, executed_by, \
                  rate_limit_passed, velocity_check_passed, manual_override, \
                  rejection_reason, error_message, queued_at, started_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ChangeHistoryRecord>(&query)
            .bind(input.change_id)
            .bind(input.tenant_id)
            .bind(&input.entity_id)
            .bind(&input.entity_type)
            .bind(&input.change_type)
            .bind(input.old_value.to_json())
            .bind(input.new_value.to_json())
            .bind(input.outcome.as_str())
            .bind(&input.triggered_by)
            .bind(&input.executed_by)
            .bind(input.rate_limit_passed)
            .bind(input.velocity_check_passed)
            .bind(input.manual_override)
            .bind(&input.rejection_reason)
            .bind(&input.error_message)
            .bind(input.queued_at)
            .bind(input.started_at)
            .bind(input.completed_at)
            .fetch_one(executor)
            .await
    }

    /// All audit entries for one queued change, oldest first.
    pub async fn list_for_change(
        pool: &PgPool,
        change_id: DbId,
    ) -> Result<Vec<ChangeHistoryRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM change_history WHERE change_id = $1 ORDER BY id ASC"
        );
        sqlx::query_as::<_, ChangeHistoryRecord>(&query)
            .bind(change_id)
            .fetch_all(pool)
            .await
    }

    /// Query the audit log with optional filters, newest first.
    pub async fn query(
        pool: &PgPool,
        params: &HistoryQuery,
    ) -> Result<Vec<ChangeHistoryRecord>, sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let offset = params.offset.unwrap_or(0);

        // Build the WHERE clause and track the next bind parameter index.
        let mut conditions: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 1;

        if params.tenant_id.is_some() {
            conditions.push(format!("tenant_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.entity_id.is_some() {
            conditions.push(format!("entity_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.outcome.is_some() {
            conditions.push(format!("outcome = ${bind_idx}"));
            bind_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT {COLUMNS} FROM change_history \
             {where_clause} \
             ORDER BY created_at DESC, id DESC \
             LIMIT ${bind_idx} OFFSET ${}",
            bind_idx + 1,
        );

        let mut q = sqlx::query_as::<_, ChangeHistoryRecord>(&query);
        if let Some(tid) = params.tenant_id {
            q = q.bind(tid);
        }
        if let Some(eid) = &params.entity_id {
            q = q.bind(eid);
        }
        if let Some(outcome) = &params.outcome {
            q = q.bind(outcome);
        }
        q.bind(limit).bind(offset).fetch_all(pool).await
    }
}
