//! Postgres-backed pending command store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | PendingStoreError |
//! |------------|----------------------|-------------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (other) | Any other | `Query` |
//! | PoolClosed / Io / PoolTimedOut | N/A | `Unavailable` |
//! | Other | N/A | `Query` |
//!
//! ## Acknowledgment
//!
//! `acknowledge()` is a single conditional `UPDATE`. The `acknowledged_at IS NULL`
//! predicate makes the transition monotone under concurrent callers: the row
//! count Postgres reports is exactly the number of rows that changed state.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{instrument, warn, Span};
use uuid::Uuid;

use commandrelay_core::{CommandKind, Entity, PendingCommand, PendingCommandId, TargetId};

use super::r#trait::{PendingCommandStore, PendingStoreError, PurgeCutoffs, PurgeReport};

const SELECT_COLUMNS: &str = "id, target_id, command_kind, payload, created_at, acknowledged_at";

#[derive(Debug, Clone)]
pub struct PostgresPendingCommandStore {
    pool: Arc<PgPool>,
}

impl PostgresPendingCommandStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the table and indexes if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), PendingStoreError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS pending_commands (
                id UUID PRIMARY KEY,
                target_id TEXT NOT NULL,
                command_kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                acknowledged_at TIMESTAMPTZ NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS pending_commands_target_open_idx
                ON pending_commands (target_id, created_at)
                WHERE acknowledged_at IS NULL
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS pending_commands_acknowledged_at_idx
                ON pending_commands (acknowledged_at)
                WHERE acknowledged_at IS NOT NULL
            "#,
        ];

        for sql in statements {
            sqlx::query(sql)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl PendingCommandStore for PostgresPendingCommandStore {
    #[instrument(
        skip(self, record),
        fields(pending_id = %record.id(), target = %record.target()),
        err
    )]
    async fn insert(&self, record: &PendingCommand) -> Result<(), PendingStoreError> {
        sqlx::query(
            r#"
            INSERT INTO pending_commands (id, target_id, command_kind, payload, created_at, acknowledged_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id().as_uuid())
        .bind(record.target().as_str())
        .bind(record.kind().as_str())
        .bind(record.payload())
        .bind(record.created_at())
        .bind(record.acknowledged_at())
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                PendingStoreError::Duplicate(*record.id())
            } else {
                map_sqlx_error("insert", e)
            }
        })?;

        Ok(())
    }

    #[instrument(skip(self), fields(target = %target, row_count = tracing::field::Empty), err)]
    async fn list_pending(&self, target: &TargetId, limit: usize) -> Result<Vec<PendingCommand>, PendingStoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM pending_commands \
             WHERE target_id = $1 AND acknowledged_at IS NULL \
             ORDER BY created_at ASC, id ASC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(target.as_str())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_pending", e))?;

        let records = rows
            .iter()
            .map(PendingRow::decode)
            .collect::<Result<Vec<_>, _>>()?;

        Span::current().record("row_count", records.len());
        Ok(records)
    }

    #[instrument(skip(self), fields(target = %target), err)]
    async fn has_pending(&self, target: &TargetId) -> Result<bool, PendingStoreError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM pending_commands
                WHERE target_id = $1 AND acknowledged_at IS NULL
            ) AS has_pending
            "#,
        )
        .bind(target.as_str())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("has_pending", e))?;

        row.try_get::<bool, _>("has_pending")
            .map_err(|e| PendingStoreError::Corrupt(e.to_string()))
    }

    #[instrument(skip(self, ids), fields(id_count = ids.len()), err)]
    async fn find_by_ids(&self, ids: &[PendingCommandId]) -> Result<Vec<PendingCommand>, PendingStoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!("SELECT {SELECT_COLUMNS} FROM pending_commands WHERE id = ANY($1)");
        let rows = sqlx::query(&sql)
            .bind(to_uuids(ids))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_ids", e))?;

        rows.iter().map(PendingRow::decode).collect()
    }

    #[instrument(skip(self, ids), fields(id_count = ids.len(), updated = tracing::field::Empty), err)]
    async fn acknowledge(&self, ids: &[PendingCommandId], at: DateTime<Utc>) -> Result<u64, PendingStoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE pending_commands
            SET acknowledged_at = $2
            WHERE id = ANY($1) AND acknowledged_at IS NULL
            "#,
        )
        .bind(to_uuids(ids))
        .bind(at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("acknowledge", e))?;

        let updated = result.rows_affected();
        Span::current().record("updated", updated);
        Ok(updated)
    }

    #[instrument(skip(self), err)]
    async fn purge(&self, cutoffs: PurgeCutoffs) -> Result<PurgeReport, PendingStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("purge", e))?;

        let acknowledged = sqlx::query(
            "DELETE FROM pending_commands WHERE acknowledged_at IS NOT NULL AND acknowledged_at < $1",
        )
        .bind(cutoffs.acknowledged_before)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("purge", e))?;

        let expired = sqlx::query(
            "DELETE FROM pending_commands WHERE acknowledged_at IS NULL AND created_at < $1",
        )
        .bind(cutoffs.created_before)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("purge", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("purge", e))?;

        Ok(PurgeReport {
            acknowledged_removed: acknowledged.rows_affected(),
            expired_removed: expired.rows_affected(),
        })
    }
}

fn to_uuids(ids: &[PendingCommandId]) -> Vec<Uuid> {
    ids.iter().map(|id| *id.as_uuid()).collect()
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> PendingStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            PendingStoreError::Query(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            PendingStoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            PendingStoreError::Unavailable(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::Io(e) => PendingStoreError::Unavailable(format!("io error in {}: {}", operation, e)),
        other => PendingStoreError::Query(format!("sqlx error in {}: {}", operation, other)),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct PendingRow {
    id: Uuid,
    target_id: String,
    command_kind: String,
    payload: String,
    created_at: DateTime<Utc>,
    acknowledged_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for PendingRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(PendingRow {
            id: row.try_get("id")?,
            target_id: row.try_get("target_id")?,
            command_kind: row.try_get("command_kind")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            acknowledged_at: row.try_get("acknowledged_at")?,
        })
    }
}

impl PendingRow {
    fn decode(row: &sqlx::postgres::PgRow) -> Result<PendingCommand, PendingStoreError> {
        let raw = <PendingRow as sqlx::FromRow<_>>::from_row(row)
            .map_err(|e| PendingStoreError::Corrupt(format!("failed to read pending row: {}", e)))?;
        raw.try_into()
    }
}

impl TryFrom<PendingRow> for PendingCommand {
    type Error = PendingStoreError;

    fn try_from(row: PendingRow) -> Result<Self, Self::Error> {
        let target = TargetId::parse(&row.target_id).map_err(|e| {
            warn!(pending_id = %row.id, "stored target id failed validation");
            PendingStoreError::Corrupt(e.to_string())
        })?;
        let kind: CommandKind = row
            .command_kind
            .parse()
            .map_err(|e: commandrelay_core::DomainError| PendingStoreError::Corrupt(e.to_string()))?;

        Ok(PendingCommand::from_parts(
            PendingCommandId::from_uuid(row.id),
            target,
            kind,
            row.payload,
            row.created_at,
            row.acknowledged_at,
        ))
    }
}
