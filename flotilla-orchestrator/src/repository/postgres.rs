//! PostgreSQL store
//!
//! Persists records in the `entities` table. Updates are conditional on the
//! stored version so concurrent writers cannot overwrite each other.

use async_trait::async_trait;
use flotilla_core::domain::EntityKind;
use sqlx::PgPool;
use uuid::Uuid;

use super::store::{Filter, Record, Store, StoreError};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get(&self, kind: EntityKind, id: Uuid) -> Result<Option<Record>, StoreError> {
        let row = sqlx::query_as::<_, EntityRow>(
            r#"
            SELECT id, version, status, parent_id, body, created_at
            FROM entities
            WHERE kind = $1 AND id = $2
            "#,
        )
        .bind(kind.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_record(kind)))
    }

    async fn put(&self, record: Record, expected_version: Option<i64>) -> Result<i64, StoreError> {
        let now = chrono::Utc::now();

        match expected_version {
            None => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO entities (kind, id, version, status, parent_id, body, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    ON CONFLICT (kind, id) DO NOTHING
                    "#,
                )
                .bind(record.kind.as_str())
                .bind(record.id)
                .bind(record.version)
                .bind(&record.status)
                .bind(record.parent_id)
                .bind(&record.body)
                .bind(record.created_at)
                .bind(now)
                .execute(&self.pool)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(StoreError::Conflict {
                        kind: record.kind,
                        id: record.id,
                    });
                }
                Ok(record.version)
            }
            Some(expected) => {
                let next = expected + 1;
                let result = sqlx::query(
                    r#"
                    UPDATE entities
                    SET version = $1, status = $2, parent_id = $3, body = $4, updated_at = $5
                    WHERE kind = $6 AND id = $7 AND version = $8
                    "#,
                )
                .bind(next)
                .bind(&record.status)
                .bind(record.parent_id)
                .bind(&record.body)
                .bind(now)
                .bind(record.kind.as_str())
                .bind(record.id)
                .bind(expected)
                .execute(&self.pool)
                .await?;

                if result.rows_affected() == 1 {
                    return Ok(next);
                }

                // Nothing matched: either the version moved on or the record is gone
                match self.get(record.kind, record.id).await? {
                    Some(_) => Err(StoreError::Conflict {
                        kind: record.kind,
                        id: record.id,
                    }),
                    None => Err(StoreError::NotFound {
                        kind: record.kind,
                        id: record.id,
                    }),
                }
            }
        }
    }

    async fn query(&self, kind: EntityKind, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        let rows = sqlx::query_as::<_, EntityRow>(
            r#"
            SELECT id, version, status, parent_id, body, created_at
            FROM entities
            WHERE kind = $1
              AND ($2::uuid IS NULL OR parent_id = $2)
              AND ($3::text[] IS NULL OR status = ANY($3))
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(kind.as_str())
        .bind(filter.parent_id)
        .bind(filter.statuses.clone())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_record(kind)).collect())
    }

    async fn delete(&self, kind: EntityKind, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM entities WHERE kind = $1 AND id = $2")
            .bind(kind.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct EntityRow {
    id: Uuid,
    version: i64,
    status: Option<String>,
    parent_id: Option<Uuid>,
    body: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl EntityRow {
    fn into_record(self, kind: EntityKind) -> Record {
        Record {
            kind,
            id: self.id,
            version: self.version,
            status: self.status,
            parent_id: self.parent_id,
            created_at: self.created_at,
            body: self.body,
        }
    }
}
