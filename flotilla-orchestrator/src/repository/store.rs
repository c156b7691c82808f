//! Durable Store
//!
//! The store persists every entity as a versioned record. Writes carry the
//! version the caller last read; a mismatch is reported as a conflict and
//! nothing is written.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flotilla_core::domain::{Entity, EntityKind};
use thiserror::Error;
use uuid::Uuid;

/// A persisted entity with the columns the store indexes
#[derive(Debug, Clone)]
pub struct Record {
    pub kind: EntityKind,
    pub id: Uuid,
    pub version: i64,
    pub status: Option<String>,
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub body: serde_json::Value,
}

impl Record {
    /// Serialize an entity into a record at its current version
    pub fn from_entity<E: Entity>(entity: &E, created_at: DateTime<Utc>) -> Result<Self, StoreError> {
        Ok(Self {
            kind: E::KIND,
            id: entity.id(),
            version: entity.version(),
            status: entity.status_label().map(str::to_string),
            parent_id: entity.parent_id(),
            created_at,
            body: serde_json::to_value(entity)?,
        })
    }

    /// Deserialize the record body; the record's version wins over the body's
    pub fn into_entity<E: Entity>(self) -> Result<E, StoreError> {
        let mut entity: E = serde_json::from_value(self.body)?;
        entity.set_version(self.version);
        Ok(entity)
    }
}

/// Query filter; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub statuses: Option<Vec<String>>,
    pub parent_id: Option<Uuid>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn parent(parent_id: Uuid) -> Self {
        Self {
            statuses: None,
            parent_id: Some(parent_id),
        }
    }

    pub fn with_statuses<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.statuses = Some(statuses.into_iter().map(Into::into).collect());
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        if let Some(parent_id) = self.parent_id {
            if record.parent_id != Some(parent_id) {
                return false;
            }
        }
        match (&self.statuses, &record.status) {
            (Some(statuses), Some(status)) => statuses.iter().any(|s| s == status),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} was modified concurrently")]
    Conflict { kind: EntityKind, id: Uuid },

    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: Uuid },

    #[error("failed to (de)serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Versioned key-value store over entity records
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, kind: EntityKind, id: Uuid) -> Result<Option<Record>, StoreError>;

    /// Write a record. `None` inserts and fails with a conflict if the id is
    /// taken; `Some(v)` replaces the record only if its stored version is `v`.
    /// Returns the stored version.
    async fn put(&self, record: Record, expected_version: Option<i64>) -> Result<i64, StoreError>;

    /// Records of a kind matching the filter, oldest first
    async fn query(&self, kind: EntityKind, filter: &Filter) -> Result<Vec<Record>, StoreError>;

    /// Returns whether a record was removed
    async fn delete(&self, kind: EntityKind, id: Uuid) -> Result<bool, StoreError>;
}
