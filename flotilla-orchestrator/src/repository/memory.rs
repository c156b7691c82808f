//! In-memory store
//!
//! Used by tests and by standalone runs without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use flotilla_core::domain::EntityKind;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::store::{Filter, Record, Store, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<(EntityKind, Uuid), Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, kind: EntityKind, id: Uuid) -> Result<Option<Record>, StoreError> {
        Ok(self.records.read().await.get(&(kind, id)).cloned())
    }

    async fn put(&self, mut record: Record, expected_version: Option<i64>) -> Result<i64, StoreError> {
        let mut records = self.records.write().await;
        let key = (record.kind, record.id);

        match (expected_version, records.get(&key)) {
            (None, Some(_)) => {
                return Err(StoreError::Conflict {
                    kind: record.kind,
                    id: record.id,
                });
            }
            (None, None) => {}
            (Some(_), None) => {
                return Err(StoreError::NotFound {
                    kind: record.kind,
                    id: record.id,
                });
            }
            (Some(expected), Some(current)) => {
                if current.version != expected {
                    return Err(StoreError::Conflict {
                        kind: record.kind,
                        id: record.id,
                    });
                }
                record.version = expected + 1;
                // Creation time is owned by the first write
                record.created_at = current.created_at;
            }
        }

        let version = record.version;
        records.insert(key, record);
        Ok(version)
    }

    async fn query(&self, kind: EntityKind, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        let records = self.records.read().await;
        let mut matching: Vec<Record> = records
            .values()
            .filter(|r| r.kind == kind && filter.matches(r))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(matching)
    }

    async fn delete(&self, kind: EntityKind, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(&(kind, id)).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn record(id: Uuid, status: &str) -> Record {
        Record {
            kind: EntityKind::Job,
            id,
            version: 0,
            status: Some(status.to_string()),
            parent_id: None,
            created_at: Utc::now(),
            body: json!({}),
        }
    }

    #[tokio::test]
    async fn test_insert_twice_conflicts() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();

        assert_eq!(store.put(record(id, "inactive"), None).await.unwrap(), 0);
        let err = store.put(record(id, "inactive"), None).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_stale_version_leaves_record_unchanged() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.put(record(id, "inactive"), None).await.unwrap();

        assert_eq!(store.put(record(id, "blocked"), Some(0)).await.unwrap(), 1);
        let err = store.put(record(id, "publishing"), Some(0)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let stored = store.get(EntityKind::Job, id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.status.as_deref(), Some("blocked"));
    }

    #[tokio::test]
    async fn test_query_filters_by_status_and_kind() {
        let store = MemoryStore::new();
        store.put(record(Uuid::new_v4(), "blocked"), None).await.unwrap();
        store.put(record(Uuid::new_v4(), "success"), None).await.unwrap();

        let blocked = store
            .query(EntityKind::Job, &Filter::all().with_statuses(["blocked"]))
            .await
            .unwrap();
        assert_eq!(blocked.len(), 1);

        let bases = store.query(EntityKind::PipelineBase, &Filter::all()).await.unwrap();
        assert!(bases.is_empty());
    }

    #[tokio::test]
    async fn test_update_of_missing_record_is_not_found() {
        let store = MemoryStore::new();
        let err = store.put(record(Uuid::new_v4(), "blocked"), Some(0)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
