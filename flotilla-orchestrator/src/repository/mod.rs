//! Repository Module
//!
//! Data access layer for the orchestrator.
//! The [`Store`] trait is the only shared mutable resource; the generic helpers
//! here map entities to records and each submodule adds the queries a
//! specific domain entity needs.

pub mod auth_token;
pub mod instance_group;
pub mod job;
pub mod memory;
pub mod operation;
pub mod organization;
pub mod pipeline;
pub mod pipeline_base;
pub mod postgres;
pub mod store;

// Re-export for convenience
pub use auth_token as auth_token_repository;
pub use instance_group as instance_group_repository;
pub use job as job_repository;
pub use memory::MemoryStore;
pub use operation as operation_repository;
pub use organization as organization_repository;
pub use pipeline as pipeline_repository;
pub use pipeline_base as pipeline_base_repository;
pub use postgres::PgStore;
pub use store::{Filter, Record, Store, StoreError};

use chrono::Utc;
use flotilla_core::domain::Entity;
use uuid::Uuid;

/// Find an entity by id
pub async fn find<E: Entity>(store: &dyn Store, id: Uuid) -> Result<Option<E>, StoreError> {
    match store.get(E::KIND, id).await? {
        Some(record) => Ok(Some(record.into_entity()?)),
        None => Ok(None),
    }
}

/// Find an entity by id, failing when it does not exist
pub async fn get<E: Entity>(store: &dyn Store, id: Uuid) -> Result<E, StoreError> {
    find(store, id).await?.ok_or(StoreError::NotFound { kind: E::KIND, id })
}

/// Insert a new entity; fails with a conflict if the id is taken
pub async fn insert<E: Entity>(store: &dyn Store, entity: &E) -> Result<E, StoreError> {
    let now = Utc::now();
    let mut entity = entity.clone();
    entity.touch(now);
    let version = store.put(Record::from_entity(&entity, now)?, None).await?;
    entity.set_version(version);
    Ok(entity)
}

/// Write an entity back, provided nobody else wrote it since it was read
pub async fn update<E: Entity>(store: &dyn Store, entity: &E) -> Result<E, StoreError> {
    let now = Utc::now();
    let mut entity = entity.clone();
    entity.touch(now);
    let expected = entity.version();
    let version = store
        .put(Record::from_entity(&entity, now)?, Some(expected))
        .await?;
    entity.set_version(version);
    Ok(entity)
}

/// List entities matching a filter, oldest first
pub async fn list<E: Entity>(store: &dyn Store, filter: &Filter) -> Result<Vec<E>, StoreError> {
    store
        .query(E::KIND, filter)
        .await?
        .into_iter()
        .map(Record::into_entity)
        .collect()
}

/// Delete an entity by id
pub async fn delete<E: Entity>(store: &dyn Store, id: Uuid) -> Result<bool, StoreError> {
    store.delete(E::KIND, id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::domain::organization::Organization;

    #[tokio::test]
    async fn test_update_bumps_version() {
        let store = MemoryStore::new();
        let org = insert(&store, &Organization::new("acme", None, 10)).await.unwrap();
        assert_eq!(org.version, 0);

        let mut changed = org.clone();
        changed.token_amount = 5;
        let changed = update(&store, &changed).await.unwrap();
        assert_eq!(changed.version, 1);

        let stored: Organization = get(&store, org.id).await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.token_amount, 5);
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = MemoryStore::new();
        let org = insert(&store, &Organization::new("acme", None, 10)).await.unwrap();

        let mut first = org.clone();
        first.token_amount = 1;
        update(&store, &first).await.unwrap();

        let mut second = org.clone();
        second.token_amount = 2;
        let err = update(&store, &second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let stored: Organization = get(&store, org.id).await.unwrap();
        assert_eq!(stored.token_amount, 1);
    }
}
