//! Status transitions
//!
//! Every status change goes through [`transition_with`]: the target must be a
//! successor of the current status in the entity's table, and the write is
//! checked against the version the caller read. A caller holding a stale copy
//! gets `Conflict` and the stored record is left untouched.

use flotilla_core::domain::{Lifecycle, Stateful};

use super::error::{Result, ServiceError};
use crate::repository::{self, Store};

/// Move `entity` to `target`
pub async fn transition<E: Stateful>(store: &dyn Store, entity: &E, target: E::Status) -> Result<E> {
    transition_with(store, entity, target, |_| Ok(())).await
}

/// Move `entity` to `target`, applying `mutate` in the same write
pub async fn transition_with<E, F>(
    store: &dyn Store,
    entity: &E,
    target: E::Status,
    mutate: F,
) -> Result<E>
where
    E: Stateful,
    F: FnOnce(&mut E) -> Result<()>,
{
    let from = entity.status();
    if !from.can_transition_to(target) {
        return Err(ServiceError::InvalidTransition {
            kind: E::KIND,
            id: entity.id(),
            from: from.as_str().to_string(),
            to: target.as_str().to_string(),
        });
    }

    let mut next = entity.clone();
    mutate(&mut next)?;
    next.set_status(target);

    let stored = repository::update(store, &next).await?;
    tracing::info!("{} {}: {} -> {}", E::KIND, entity.id(), from, target);
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::domain::job::{Job, JobMessage, JobStatus};
    use uuid::Uuid;

    use crate::repository::{MemoryStore, job_repository};

    async fn stored_job(store: &MemoryStore) -> Job {
        let job = Job::new(Uuid::new_v4(), Uuid::new_v4(), None, JobMessage::default());
        repository::insert(store, &job).await.unwrap()
    }

    #[tokio::test]
    async fn test_legal_transition_bumps_version() {
        let store = MemoryStore::new();
        let job = stored_job(&store).await;

        let blocked = transition(&store, &job, JobStatus::Blocked).await.unwrap();
        assert_eq!(blocked.status, JobStatus::Blocked);
        assert_eq!(blocked.version, job.version + 1);
    }

    #[tokio::test]
    async fn test_illegal_transition_is_refused() {
        let store = MemoryStore::new();
        let job = stored_job(&store).await;

        let err = transition(&store, &job, JobStatus::Success).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTransition { .. }));

        let stored = job_repository::find_by_id(&store, job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Inactive);
        assert_eq!(stored.version, job.version);
    }

    #[tokio::test]
    async fn test_stale_writer_conflicts_and_leaves_record_unchanged() {
        let store = MemoryStore::new();
        let job = stored_job(&store).await;

        transition(&store, &job, JobStatus::Blocked).await.unwrap();
        let err = transition_with(&store, &job, JobStatus::Publishing, |j| {
            j.last_error = Some("stale".to_string());
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict { .. }));

        let stored = job_repository::find_by_id(&store, job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Blocked);
        assert!(stored.last_error.is_none());
    }

    #[tokio::test]
    async fn test_failing_mutation_writes_nothing() {
        let store = MemoryStore::new();
        let job = stored_job(&store).await;

        let err = transition_with(&store, &job, JobStatus::Blocked, |_| {
            Err(ServiceError::InvalidOperation("refused".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOperation(_)));

        let stored = job_repository::find_by_id(&store, job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Inactive);
    }
}
