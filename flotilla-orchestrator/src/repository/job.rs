//! Job Repository

use chrono::{DateTime, Utc};
use flotilla_core::domain::job::{Job, JobStatus};
use uuid::Uuid;

use super::{Filter, Store, StoreError};

pub async fn find_by_id(store: &dyn Store, id: Uuid) -> Result<Option<Job>, StoreError> {
    super::find(store, id).await
}

/// Jobs of a base, optionally restricted to some statuses
pub async fn list_by_base(
    store: &dyn Store,
    pipeline_base_id: Uuid,
    statuses: Option<&[JobStatus]>,
) -> Result<Vec<Job>, StoreError> {
    let mut filter = Filter::parent(pipeline_base_id);
    if let Some(statuses) = statuses {
        filter = filter.with_statuses(statuses.iter().map(|s| s.label()));
    }
    super::list(store, &filter).await
}

/// Jobs across every base of a pipeline, oldest first
pub async fn list_by_pipeline(
    store: &dyn Store,
    pipeline_id: Uuid,
    base_ids: &[Uuid],
) -> Result<Vec<Job>, StoreError> {
    let mut jobs = Vec::new();
    for base_id in base_ids {
        jobs.extend(
            list_by_base(store, *base_id, None)
                .await?
                .into_iter()
                .filter(|j| j.pipeline_id == pipeline_id),
        );
    }
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(jobs)
}

/// Whether any job of the base keeps it busy
pub async fn has_active(store: &dyn Store, pipeline_base_id: Uuid) -> Result<bool, StoreError> {
    Ok(!list_by_base(store, pipeline_base_id, Some(JobStatus::ACTIVE))
        .await?
        .is_empty())
}

/// Most recent finish time among the base's jobs
pub async fn last_finished_at(
    store: &dyn Store,
    pipeline_base_id: Uuid,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    let finished = list_by_base(
        store,
        pipeline_base_id,
        Some(&[JobStatus::Success, JobStatus::Failure][..]),
    )
    .await?;
    Ok(finished.iter().filter_map(|j| j.finished_at).max())
}
