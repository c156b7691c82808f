//! Pipeline Repository

use flotilla_core::domain::pipeline::{Pipeline, PipelineStatus};
use uuid::Uuid;

use super::{Filter, Store, StoreError};

pub async fn find_by_id(store: &dyn Store, id: Uuid) -> Result<Option<Pipeline>, StoreError> {
    super::find(store, id).await
}

/// Find a pipeline only if it belongs to the organization
pub async fn find_owned(
    store: &dyn Store,
    organization_id: Uuid,
    id: Uuid,
) -> Result<Option<Pipeline>, StoreError> {
    Ok(find_by_id(store, id)
        .await?
        .filter(|p| p.organization_id == organization_id))
}

pub async fn list_by_organization(
    store: &dyn Store,
    organization_id: Uuid,
) -> Result<Vec<Pipeline>, StoreError> {
    super::list(store, &Filter::parent(organization_id)).await
}

pub async fn list_by_status(
    store: &dyn Store,
    statuses: &[PipelineStatus],
) -> Result<Vec<Pipeline>, StoreError> {
    super::list(
        store,
        &Filter::all().with_statuses(statuses.iter().map(|s| s.label())),
    )
    .await
}
