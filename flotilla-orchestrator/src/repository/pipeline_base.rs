//! Pipeline Base Repository

use flotilla_core::domain::pipeline_base::{PipelineBase, PipelineBaseStatus};
use uuid::Uuid;

use super::{Filter, Store, StoreError};

pub async fn find_by_id(store: &dyn Store, id: Uuid) -> Result<Option<PipelineBase>, StoreError> {
    super::find(store, id).await
}

pub async fn list_by_pipeline(
    store: &dyn Store,
    pipeline_id: Uuid,
) -> Result<Vec<PipelineBase>, StoreError> {
    super::list(store, &Filter::parent(pipeline_id)).await
}

pub async fn list_by_status(
    store: &dyn Store,
    statuses: &[PipelineBaseStatus],
) -> Result<Vec<PipelineBase>, StoreError> {
    super::list(
        store,
        &Filter::all().with_statuses(statuses.iter().map(|s| s.label())),
    )
    .await
}
