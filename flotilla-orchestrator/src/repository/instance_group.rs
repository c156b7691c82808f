//! Instance Group Repository

use flotilla_core::domain::instance_group::InstanceGroup;
use uuid::Uuid;

use super::{Filter, Store, StoreError};

pub async fn find_by_id(store: &dyn Store, id: Uuid) -> Result<Option<InstanceGroup>, StoreError> {
    super::find(store, id).await
}

pub async fn list_by_base(
    store: &dyn Store,
    pipeline_base_id: Uuid,
) -> Result<Vec<InstanceGroup>, StoreError> {
    super::list(store, &Filter::parent(pipeline_base_id)).await
}
