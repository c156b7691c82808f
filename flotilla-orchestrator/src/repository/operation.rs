//! Cloud Async Operation Repository

use flotilla_core::domain::operation::CloudAsyncOperation;
use uuid::Uuid;

use super::{Filter, Store, StoreError};

pub async fn find_by_id(
    store: &dyn Store,
    id: Uuid,
) -> Result<Option<CloudAsyncOperation>, StoreError> {
    super::find(store, id).await
}

/// Operations still tracked for an owner
pub async fn list_by_owner(
    store: &dyn Store,
    owner_id: Uuid,
) -> Result<Vec<CloudAsyncOperation>, StoreError> {
    super::list(store, &Filter::parent(owner_id)).await
}

pub async fn delete(store: &dyn Store, id: Uuid) -> Result<bool, StoreError> {
    super::delete::<CloudAsyncOperation>(store, id).await
}
