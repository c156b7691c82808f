//! Organization Repository

use flotilla_core::domain::organization::Organization;
use uuid::Uuid;

use super::{Filter, Store, StoreError};

pub async fn find_by_id(store: &dyn Store, id: Uuid) -> Result<Option<Organization>, StoreError> {
    super::find(store, id).await
}

pub async fn list_all(store: &dyn Store) -> Result<Vec<Organization>, StoreError> {
    super::list(store, &Filter::all()).await
}
