//! Auth Token Repository

use flotilla_core::domain::auth::AuthToken;
use uuid::Uuid;

use super::{Filter, Store, StoreError};

pub async fn find_by_id(store: &dyn Store, id: Uuid) -> Result<Option<AuthToken>, StoreError> {
    super::find(store, id).await
}

/// Find a token by its opaque value
pub async fn find_by_value(store: &dyn Store, value: &str) -> Result<Option<AuthToken>, StoreError> {
    let tokens: Vec<AuthToken> = super::list(store, &Filter::all()).await?;
    Ok(tokens.into_iter().find(|t| t.token == value))
}

pub async fn list_by_organization(
    store: &dyn Store,
    organization_id: Uuid,
) -> Result<Vec<AuthToken>, StoreError> {
    super::list(store, &Filter::parent(organization_id)).await
}
