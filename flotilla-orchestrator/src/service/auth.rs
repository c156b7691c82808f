//! Auth Token Service
//!
//! Bearer tokens resolve to the organization they were issued for. Disabling a
//! token is the normal way to revoke it; destroying one removes the record.

use flotilla_core::domain::EntityKind;
use flotilla_core::domain::auth::AuthToken;
use flotilla_core::domain::organization::Organization;
use uuid::Uuid;

use super::error::{Result, ServiceError};
use super::organization;
use crate::repository::{self, Store, auth_token_repository, organization_repository};

/// Issue a new token for an organization
pub async fn create(store: &dyn Store, organization_id: Uuid) -> Result<AuthToken> {
    organization::get(store, organization_id).await?;
    let token = repository::insert(store, &AuthToken::issue(organization_id)).await?;
    tracing::info!("Auth token {} issued for organization {}", token.id, organization_id);
    Ok(token)
}

pub async fn list(store: &dyn Store, organization_id: Uuid) -> Result<Vec<AuthToken>> {
    organization::get(store, organization_id).await?;
    Ok(auth_token_repository::list_by_organization(store, organization_id).await?)
}

pub async fn disable(store: &dyn Store, id: Uuid) -> Result<AuthToken> {
    let mut token = get(store, id).await?;
    if token.disabled {
        return Ok(token);
    }
    token.disabled = true;
    let token = repository::update(store, &token).await?;
    tracing::info!("Auth token {} disabled", id);
    Ok(token)
}

pub async fn destroy(store: &dyn Store, id: Uuid) -> Result<()> {
    if !repository::delete::<AuthToken>(store, id).await? {
        return Err(ServiceError::not_found(EntityKind::AuthToken, id));
    }
    tracing::info!("Auth token {} destroyed", id);
    Ok(())
}

/// Resolve a bearer token to its organization
///
/// Unknown and disabled tokens resolve to nothing.
pub async fn authenticate(store: &dyn Store, value: &str) -> Result<Option<Organization>> {
    let Some(token) = auth_token_repository::find_by_value(store, value).await? else {
        return Ok(None);
    };
    if token.disabled {
        tracing::debug!("Rejected disabled auth token {}", token.id);
        return Ok(None);
    }
    Ok(organization_repository::find_by_id(store, token.organization_id).await?)
}

async fn get(store: &dyn Store, id: Uuid) -> Result<AuthToken> {
    auth_token_repository::find_by_id(store, id)
        .await?
        .ok_or(ServiceError::not_found(EntityKind::AuthToken, id))
}
