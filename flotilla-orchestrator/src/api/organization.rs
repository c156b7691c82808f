//! Organization API Handlers
//!
//! Administrative endpoints for organizations and their auth tokens.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use flotilla_core::domain::auth::AuthToken;
use flotilla_core::domain::organization::Organization;
use flotilla_core::dto::auth::AuthTokenSummary;
use flotilla_core::dto::organization::{AdjustTokens, CreateOrganization};
use uuid::Uuid;

use crate::api::auth::AdminAuth;
use crate::api::error::ApiResult;
use crate::service::{auth_service, organization_service};
use crate::state::AppState;

// =============================================================================
// Organizations
// =============================================================================

/// POST /organizations
pub async fn create_organization(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Json(req): Json<CreateOrganization>,
) -> ApiResult<(StatusCode, Json<Organization>)> {
    tracing::info!("Creating organization: {}", req.name);

    let org = organization_service::create(state.store(), req).await?;
    Ok((StatusCode::CREATED, Json(org)))
}

/// GET /organizations
pub async fn list_organizations(
    State(state): State<AppState>,
    _admin: AdminAuth,
) -> ApiResult<Json<Vec<Organization>>> {
    Ok(Json(organization_service::list(state.store()).await?))
}

/// GET /organizations/{id}
pub async fn get_organization(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Organization>> {
    Ok(Json(organization_service::get(state.store(), id).await?))
}

/// POST /organizations/{id}/token_amount
/// Add tokens to (or remove tokens from) an organization
pub async fn adjust_tokens(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<Uuid>,
    Json(req): Json<AdjustTokens>,
) -> ApiResult<Json<Organization>> {
    tracing::info!("Adjusting tokens of organization {} by {}", id, req.delta);

    Ok(Json(organization_service::adjust_tokens(state.store(), id, req.delta).await?))
}

// =============================================================================
// Auth Tokens
// =============================================================================

/// POST /organizations/{id}/auth_tokens
/// Issue a token; the value is only returned here
pub async fn create_auth_token(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<AuthToken>)> {
    let token = auth_service::create(state.store(), id).await?;
    Ok((StatusCode::CREATED, Json(token)))
}

/// GET /organizations/{id}/auth_tokens
pub async fn list_auth_tokens(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<AuthTokenSummary>>> {
    let tokens = auth_service::list(state.store(), id).await?;
    Ok(Json(tokens.into_iter().map(AuthTokenSummary::from).collect()))
}

/// POST /auth_tokens/{id}/disable
pub async fn disable_auth_token(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AuthTokenSummary>> {
    let token = auth_service::disable(state.store(), id).await?;
    Ok(Json(AuthTokenSummary::from(token)))
}

/// DELETE /auth_tokens/{id}
pub async fn delete_auth_token(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    auth_service::destroy(state.store(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
