//! Request Authentication
//!
//! Extractors resolving the `Authorization: Bearer` header. Organization
//! endpoints take an auth token issued to the organization; admin and task
//! endpoints take the configured admin token.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use flotilla_core::domain::organization::Organization;

use crate::api::error::ApiError;
use crate::service::auth_service;
use crate::state::AppState;

/// Organization owning the presented auth token
pub struct OrgAuth(pub Organization);

/// Caller presented the admin token
pub struct AdminAuth;

fn bearer(parts: &Parts) -> Result<&str, ApiError> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))
}

impl FromRequestParts<AppState> for OrgAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer(parts)?;
        match auth_service::authenticate(state.store(), token).await? {
            Some(org) => Ok(OrgAuth(org)),
            None => Err(ApiError::Unauthorized("Invalid or disabled token".to_string())),
        }
    }
}

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.admin_token.as_deref() else {
            return Err(ApiError::Unauthorized(
                "Admin endpoints are disabled".to_string(),
            ));
        };
        if bearer(parts)? != expected {
            return Err(ApiError::Unauthorized("Invalid admin token".to_string()));
        }
        Ok(AdminAuth)
    }
}
