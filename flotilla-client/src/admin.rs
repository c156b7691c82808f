//! Administrative API endpoints
//!
//! These require the client to carry the orchestrator's admin token.

use crate::OrchestratorClient;
use crate::error::Result;
use flotilla_core::domain::auth::AuthToken;
use flotilla_core::domain::organization::Organization;
use flotilla_core::dto::auth::AuthTokenSummary;
use flotilla_core::dto::organization::{AdjustTokens, CreateOrganization};
use reqwest::Method;
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Organizations
    // =============================================================================

    pub async fn create_organization(&self, req: CreateOrganization) -> Result<Organization> {
        let response = self
            .request(Method::POST, "/organizations")
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn list_organizations(&self) -> Result<Vec<Organization>> {
        let response = self.request(Method::GET, "/organizations").send().await?;

        self.handle_response(response).await
    }

    pub async fn get_organization(&self, organization_id: Uuid) -> Result<Organization> {
        let path = format!("/organizations/{}", organization_id);
        let response = self.request(Method::GET, &path).send().await?;

        self.handle_response(response).await
    }

    /// Add tokens to an organization, or remove them with a negative delta
    pub async fn adjust_tokens(&self, organization_id: Uuid, delta: i64) -> Result<Organization> {
        let path = format!("/organizations/{}/token_amount", organization_id);
        let response = self
            .request(Method::POST, &path)
            .json(&AdjustTokens { delta })
            .send()
            .await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Auth Tokens
    // =============================================================================

    /// Issue an auth token; the value is only returned by this call
    pub async fn create_auth_token(&self, organization_id: Uuid) -> Result<AuthToken> {
        let path = format!("/organizations/{}/auth_tokens", organization_id);
        let response = self.request(Method::POST, &path).send().await?;

        self.handle_response(response).await
    }

    pub async fn list_auth_tokens(&self, organization_id: Uuid) -> Result<Vec<AuthTokenSummary>> {
        let path = format!("/organizations/{}/auth_tokens", organization_id);
        let response = self.request(Method::GET, &path).send().await?;

        self.handle_response(response).await
    }

    pub async fn disable_auth_token(&self, token_id: Uuid) -> Result<AuthTokenSummary> {
        let path = format!("/auth_tokens/{}/disable", token_id);
        let response = self.request(Method::POST, &path).send().await?;

        self.handle_response(response).await
    }

    pub async fn delete_auth_token(&self, token_id: Uuid) -> Result<()> {
        let path = format!("/auth_tokens/{}", token_id);
        let response = self.request(Method::DELETE, &path).send().await?;

        self.handle_empty_response(response).await
    }
}
