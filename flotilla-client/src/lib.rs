//! Flotilla HTTP Client
//!
//! A simple, type-safe HTTP client for communicating with the Flotilla orchestrator API.
//!
//! Requests are authenticated with a bearer token: an organization auth token
//! for pipeline and job endpoints, the admin token for organization endpoints.
//!
//! # Example
//!
//! ```no_run
//! use flotilla_client::OrchestratorClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OrchestratorClient::new("http://localhost:8080").with_token("secret");
//!
//!     for pipeline in client.list_pipelines().await? {
//!         println!("{} {}", pipeline.name, pipeline.status);
//!     }
//!     Ok(())
//! }
//! ```

mod admin;
pub mod error;
mod jobs;
mod pipelines;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use reqwest::StatusCode;

use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;

/// HTTP client for the Flotilla orchestrator API
///
/// This client provides methods for all orchestrator API endpoints, organized
/// into logical groups:
/// - Pipeline management (create, list, show, update, close, destroy)
/// - Job submission, readiness and runner reports
/// - Organization and auth token administration
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    /// Bearer token sent with every request
    token: Option<String>,
    /// HTTP client instance
    client: Client,
}

impl OrchestratorClient {
    /// Create a new orchestrator client
    ///
    /// # Example
    /// ```
    /// use flotilla_client::OrchestratorClient;
    ///
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new orchestrator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            client,
        }
    }

    /// Authenticate every request with `token`
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("{} {}", method, url);
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    ///
    /// This method checks the status code and returns an appropriate error if
    /// the request failed, or deserializes the response body if successful.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            return Err(Self::api_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Handle an API response that returns no content (e.g., DELETE operations)
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        Ok(())
    }

    /// Build an error from a failed response
    async fn api_error(response: reqwest::Response) -> ClientError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        ClientError::from_body(status, &body)
    }
}
