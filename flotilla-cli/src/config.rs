//! Configuration module
//!
//! Handles CLI configuration including orchestrator URL and credentials.

use flotilla_client::OrchestratorClient;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the orchestrator service
    pub orchestrator_url: String,
    /// Bearer token sent with every request
    pub token: Option<String>,
}

impl Config {
    /// Build a client for the configured orchestrator
    pub fn client(&self) -> OrchestratorClient {
        let client = OrchestratorClient::new(&self.orchestrator_url);
        match &self.token {
            Some(token) => client.with_token(token),
            None => client,
        }
    }
}
