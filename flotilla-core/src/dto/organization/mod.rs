//! Organization DTOs

use serde::{Deserialize, Serialize};

/// Request to create an organization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrganization {
    pub name: String,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub token_amount: i64,
}

/// Request to add (or, when negative, remove) tokens from an organization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustTokens {
    pub delta: i64,
}
