//! Auth token DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::auth::AuthToken;

/// Auth token as listed to administrators; the value is only shown on creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthTokenSummary {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
}

impl From<AuthToken> for AuthTokenSummary {
    fn from(token: AuthToken) -> Self {
        AuthTokenSummary {
            id: token.id,
            organization_id: token.organization_id,
            disabled: token.disabled,
            created_at: token.created_at,
        }
    }
}
