//! Auth token domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Entity, EntityKind};

/// Opaque bearer token resolving to an organization
///
/// Tokens are disabled rather than deleted while they may still be in use;
/// destroying one is a separate administrative action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub token: String,
    pub disabled: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuthToken {
    /// Issue a new enabled token for an organization
    pub fn issue(organization_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            token: format!(
                "{}{}",
                Uuid::new_v4().simple(),
                Uuid::new_v4().simple()
            ),
            disabled: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for AuthToken {
    const KIND: EntityKind = EntityKind::AuthToken;

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn parent_id(&self) -> Option<Uuid> {
        Some(self.organization_id)
    }
}
