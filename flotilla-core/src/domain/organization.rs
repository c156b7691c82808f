//! Organization domain types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Entity, EntityKind};

/// A tenant owning pipelines and a token budget
///
/// `token_amount` is only mutated by spend accounting when instance groups
/// change size; organizations are never deleted automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub memo: Option<String>,
    pub token_amount: i64,
    /// Last operation charged per instance group, written with the balance
    #[serde(default)]
    pub settlements: BTreeMap<Uuid, Uuid>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: impl Into<String>, memo: Option<String>, token_amount: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            memo,
            token_amount,
            settlements: BTreeMap::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Organization {
    /// Whether the charge of `operation_id` was already applied to the balance
    pub fn has_settled(&self, instance_group_id: Uuid, operation_id: Uuid) -> bool {
        self.settlements.get(&instance_group_id) == Some(&operation_id)
    }
}

impl Entity for Organization {
    const KIND: EntityKind = EntityKind::Organization;

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
}
