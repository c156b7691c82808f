//! Cloud async operation domain types
//!
//! A `CloudAsyncOperation` mirrors one long-running mutation issued against the
//! cloud provider. It is created when an owner starts the mutation, polled by
//! watch deliveries and deleted once the owner has been finalized.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Entity, EntityKind, Lifecycle, Stateful};
use crate::status_labels;

/// Entity that started an operation and receives its finalize callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum OperationOwner {
    InstanceGroup(Uuid),
    PipelineBase(Uuid),
}

impl OperationOwner {
    pub fn id(self) -> Uuid {
        match self {
            OperationOwner::InstanceGroup(id) | OperationOwner::PipelineBase(id) => id,
        }
    }

    pub fn kind(self) -> EntityKind {
        match self {
            OperationOwner::InstanceGroup(_) => EntityKind::InstanceGroup,
            OperationOwner::PipelineBase(_) => EntityKind::PipelineBase,
        }
    }

    /// Task path invoked when the operation is done
    pub fn finalize_path(self) -> String {
        match self {
            OperationOwner::InstanceGroup(id) => format!("/instance_groups/{}/finalize_task", id),
            OperationOwner::PipelineBase(id) => format!("/pipeline_bases/{}/finalize_task", id),
        }
    }
}

impl fmt::Display for OperationOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Insert,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Insert => "insert",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider API the operation was issued against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationService {
    Deploymentmanager,
    Compute,
}

impl OperationService {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationService::Deploymentmanager => "deploymentmanager",
            OperationService::Compute => "compute",
        }
    }
}

impl fmt::Display for OperationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
}

status_labels!(OperationStatus {
    Pending => "PENDING",
    Running => "RUNNING",
    Done => "DONE",
});

impl Lifecycle for OperationStatus {
    fn successors(self) -> &'static [Self] {
        use OperationStatus::*;
        match self {
            Pending => &[Running, Done],
            Running => &[Done],
            Done => &[],
        }
    }

    fn as_str(self) -> &'static str {
        self.label()
    }
}

/// Timestamped note appended on every status change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationLog {
    pub created_at: DateTime<Utc>,
    pub message: String,
}

/// A pending long-running cloud mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudAsyncOperation {
    pub id: Uuid,
    pub owner: OperationOwner,
    /// Provider-side operation name
    pub name: String,
    pub service: OperationService,
    pub operation_type: OperationType,
    pub status: OperationStatus,
    pub finalize_path: String,
    pub project_id: String,
    pub zone: String,
    /// Error reported by the provider once the operation is done
    pub error: Option<String>,
    #[serde(default)]
    pub logs: Vec<OperationLog>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CloudAsyncOperation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner: OperationOwner,
        name: String,
        service: OperationService,
        operation_type: OperationType,
        status: OperationStatus,
        project_id: String,
        zone: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner,
            name,
            service,
            operation_type,
            status,
            finalize_path: owner.finalize_path(),
            project_id,
            zone,
            error: None,
            logs: vec![OperationLog {
                created_at: now,
                message: format!("{} {} started: {}", service, operation_type, status),
            }],
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn append_log(&mut self, message: impl Into<String>) {
        self.logs.push(OperationLog {
            created_at: Utc::now(),
            message: message.into(),
        });
    }
}

impl Entity for CloudAsyncOperation {
    const KIND: EntityKind = EntityKind::CloudAsyncOperation;

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
        Some(self.owner.id())
    }

    fn status_label(&self) -> Option<&'static str> {
        Some(self.status.label())
    }
}

impl Stateful for CloudAsyncOperation {
    type Status = OperationStatus;

    fn status(&self) -> OperationStatus {
        self.status
    }

    fn set_status(&mut self, status: OperationStatus) {
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_serializes_as_tagged_union() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(OperationOwner::PipelineBase(id)).unwrap();
        assert_eq!(json["kind"], "pipeline_base");
        assert_eq!(json["id"], id.to_string());

        let owner: OperationOwner = serde_json::from_value(json).unwrap();
        assert_eq!(owner, OperationOwner::PipelineBase(id));
    }

    #[test]
    fn test_finalize_path_follows_owner() {
        let id = Uuid::new_v4();
        let op = CloudAsyncOperation::new(
            OperationOwner::InstanceGroup(id),
            "op-1".to_string(),
            OperationService::Deploymentmanager,
            OperationType::Insert,
            OperationStatus::Pending,
            "proj".to_string(),
            "zone".to_string(),
        );
        assert_eq!(op.finalize_path, format!("/instance_groups/{}/finalize_task", id));
        assert_eq!(op.parent_id(), Some(id));
        assert_eq!(op.logs.len(), 1);
    }

    #[test]
    fn test_done_is_terminal() {
        assert!(OperationStatus::Done.is_terminal());
        assert!(OperationStatus::Pending.can_transition_to(OperationStatus::Done));
        assert!(!OperationStatus::Running.can_transition_to(OperationStatus::Pending));
        assert_eq!("RUNNING".parse::<OperationStatus>(), Ok(OperationStatus::Running));
    }
}
