//! Cloud resource provider
//!
//! The orchestrator drives cloud mutations through [`CloudProvider`]. Every
//! mutation returns an operation handle that is polled until the provider
//! reports it `DONE`.
//!
//! [`InMemoryCloud`] simulates a provider: operations finish after a fixed
//! number of polls, and failures or holds can be injected per resource name.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use flotilla_core::domain::operation::{OperationService, OperationStatus, OperationType};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

/// A mutation of one named cloud resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceRequest {
    pub service: OperationService,
    pub project_id: String,
    pub zone: String,
    /// Deployment or resource name the mutation targets
    pub name: String,
    pub body: serde_json::Value,
}

/// Provider-side handle of a started operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    pub name: String,
    pub status: OperationStatus,
}

/// Provider view of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOperation {
    pub status: OperationStatus,
    /// Only meaningful once the operation is done
    pub error: Option<String>,
}

/// Lifecycle status of one instance in a managed instance group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Provisioning,
    Staging,
    Running,
    Stopping,
    Stopped,
    Suspending,
    Suspended,
    Terminated,
}

impl InstanceStatus {
    /// Booting or running; anything else does no work
    pub fn is_working(self) -> bool {
        matches!(
            self,
            InstanceStatus::Provisioning | InstanceStatus::Staging | InstanceStatus::Running
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagedInstance {
    pub name: String,
    pub status: InstanceStatus,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{service} rejected {operation_type} of {name}: {message}")]
    Rejected {
        service: OperationService,
        operation_type: OperationType,
        name: String,
        message: String,
    },

    #[error("operation {0} not found")]
    OperationNotFound(String),
}

#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn insert(&self, request: &ResourceRequest) -> Result<OperationHandle, ProviderError>;

    async fn update(&self, request: &ResourceRequest) -> Result<OperationHandle, ProviderError>;

    async fn delete(&self, request: &ResourceRequest) -> Result<OperationHandle, ProviderError>;

    async fn get_operation(
        &self,
        service: OperationService,
        project_id: &str,
        zone: &str,
        name: &str,
    ) -> Result<RemoteOperation, ProviderError>;

    /// Instances of the managed instance group `manager`
    async fn list_managed_instances(
        &self,
        project_id: &str,
        zone: &str,
        manager: &str,
    ) -> Result<Vec<ManagedInstance>, ProviderError>;
}

/// Dispatch a request by operation type
pub async fn issue(
    cloud: &dyn CloudProvider,
    operation_type: OperationType,
    request: &ResourceRequest,
) -> Result<OperationHandle, ProviderError> {
    match operation_type {
        OperationType::Insert => cloud.insert(request).await,
        OperationType::Update => cloud.update(request).await,
        OperationType::Delete => cloud.delete(request).await,
    }
}

// =============================================================================
// Simulated Provider
// =============================================================================

/// Request recorded by the simulated provider
#[derive(Debug, Clone)]
pub struct IssuedRequest {
    pub operation_type: OperationType,
    pub request: ResourceRequest,
}

struct SimulatedOperation {
    resource: String,
    polls: u32,
    error: Option<String>,
}

#[derive(Default)]
struct SimulatedState {
    counter: u64,
    operations: HashMap<String, SimulatedOperation>,
    issued: Vec<IssuedRequest>,
    held: HashSet<String>,
    failures: HashMap<String, String>,
    rejections: HashMap<String, String>,
    instances: HashMap<String, Vec<ManagedInstance>>,
}

pub struct InMemoryCloud {
    polls_until_done: u32,
    state: Mutex<SimulatedState>,
}

impl InMemoryCloud {
    /// Operations report `DONE` on their `polls_until_done`-th poll
    pub fn new(polls_until_done: u32) -> Self {
        Self {
            polls_until_done: polls_until_done.max(1),
            state: Mutex::new(SimulatedState::default()),
        }
    }

    /// The next operation started on `resource` finishes with an error
    pub async fn fail_next(&self, resource: &str, message: &str) {
        self.state
            .lock()
            .await
            .failures
            .insert(resource.to_string(), message.to_string());
    }

    /// The next mutation of `resource` is rejected outright
    pub async fn reject_next(&self, resource: &str, message: &str) {
        self.state
            .lock()
            .await
            .rejections
            .insert(resource.to_string(), message.to_string());
    }

    /// Operations on `resource` stay `RUNNING` until released
    pub async fn hold(&self, resource: &str) {
        self.state.lock().await.held.insert(resource.to_string());
    }

    pub async fn release(&self, resource: &str) {
        self.state.lock().await.held.remove(resource);
    }

    /// Report `statuses` as the instances of `manager`; unknown managers list none
    pub async fn set_instances(&self, manager: &str, statuses: &[InstanceStatus]) {
        let instances = statuses
            .iter()
            .enumerate()
            .map(|(i, status)| ManagedInstance {
                name: format!("{}-{}", manager, i),
                status: *status,
            })
            .collect();
        self.state
            .lock()
            .await
            .instances
            .insert(manager.to_string(), instances);
    }

    /// Every request issued so far, oldest first
    pub async fn issued(&self) -> Vec<IssuedRequest> {
        self.state.lock().await.issued.clone()
    }

    async fn start(
        &self,
        operation_type: OperationType,
        request: &ResourceRequest,
    ) -> Result<OperationHandle, ProviderError> {
        let mut state = self.state.lock().await;

        if let Some(message) = state.rejections.remove(&request.name) {
            return Err(ProviderError::Rejected {
                service: request.service,
                operation_type,
                name: request.name.clone(),
                message,
            });
        }

        state.counter += 1;
        let name = format!("operation-{}-{}", state.counter, operation_type);
        let error = state.failures.remove(&request.name);
        state.operations.insert(
            name.clone(),
            SimulatedOperation {
                resource: request.name.clone(),
                polls: 0,
                error,
            },
        );
        state.issued.push(IssuedRequest {
            operation_type,
            request: request.clone(),
        });

        tracing::debug!(
            "Simulated {} {} of {} as {}",
            request.service,
            operation_type,
            request.name,
            name
        );

        Ok(OperationHandle {
            name,
            status: OperationStatus::Pending,
        })
    }
}

#[async_trait]
impl CloudProvider for InMemoryCloud {
    async fn insert(&self, request: &ResourceRequest) -> Result<OperationHandle, ProviderError> {
        self.start(OperationType::Insert, request).await
    }

    async fn update(&self, request: &ResourceRequest) -> Result<OperationHandle, ProviderError> {
        self.start(OperationType::Update, request).await
    }

    async fn delete(&self, request: &ResourceRequest) -> Result<OperationHandle, ProviderError> {
        self.start(OperationType::Delete, request).await
    }

    async fn get_operation(
        &self,
        _service: OperationService,
        _project_id: &str,
        _zone: &str,
        name: &str,
    ) -> Result<RemoteOperation, ProviderError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let operation = state
            .operations
            .get_mut(name)
            .ok_or_else(|| ProviderError::OperationNotFound(name.to_string()))?;

        if state.held.contains(&operation.resource) {
            return Ok(RemoteOperation {
                status: OperationStatus::Running,
                error: None,
            });
        }

        operation.polls += 1;
        if operation.polls >= self.polls_until_done {
            Ok(RemoteOperation {
                status: OperationStatus::Done,
                error: operation.error.clone(),
            })
        } else {
            Ok(RemoteOperation {
                status: OperationStatus::Running,
                error: None,
            })
        }
    }

    async fn list_managed_instances(
        &self,
        _project_id: &str,
        _zone: &str,
        manager: &str,
    ) -> Result<Vec<ManagedInstance>, ProviderError> {
        let state = self.state.lock().await;
        Ok(state.instances.get(manager).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(name: &str) -> ResourceRequest {
        ResourceRequest {
            service: OperationService::Deploymentmanager,
            project_id: "proj".to_string(),
            zone: "us-central1-f".to_string(),
            name: name.to_string(),
            body: json!({}),
        }
    }

    async fn poll(cloud: &InMemoryCloud, handle: &OperationHandle) -> RemoteOperation {
        cloud
            .get_operation(OperationService::Deploymentmanager, "proj", "zone", &handle.name)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_operation_finishes_after_configured_polls() {
        let cloud = InMemoryCloud::new(2);
        let handle = cloud.insert(&request("dep")).await.unwrap();
        assert_eq!(handle.status, OperationStatus::Pending);

        assert_eq!(poll(&cloud, &handle).await.status, OperationStatus::Running);
        let done = poll(&cloud, &handle).await;
        assert_eq!(done.status, OperationStatus::Done);
        assert!(done.error.is_none());
    }

    #[tokio::test]
    async fn test_injected_failure_is_reported_when_done() {
        let cloud = InMemoryCloud::new(1);
        cloud.fail_next("dep", "quota exceeded").await;
        let handle = cloud.insert(&request("dep")).await.unwrap();

        let done = poll(&cloud, &handle).await;
        assert_eq!(done.status, OperationStatus::Done);
        assert_eq!(done.error.as_deref(), Some("quota exceeded"));
    }

    #[tokio::test]
    async fn test_listed_instances_follow_the_setter() {
        let cloud = InMemoryCloud::new(1);
        assert!(cloud.list_managed_instances("proj", "zone", "ig-igm").await.unwrap().is_empty());

        cloud
            .set_instances("ig-igm", &[InstanceStatus::Running, InstanceStatus::Terminated])
            .await;
        let listed = cloud.list_managed_instances("proj", "zone", "ig-igm").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed.iter().filter(|i| i.status.is_working()).count(), 1);
    }

    #[tokio::test]
    async fn test_held_operation_keeps_running() {
        let cloud = InMemoryCloud::new(1);
        cloud.hold("dep").await;
        let handle = cloud.update(&request("dep")).await.unwrap();

        assert_eq!(poll(&cloud, &handle).await.status, OperationStatus::Running);
        cloud.release("dep").await;
        assert_eq!(poll(&cloud, &handle).await.status, OperationStatus::Done);
    }

    #[tokio::test]
    async fn test_rejection_fails_the_start_call() {
        let cloud = InMemoryCloud::new(1);
        cloud.reject_next("dep", "invalid machine type").await;

        let err = cloud.insert(&request("dep")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { .. }));
        assert!(cloud.issued().await.is_empty());
    }
}
