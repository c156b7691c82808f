//! Async Operation Tracker
//!
//! Wraps every long-running cloud mutation in a [`CloudAsyncOperation`]. The
//! owner allocates the operation id and records it on itself before the
//! mutation starts, so the first watch delivery always finds an owner that
//! expects it. Watches are at-least-once: the DONE claim is a version-checked
//! write, and an operation that is already gone reports `done` without calling
//! its owner back.

use flotilla_core::domain::operation::{
    CloudAsyncOperation, OperationOwner, OperationStatus, OperationType,
};
use flotilla_core::task::Task;
use uuid::Uuid;

use super::error::{Result, ServiceError};
use super::transition::transition_with;
use super::{instance_group, pipeline_base};
use crate::provider::ResourceRequest;
use crate::provider::cloud;
use crate::repository::{self, operation_repository};
use crate::state::AppState;

/// Result of one watch delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOutcome {
    pub done: bool,
    pub error: Option<String>,
}

impl WatchOutcome {
    fn pending() -> Self {
        Self {
            done: false,
            error: None,
        }
    }

    fn finished(error: Option<String>) -> Self {
        Self { done: true, error }
    }
}

/// Issue a cloud mutation for `owner` and start watching it
///
/// A rejected start call is returned as [`ServiceError::Provider`] and nothing
/// is recorded; the owner decides which error status that maps to.
pub async fn start(
    state: &AppState,
    id: Uuid,
    owner: OperationOwner,
    operation_type: OperationType,
    request: &ResourceRequest,
) -> Result<CloudAsyncOperation> {
    let handle = cloud::issue(state.cloud.as_ref(), operation_type, request).await?;

    // DONE is only ever written by the watch that finalizes the owner
    let status = match handle.status {
        OperationStatus::Done => OperationStatus::Running,
        other => other,
    };

    let mut operation = CloudAsyncOperation::new(
        owner,
        handle.name,
        request.service,
        operation_type,
        status,
        request.project_id.clone(),
        request.zone.clone(),
    );
    operation.id = id;

    let operation = repository::insert(state.store(), &operation).await?;
    state.enqueue(Task::WatchOperation(operation.id)).await?;

    tracing::info!(
        "Started {} {} of {} for {} as operation {}",
        operation.service,
        operation.operation_type,
        request.name,
        owner,
        operation.id
    );

    Ok(operation)
}

/// Poll an operation once, finalizing its owner when it is done
pub async fn watch(state: &AppState, id: Uuid) -> Result<WatchOutcome> {
    let Some(operation) = operation_repository::find_by_id(state.store(), id).await? else {
        tracing::debug!("Operation {} is already finalized", id);
        return Ok(WatchOutcome::finished(None));
    };

    if operation.status == OperationStatus::Done {
        // Claimed by an earlier delivery that did not get to finish
        tracing::warn!("Resuming finalize of operation {}", id);
        finalize_owner(state, &operation).await?;
        operation_repository::delete(state.store(), id).await?;
        return Ok(WatchOutcome::finished(operation.error));
    }

    let remote = state
        .cloud
        .get_operation(
            operation.service,
            &operation.project_id,
            &operation.zone,
            &operation.name,
        )
        .await?;

    if remote.status != OperationStatus::Done {
        if remote.status != operation.status {
            let from = operation.status;
            match transition_with(state.store(), &operation, remote.status, |op| {
                op.append_log(format!("{} -> {}", from, remote.status));
                Ok(())
            })
            .await
            {
                Ok(_) | Err(ServiceError::Conflict { .. }) => {}
                Err(ServiceError::InvalidTransition { .. }) => {
                    tracing::warn!(
                        "Operation {} reported {} after {}, ignoring",
                        id,
                        remote.status,
                        from
                    );
                }
                Err(e) => return Err(e),
            }
        }
        tracing::debug!("Operation {} is {}", id, remote.status);
        return Ok(WatchOutcome::pending());
    }

    let error = remote.error.clone();
    let claimed = match transition_with(state.store(), &operation, OperationStatus::Done, |op| {
        op.error = remote.error.clone();
        match &remote.error {
            Some(message) => op.append_log(format!("{} -> DONE: {}", operation.status, message)),
            None => op.append_log(format!("{} -> DONE", operation.status)),
        }
        Ok(())
    })
    .await
    {
        Ok(claimed) => claimed,
        Err(ServiceError::Conflict { .. }) => {
            // Another delivery wrote first; the next watch sees its result
            tracing::warn!("Operation {} was claimed concurrently", id);
            return Ok(WatchOutcome::pending());
        }
        Err(e) => return Err(e),
    };

    finalize_owner(state, &claimed).await?;
    operation_repository::delete(state.store(), id).await?;

    match &error {
        Some(message) => tracing::warn!("Operation {} failed: {}", id, message),
        None => tracing::info!("Operation {} is done", id),
    }

    Ok(WatchOutcome::finished(error))
}

async fn finalize_owner(state: &AppState, operation: &CloudAsyncOperation) -> Result<()> {
    match operation.owner {
        OperationOwner::InstanceGroup(id) => instance_group::finalize(state, id, operation).await,
        OperationOwner::PipelineBase(id) => {
            pipeline_base::finalize_operation(state, id, operation).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::domain::instance_group::InstanceGroupStatus;
    use flotilla_core::domain::pipeline_base::PipelineBaseStatus;

    use crate::repository::{instance_group_repository, pipeline_base_repository};
    use crate::service::testing::Harness;

    #[tokio::test]
    async fn test_watch_of_missing_operation_is_done() {
        let h = Harness::new().await;
        let outcome = watch(&h.state, Uuid::new_v4()).await.unwrap();
        assert_eq!(outcome, WatchOutcome::finished(None));
    }

    #[tokio::test]
    async fn test_watch_finalizes_once() {
        let h = Harness::with_polls(2).await;
        let pipeline = h.create_pipeline("etl", 1).await;
        let base_id = pipeline.curr_base_id.unwrap();

        // BuildPipeline opens the base and starts its deployment
        h.deliver_next().await;
        let base = pipeline_base_repository::find_by_id(h.store(), base_id)
            .await
            .unwrap()
            .unwrap();
        let operation_id = base.operation_id.unwrap();
        h.queue.clear().await;

        let first = watch(&h.state, operation_id).await.unwrap();
        assert!(!first.done);
        let stored = operation_repository::find_by_id(h.store(), operation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OperationStatus::Running);
        assert_eq!(stored.logs.len(), 2);

        let second = watch(&h.state, operation_id).await.unwrap();
        assert!(second.done);
        assert!(
            operation_repository::find_by_id(h.store(), operation_id)
                .await
                .unwrap()
                .is_none()
        );

        let base = pipeline_base_repository::find_by_id(h.store(), base_id)
            .await
            .unwrap()
            .unwrap();
        let ig_id = base.instance_group_id.unwrap();
        let version = base.version;

        // A duplicate delivery neither calls back nor touches the base
        let third = watch(&h.state, operation_id).await.unwrap();
        assert_eq!(third, WatchOutcome::finished(None));
        let base = pipeline_base_repository::find_by_id(h.store(), base_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(base.version, version);
        assert_eq!(base.instance_group_id, Some(ig_id));
        assert_eq!(
            instance_group_repository::list_by_base(h.store(), base_id)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_provider_error_reaches_the_owner() {
        let h = Harness::new().await;
        let pipeline = h.create_pipeline("etl", 1).await;
        let base_id = pipeline.curr_base_id.unwrap();
        h.cloud.fail_next("etl-1-ig", "zone exhausted").await;

        h.drain().await;

        let base = pipeline_base_repository::find_by_id(h.store(), base_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(base.status, PipelineBaseStatus::OpeningError);
        assert_eq!(base.last_error.as_deref(), Some("zone exhausted"));

        let ig = instance_group_repository::find_by_id(h.store(), base.instance_group_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ig.status, InstanceGroupStatus::ConstructingError);
        assert!(ig.operation_id.is_none());
    }

    #[tokio::test]
    async fn test_claimed_operation_is_finalized_on_redelivery() {
        let h = Harness::new().await;
        let pipeline = h.create_pipeline("etl", 1).await;
        let base_id = pipeline.curr_base_id.unwrap();
        h.deliver_next().await;

        let base = pipeline_base_repository::find_by_id(h.store(), base_id)
            .await
            .unwrap()
            .unwrap();
        let operation_id = base.operation_id.unwrap();
        let operation = operation_repository::find_by_id(h.store(), operation_id)
            .await
            .unwrap()
            .unwrap();

        // Simulate a delivery that claimed the operation and then died
        crate::service::transition::transition(h.store(), &operation, OperationStatus::Done)
            .await
            .unwrap();

        let outcome = watch(&h.state, operation_id).await.unwrap();
        assert!(outcome.done);
        let base = pipeline_base_repository::find_by_id(h.store(), base_id)
            .await
            .unwrap()
            .unwrap();
        assert!(base.instance_group_id.is_some());
        assert!(base.operation_id.is_none());
    }
}
