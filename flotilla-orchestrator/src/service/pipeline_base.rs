//! Pipeline Base Controller
//!
//! Owns the lifecycle of one deployed environment: opening its messaging
//! deployment and instance group, cycling through hibernation, and closing
//! everything down in reverse order.
//!
//! The base reacts to two kinds of events:
//! - its own cloud operations finishing ([`finalize_operation`])
//! - its instance group settling ([`on_instance_group_changed`])
//!
//! Every status change is announced to the pipeline through a `BaseChanged`
//! task rather than a direct call.

use chrono::Utc;
use flotilla_core::domain::EntityKind;
use flotilla_core::domain::instance_group::{InstanceGroup, InstanceGroupStatus};
use flotilla_core::domain::job::JobStatus;
use flotilla_core::domain::operation::{CloudAsyncOperation, OperationOwner, OperationType};
use flotilla_core::domain::pipeline_base::{PipelineBase, PipelineBaseStatus};
use flotilla_core::task::Task;
use uuid::Uuid;

use super::error::{Result, ServiceError};
use super::transition::{transition, transition_with};
use super::{instance_group, job, operation};
use crate::provider::deployment;
use crate::repository::{self, instance_group_repository, job_repository, pipeline_base_repository};
use crate::state::AppState;

pub async fn get(state: &AppState, id: Uuid) -> Result<PipelineBase> {
    pipeline_base_repository::find_by_id(state.store(), id)
        .await?
        .ok_or(ServiceError::not_found(EntityKind::PipelineBase, id))
}

// =============================================================================
// Opening
// =============================================================================

/// Start deploying the base's messaging resources
///
/// Only the first call on an `opening` base issues anything.
pub async fn open(state: &AppState, id: Uuid) -> Result<PipelineBase> {
    let base = get(state, id).await?;
    if base.status != PipelineBaseStatus::Opening {
        tracing::debug!("Pipeline base {} is {}, not opening it", id, base.status);
        return Ok(base);
    }
    if base.operation_id.is_some() || base.instance_group_id.is_some() {
        tracing::debug!("Pipeline base {} is already opening", id);
        return Ok(base);
    }

    let operation_id = Uuid::new_v4();
    let mut next = base.clone();
    next.operation_id = Some(operation_id);
    let base = repository::update(state.store(), &next).await?;

    tracing::info!("Opening pipeline base {} ({})", base.name, base.id);
    let request = deployment::base_deployment(&base);
    match operation::start(
        state,
        operation_id,
        OperationOwner::PipelineBase(base.id),
        OperationType::Insert,
        &request,
    )
    .await
    {
        Ok(_) => Ok(base),
        Err(ServiceError::Provider(err)) => {
            fail(state, &base, PipelineBaseStatus::OpeningError, err.to_string()).await
        }
        Err(e) => Err(e),
    }
}

/// Apply the outcome of an operation the base owns
pub async fn finalize_operation(
    state: &AppState,
    id: Uuid,
    operation: &CloudAsyncOperation,
) -> Result<()> {
    let Some(base) = pipeline_base_repository::find_by_id(state.store(), id).await? else {
        tracing::warn!("Operation {} finished for missing pipeline base {}", operation.id, id);
        return Ok(());
    };
    if base.operation_id != Some(operation.id) {
        tracing::warn!("Ignoring stale operation {} for pipeline base {}", operation.id, id);
        return Ok(());
    }

    match (base.status, operation.operation_type, &operation.error) {
        (PipelineBaseStatus::Opening, OperationType::Insert, Some(message)) => {
            fail(state, &base, PipelineBaseStatus::OpeningError, message.clone()).await?;
        }
        (PipelineBaseStatus::Opening, OperationType::Insert, None) => {
            let mut next = base.clone();
            next.operation_id = None;
            next.instance_group_id = Some(Uuid::new_v4());
            let base = repository::update(state.store(), &next).await?;
            construct_instance_group(state, &base).await?;
        }
        (PipelineBaseStatus::Closing, OperationType::Insert, _) => {
            // Closed while the deployment was still being created
            let mut next = base.clone();
            next.operation_id = None;
            let base = repository::update(state.store(), &next).await?;
            advance_closing(state, &base).await?;
        }
        (PipelineBaseStatus::Closing, OperationType::Delete, Some(message)) => {
            fail(state, &base, PipelineBaseStatus::ClosingError, message.clone()).await?;
        }
        (PipelineBaseStatus::Closing, OperationType::Delete, None) => {
            let base = transition_with(state.store(), &base, PipelineBaseStatus::Closed, |b| {
                b.operation_id = None;
                b.last_error = None;
                Ok(())
            })
            .await?;
            notify(state, &base).await?;
        }
        (status, operation_type, _) => {
            tracing::warn!(
                "Pipeline base {} did not expect a finished {} while {}",
                id,
                operation_type,
                status
            );
            let mut next = base.clone();
            next.operation_id = None;
            repository::update(state.store(), &next).await?;
        }
    }

    Ok(())
}

async fn construct_instance_group(state: &AppState, base: &PipelineBase) -> Result<()> {
    match instance_group::construct(state, base).await {
        Ok(_) => Ok(()),
        Err(ServiceError::InvalidOperation(message)) => {
            fail(state, base, PipelineBaseStatus::OpeningError, message).await?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

// =============================================================================
// Instance Group Events
// =============================================================================

/// React to the base's instance group reaching a new status
pub async fn on_instance_group_changed(state: &AppState, instance_group_id: Uuid) -> Result<()> {
    let Some(ig) = instance_group_repository::find_by_id(state.store(), instance_group_id).await?
    else {
        tracing::debug!("Instance group {} no longer exists", instance_group_id);
        return Ok(());
    };
    let Some(base) = pipeline_base_repository::find_by_id(state.store(), ig.pipeline_base_id).await?
    else {
        tracing::debug!("Pipeline base {} no longer exists", ig.pipeline_base_id);
        return Ok(());
    };
    if base.instance_group_id != Some(ig.id) {
        tracing::warn!("Instance group {} does not belong to base {}", ig.id, base.id);
        return Ok(());
    }

    use InstanceGroupStatus as Ig;
    use PipelineBaseStatus as Base;

    match (base.status, ig.status) {
        (Base::Opening, status) if status.is_settled() => {
            become_awake(state, &base).await?;
        }
        (Base::Opening, Ig::ConstructingError) => {
            let message = failure_message(&ig, "instance group construction failed");
            fail(state, &base, Base::OpeningError, message).await?;
        }
        (Base::Waking, status) if status.is_settled() => {
            if ig.instance_size == base.config.instance_group.instance_size {
                become_awake(state, &base).await?;
            } else if let Some(message) = &ig.last_error {
                fail(state, &base, Base::WakingError, message.clone()).await?;
            } else {
                tracing::debug!("Pipeline base {} is still waking", base.id);
            }
        }
        (Base::HibernationGoing, status) if status.is_settled() => {
            if ig.instance_size == 0 {
                become_hibernating(state, &base).await?;
            } else if let Some(message) = &ig.last_error {
                fail(state, &base, Base::HibernationGoingError, message.clone()).await?;
            } else {
                tracing::debug!("Pipeline base {} is still going to hibernate", base.id);
            }
        }
        (Base::Closing, Ig::DestructingError) => {
            let message = failure_message(&ig, "instance group destruction failed");
            fail(state, &base, Base::ClosingError, message).await?;
        }
        (Base::Closing, _) => {
            advance_closing(state, &base).await?;
        }
        (base_status, ig_status) => {
            tracing::debug!(
                "Pipeline base {} ignores instance group {} while {}",
                base.id,
                ig_status,
                base_status
            );
        }
    }

    Ok(())
}

fn failure_message(ig: &InstanceGroup, fallback: &str) -> String {
    ig.last_error.clone().unwrap_or_else(|| fallback.to_string())
}

async fn become_awake(state: &AppState, base: &PipelineBase) -> Result<PipelineBase> {
    let base = transition_with(state.store(), base, PipelineBaseStatus::Awake, |b| {
        b.awoke_at = Some(Utc::now());
        b.last_error = None;
        Ok(())
    })
    .await?;
    job::release_blocked(state, base.id).await?;
    notify(state, &base).await?;
    Ok(base)
}

async fn become_hibernating(state: &AppState, base: &PipelineBase) -> Result<PipelineBase> {
    let base = transition(state.store(), base, PipelineBaseStatus::Hibernating).await?;
    notify(state, &base).await?;

    let blocked = job_repository::list_by_base(state.store(), base.id, Some(&[JobStatus::Blocked][..])).await?;
    if blocked.is_empty() {
        return Ok(base);
    }
    tracing::info!(
        "Pipeline base {} hibernated with {} blocked jobs, waking it",
        base.id,
        blocked.len()
    );
    wake(state, base.id).await
}

// =============================================================================
// Hibernation Cycle
// =============================================================================

/// Bring a hibernating base back to its configured size
pub async fn wake(state: &AppState, id: Uuid) -> Result<PipelineBase> {
    let base = get(state, id).await?;
    if base.status != PipelineBaseStatus::Hibernating {
        tracing::debug!("Pipeline base {} is {}, not waking it", id, base.status);
        return Ok(base);
    }

    let base = transition(state.store(), &base, PipelineBaseStatus::Waking).await?;
    notify(state, &base).await?;
    let size = base.config.instance_group.instance_size;
    resize(state, &base, size, PipelineBaseStatus::WakingError).await
}

/// Scale an idle base down to zero instances
pub async fn hibernate(state: &AppState, base: &PipelineBase) -> Result<PipelineBase> {
    let base = transition(state.store(), base, PipelineBaseStatus::HibernationGoing).await?;
    notify(state, &base).await?;
    resize(state, &base, 0, PipelineBaseStatus::HibernationGoingError).await
}

/// Cancel a pending hibernation check
pub async fn cancel_hibernation(state: &AppState, base: &PipelineBase) -> Result<PipelineBase> {
    let base = transition(state.store(), base, PipelineBaseStatus::Awake).await?;
    notify(state, &base).await?;
    Ok(base)
}

async fn resize(
    state: &AppState,
    base: &PipelineBase,
    instance_size: u32,
    failure: PipelineBaseStatus,
) -> Result<PipelineBase> {
    let Some(ig_id) = base.instance_group_id else {
        let message = format!("pipeline base {} has no instance group", base.id);
        return fail(state, base, failure, message).await;
    };

    let ig = instance_group::get(state, ig_id).await?;
    if ig.status.is_settled() && ig.instance_size == instance_size {
        // Nothing to issue; let the group event settle the base
        state.enqueue(Task::InstanceGroupChanged(ig.id)).await?;
        return Ok(base.clone());
    }

    match instance_group::resize(state, ig.id, instance_size).await {
        Ok(_) => Ok(base.clone()),
        Err(ServiceError::InvalidOperation(message)) => fail(state, base, failure, message).await,
        Err(e) => Err(e),
    }
}

// =============================================================================
// Closing
// =============================================================================

/// Start tearing the base down
///
/// Bases in the middle of a resize refuse with `InvalidTransition`; the
/// pipeline closes them once they settle.
pub async fn close(state: &AppState, id: Uuid) -> Result<PipelineBase> {
    let base = get(state, id).await?;
    match base.status {
        PipelineBaseStatus::Closed | PipelineBaseStatus::Closing => Ok(base),
        PipelineBaseStatus::OpeningError
            if base.instance_group_id.is_none() && base.operation_id.is_none() =>
        {
            // The messaging deployment was never created
            let base = transition(state.store(), &base, PipelineBaseStatus::Closed).await?;
            notify(state, &base).await?;
            Ok(base)
        }
        _ => {
            let base = transition_with(state.store(), &base, PipelineBaseStatus::Closing, |b| {
                b.last_error = None;
                Ok(())
            })
            .await?;
            notify(state, &base).await?;
            advance_closing(state, &base).await
        }
    }
}

/// Take the next teardown step: instance group first, then the deployment
async fn advance_closing(state: &AppState, base: &PipelineBase) -> Result<PipelineBase> {
    if base.status != PipelineBaseStatus::Closing {
        return Ok(base.clone());
    }
    if base.operation_id.is_some() {
        tracing::debug!("Pipeline base {} waits for its operation before closing", base.id);
        return Ok(base.clone());
    }

    let ig = match base.instance_group_id {
        Some(id) => instance_group_repository::find_by_id(state.store(), id).await?,
        None => None,
    };

    if let Some(ig) = ig {
        match ig.status {
            InstanceGroupStatus::Constructing
            | InstanceGroupStatus::Resizing
            | InstanceGroupStatus::Destructing => {
                tracing::debug!(
                    "Pipeline base {} waits for instance group {} ({})",
                    base.id,
                    ig.id,
                    ig.status
                );
                return Ok(base.clone());
            }
            InstanceGroupStatus::Constructed
            | InstanceGroupStatus::HealthCheckError
            | InstanceGroupStatus::ConstructingError
            | InstanceGroupStatus::DestructingError => {
                instance_group::destruct(state, ig.id).await?;
                return Ok(base.clone());
            }
            InstanceGroupStatus::Destructed => {}
        }
    }

    let operation_id = Uuid::new_v4();
    let mut next = base.clone();
    next.operation_id = Some(operation_id);
    let base = repository::update(state.store(), &next).await?;

    let spec = &base.config.instance_group;
    let request = deployment::delete_deployment(&spec.project_id, &spec.zone, &base.deployment_name);
    match operation::start(
        state,
        operation_id,
        OperationOwner::PipelineBase(base.id),
        OperationType::Delete,
        &request,
    )
    .await
    {
        Ok(_) => Ok(base),
        Err(ServiceError::Provider(err)) => {
            fail(state, &base, PipelineBaseStatus::ClosingError, err.to_string()).await
        }
        Err(e) => Err(e),
    }
}

// =============================================================================
// Recovery
// =============================================================================

/// Re-issue the step that left the base in an error status
pub async fn retry(state: &AppState, id: Uuid) -> Result<PipelineBase> {
    let base = get(state, id).await?;
    let target = match base.status {
        PipelineBaseStatus::WakingError => PipelineBaseStatus::Waking,
        PipelineBaseStatus::HibernationGoingError => PipelineBaseStatus::HibernationGoing,
        PipelineBaseStatus::ClosingError => PipelineBaseStatus::Closing,
        other => {
            return Err(ServiceError::InvalidOperation(format!(
                "pipeline base {} cannot be retried while {}",
                id, other
            )));
        }
    };

    tracing::info!("Retrying pipeline base {} ({})", id, base.status);
    let base = transition_with(state.store(), &base, target, |b| {
        b.last_error = None;
        Ok(())
    })
    .await?;
    notify(state, &base).await?;

    match target {
        PipelineBaseStatus::Waking => {
            let size = base.config.instance_group.instance_size;
            resize(state, &base, size, PipelineBaseStatus::WakingError).await
        }
        PipelineBaseStatus::HibernationGoing => {
            resize(state, &base, 0, PipelineBaseStatus::HibernationGoingError).await
        }
        _ => advance_closing(state, &base).await,
    }
}

/// Re-drive a base whose progress may have been lost
///
/// Re-enqueues watches for in-flight operations, replays the instance group
/// event and resumes opening or closing where it stopped.
pub async fn reconcile(state: &AppState, id: Uuid) -> Result<()> {
    let Some(base) = pipeline_base_repository::find_by_id(state.store(), id).await? else {
        return Ok(());
    };

    if let Some(operation_id) = base.operation_id {
        state.enqueue(Task::WatchOperation(operation_id)).await?;
    }

    let ig = match base.instance_group_id {
        Some(ig_id) => instance_group_repository::find_by_id(state.store(), ig_id).await?,
        None => None,
    };

    match (&ig, base.status) {
        (Some(ig), _) => {
            if let Some(operation_id) = ig.operation_id {
                state.enqueue(Task::WatchOperation(operation_id)).await?;
            }
            state.enqueue(Task::InstanceGroupChanged(ig.id)).await?;
        }
        (None, PipelineBaseStatus::Opening) if base.instance_group_id.is_some() => {
            construct_instance_group(state, &base).await?;
        }
        (None, PipelineBaseStatus::Opening) if base.operation_id.is_none() => {
            open(state, base.id).await?;
        }
        (None, PipelineBaseStatus::Closing) => {
            advance_closing(state, &base).await?;
        }
        _ => {}
    }

    state.enqueue(Task::BaseChanged(base.id)).await?;
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

async fn fail(
    state: &AppState,
    base: &PipelineBase,
    target: PipelineBaseStatus,
    message: String,
) -> Result<PipelineBase> {
    tracing::error!("Pipeline base {} failed: {}", base.id, message);
    let base = transition_with(state.store(), base, target, |b| {
        b.operation_id = None;
        b.last_error = Some(message);
        Ok(())
    })
    .await?;
    notify(state, &base).await?;
    Ok(base)
}

async fn notify(state: &AppState, base: &PipelineBase) -> Result<()> {
    state.enqueue(Task::BaseChanged(base.id)).await?;
    Ok(())
}
