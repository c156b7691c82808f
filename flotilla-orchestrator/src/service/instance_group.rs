//! Instance Group Manager
//!
//! Drives construction, resizing and destruction of instance groups. Each call
//! issues exactly one cloud operation and returns; the outcome arrives later
//! through [`finalize`]. Whatever the outcome, the owning base is told through
//! an `InstanceGroupChanged` task.
//!
//! Once constructed, a group is health checked on a fixed interval until it is
//! torn down: too few working instances mark it `health_check_error`, and it
//! returns to `constructed` when enough come back.

use chrono::Utc;
use flotilla_core::domain::EntityKind;
use flotilla_core::domain::instance_group::{HealthReport, InstanceGroup, InstanceGroupStatus};
use flotilla_core::domain::operation::{CloudAsyncOperation, OperationOwner, OperationType};
use flotilla_core::domain::pipeline_base::PipelineBase;
use flotilla_core::task::Task;
use uuid::Uuid;

use super::error::{Result, ServiceError};
use super::transition::transition_with;
use super::{operation, organization};
use crate::provider::{ProviderError, ResourceRequest, deployment, startup_script};
use crate::repository::{self, instance_group_repository};
use crate::state::AppState;

pub async fn get(state: &AppState, id: Uuid) -> Result<InstanceGroup> {
    instance_group_repository::find_by_id(state.store(), id)
        .await?
        .ok_or(ServiceError::not_found(EntityKind::InstanceGroup, id))
}

/// Construct the instance group reserved by `base.instance_group_id`
///
/// Calling this again for the same base returns the existing group.
pub async fn construct(state: &AppState, base: &PipelineBase) -> Result<InstanceGroup> {
    let id = base.instance_group_id.ok_or_else(|| {
        ServiceError::InvalidOperation(format!(
            "pipeline base {} has no instance group reserved",
            base.id
        ))
    })?;

    if let Some(existing) = instance_group_repository::find_by_id(state.store(), id).await? {
        tracing::debug!("Instance group {} already exists", id);
        return Ok(existing);
    }

    let spec = &base.config.instance_group;
    let mut ig = InstanceGroup::from_spec(
        base.organization_id,
        base.id,
        &base.name,
        spec,
        startup_script::build(base),
    );
    ig.id = id;

    organization::require_tokens(
        state.store(),
        ig.organization_id,
        ig.consumption_for(ig.instance_size_requested),
    )
    .await?;

    let operation_id = Uuid::new_v4();
    ig.operation_id = Some(operation_id);
    let ig = repository::insert(state.store(), &ig).await?;
    tracing::info!(
        "Constructing instance group {} ({} instances of {})",
        ig.id,
        ig.instance_size_requested,
        ig.machine_type
    );

    let request = deployment::instance_group_deployment(&ig);
    issue(state, ig, operation_id, OperationType::Insert, &request).await
}

/// Resize a constructed group to `instance_size` instances
pub async fn resize(state: &AppState, id: Uuid, instance_size: u32) -> Result<InstanceGroup> {
    let ig = get(state, id).await?;
    if !ig.status.is_settled() {
        return Err(ServiceError::InvalidOperation(format!(
            "instance group {} cannot be resized while {}",
            id, ig.status
        )));
    }

    let additional = ig.consumption_for(instance_size) - ig.token_consumption;
    if additional > 0 {
        organization::require_tokens(state.store(), ig.organization_id, additional).await?;
    }

    let operation_id = Uuid::new_v4();
    let ig = transition_with(state.store(), &ig, InstanceGroupStatus::Resizing, |g| {
        g.instance_size_requested = instance_size;
        g.operation_id = Some(operation_id);
        Ok(())
    })
    .await?;

    let request = deployment::resize_request(&ig, instance_size);
    issue(state, ig, operation_id, OperationType::Update, &request).await
}

/// Tear the group down; a no-op once destructed or already destructing
pub async fn destruct(state: &AppState, id: Uuid) -> Result<InstanceGroup> {
    let ig = get(state, id).await?;
    if matches!(
        ig.status,
        InstanceGroupStatus::Destructed | InstanceGroupStatus::Destructing
    ) {
        tracing::debug!("Instance group {} is already {}", id, ig.status);
        return Ok(ig);
    }

    let operation_id = Uuid::new_v4();
    let ig = transition_with(state.store(), &ig, InstanceGroupStatus::Destructing, |g| {
        g.operation_id = Some(operation_id);
        g.last_error = None;
        Ok(())
    })
    .await?;

    let request = deployment::delete_deployment(&ig.project_id, &ig.zone, &ig.deployment_name);
    issue(state, ig, operation_id, OperationType::Delete, &request).await
}

/// Apply the outcome of a finished operation
pub async fn finalize(state: &AppState, id: Uuid, operation: &CloudAsyncOperation) -> Result<()> {
    let Some(ig) = instance_group_repository::find_by_id(state.store(), id).await? else {
        tracing::warn!("Operation {} finished for missing instance group {}", operation.id, id);
        return Ok(());
    };
    if ig.operation_id != Some(operation.id) {
        tracing::warn!(
            "Ignoring stale operation {} for instance group {}",
            operation.id,
            id
        );
        if ig.operation_id.is_none() {
            // The group may have settled without its base hearing about it
            state.enqueue(Task::InstanceGroupChanged(ig.id)).await?;
        }
        return Ok(());
    }

    settle(state, &ig, operation.error.clone()).await?;
    Ok(())
}

/// Compare the group's working instances with its thresholds
///
/// Each check schedules the next one. A delivery arriving within half an
/// interval of the last check is a duplicate and ends its chain.
pub async fn health_check(state: &AppState, id: Uuid) -> Result<()> {
    let Some(ig) = instance_group_repository::find_by_id(state.store(), id).await? else {
        return Ok(());
    };
    match ig.status {
        InstanceGroupStatus::Constructed | InstanceGroupStatus::HealthCheckError => {}
        InstanceGroupStatus::Resizing => {
            tracing::debug!("Instance group {} is resizing, checking it later", id);
            return schedule_health_check(state, id).await;
        }
        status => {
            tracing::info!("Health checks of instance group {} end while {}", id, status);
            return Ok(());
        }
    }

    let now = Utc::now();
    let half = chrono::Duration::from_std(state.config.health_check_interval / 2)
        .unwrap_or_else(|_| chrono::Duration::zero());
    if let Some(last) = &ig.last_health {
        if now - last.checked_at < half {
            tracing::debug!("Instance group {} was checked at {}", id, last.checked_at);
            return Ok(());
        }
    }

    let instances = state
        .cloud
        .list_managed_instances(&ig.project_id, &ig.zone, &ig.manager_name())
        .await?;
    let working = instances.iter().filter(|i| i.status.is_working()).count();
    let report = HealthReport {
        total: u32::try_from(instances.len()).unwrap_or(u32::MAX),
        working: u32::try_from(working).unwrap_or(u32::MAX),
        checked_at: now,
    };
    let healthy = ig.health_check.accepts(&report);

    let target = match (ig.status, healthy) {
        (InstanceGroupStatus::Constructed, false) => InstanceGroupStatus::HealthCheckError,
        (InstanceGroupStatus::HealthCheckError, true) => InstanceGroupStatus::Constructed,
        (status, _) => status,
    };

    if target == ig.status {
        let mut next = ig.clone();
        next.last_health = Some(report);
        repository::update(state.store(), &next).await?;
    } else {
        let message = format!(
            "{} of {} instances working ({}%), at least {} and {}% required",
            report.working,
            report.total,
            report.working_percentage(),
            ig.health_check.minimum_running_size,
            ig.health_check.minimum_running_percentage
        );
        let checked = transition_with(state.store(), &ig, target, |g| {
            g.last_error = (!healthy).then(|| message.clone());
            g.last_health = Some(report);
            Ok(())
        })
        .await?;
        if healthy {
            tracing::info!("Instance group {} is healthy again: {}", id, message);
        } else {
            tracing::warn!("Instance group {} failed its health check: {}", id, message);
        }
        state.enqueue(Task::InstanceGroupChanged(checked.id)).await?;
    }

    schedule_health_check(state, id).await
}

async fn schedule_health_check(state: &AppState, id: Uuid) -> Result<()> {
    state
        .tasks
        .enqueue(Task::HealthCheck(id), state.config.health_check_interval)
        .await?;
    Ok(())
}

async fn issue(
    state: &AppState,
    ig: InstanceGroup,
    operation_id: Uuid,
    operation_type: OperationType,
    request: &ResourceRequest,
) -> Result<InstanceGroup> {
    match operation::start(
        state,
        operation_id,
        OperationOwner::InstanceGroup(ig.id),
        operation_type,
        request,
    )
    .await
    {
        Ok(_) => Ok(ig),
        Err(ServiceError::Provider(err)) => rejected(state, &ig, err).await,
        Err(e) => Err(e),
    }
}

async fn rejected(state: &AppState, ig: &InstanceGroup, err: ProviderError) -> Result<InstanceGroup> {
    tracing::error!("Provider rejected operation for instance group {}: {}", ig.id, err);
    settle(state, ig, Some(err.to_string())).await
}

/// Close the in-flight operation of `ig` with its outcome
async fn settle(state: &AppState, ig: &InstanceGroup, error: Option<String>) -> Result<InstanceGroup> {
    use InstanceGroupStatus::*;

    let (target, instance_size) = match (ig.status, error.is_some()) {
        (Constructing, false) | (Resizing, false) => (Constructed, ig.instance_size_requested),
        (Constructing, true) => (ConstructingError, ig.instance_size),
        (Resizing, true) => (Constructed, ig.instance_size),
        (Destructing, false) => (Destructed, 0),
        (Destructing, true) => (DestructingError, ig.instance_size),
        (status, _) => {
            tracing::warn!("Instance group {} has nothing to settle while {}", ig.id, status);
            return Ok(ig.clone());
        }
    };

    let previous = ig.token_consumption;
    let consumption = ig.consumption_for(instance_size);

    // Charge before the group forgets its operation; a redelivery repeats
    // this step and the organization skips an operation it already charged
    if consumption != previous {
        let consumed = consumption - previous;
        match ig.operation_id {
            Some(operation_id) => {
                organization::spend_for_operation(
                    state.store(),
                    ig.organization_id,
                    ig.id,
                    operation_id,
                    consumed,
                )
                .await?;
            }
            None => {
                organization::spend(state.store(), ig.organization_id, consumed).await?;
            }
        }
    }

    let settled = transition_with(state.store(), ig, target, |g| {
        g.operation_id = None;
        g.instance_size = instance_size;
        g.instance_size_requested = instance_size;
        g.token_consumption = consumption;
        g.last_error = error;
        Ok(())
    })
    .await?;

    if settled.status == Destructed {
        organization::forget_settlement(state.store(), settled.organization_id, settled.id).await?;
    }
    if ig.status == Constructing && settled.status == Constructed {
        schedule_health_check(state, settled.id).await?;
    }

    if let Some(message) = &settled.last_error {
        tracing::warn!("Instance group {} is {}: {}", settled.id, settled.status, message);
    }

    state.enqueue(Task::InstanceGroupChanged(settled.id)).await?;
    Ok(settled)
}
