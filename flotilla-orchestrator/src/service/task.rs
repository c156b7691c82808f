//! Task Dispatch
//!
//! Routes a delivered task to the controller that owns it. The HTTP task
//! endpoints and the local worker both deliver through [`dispatch`], so a task
//! behaves the same whichever dispatcher carries it.

use flotilla_core::task::Task;

use super::error::{Result, ServiceError};
use super::{hibernation, instance_group, job, operation, pipeline, pipeline_base};
use crate::state::AppState;

/// Deliver one task
///
/// A write that lost a version race is redelivered right away. Tasks for
/// records that are gone, or that no longer fit the record's status, are
/// dropped.
pub async fn dispatch(state: &AppState, task: Task) -> Result<()> {
    tracing::debug!("Delivering {}", task);
    match handle(state, task).await {
        Ok(()) => Ok(()),
        Err(ServiceError::Conflict { kind, id }) => {
            tracing::warn!("{} {} changed during {}, redelivering", kind, id, task);
            state.enqueue(task).await?;
            Ok(())
        }
        Err(ServiceError::NotFound { kind, id }) => {
            tracing::debug!("{} {} is gone, dropping {}", kind, id, task);
            Ok(())
        }
        Err(err @ ServiceError::InvalidTransition { .. }) => {
            tracing::warn!("Dropping stale {}: {}", task, err);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn handle(state: &AppState, task: Task) -> Result<()> {
    match task {
        Task::WatchOperation(id) => {
            let outcome = operation::watch(state, id).await?;
            if !outcome.done {
                state.tasks.enqueue(task, state.config.watch_interval).await?;
            }
            Ok(())
        }
        Task::BuildPipeline(id) => pipeline::build(state, id).await,
        Task::ClosePipeline(id) => pipeline::close(state, id).await.map(|_| ()),
        Task::RefreshPipeline(id) => pipeline::refresh(state, id).await,
        Task::RefreshAll => pipeline::refresh_all(state).await.map(|_| ()),
        Task::HibernationCheck(id) => hibernation::check(state, id).await,
        Task::PullBase(id) => hibernation::pull(state, id).await,
        Task::PullAll => hibernation::sweep(state).await.map(|_| ()),
        Task::PublishJob(id) => job::publish(state, id).await,
        Task::InstanceGroupChanged(id) => pipeline_base::on_instance_group_changed(state, id).await,
        Task::BaseChanged(id) => pipeline::on_base_changed(state, id).await,
        Task::HealthCheck(id) => instance_group::health_check(state, id).await,
    }
}
