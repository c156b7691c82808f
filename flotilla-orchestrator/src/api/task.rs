//! Task API Handlers
//!
//! Delivery endpoints for an external task dispatcher. Each endpoint maps its
//! path back to the task descriptor and runs it through the same dispatch the
//! local worker uses. A non-2xx answer asks the dispatcher to redeliver.

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use flotilla_core::task::Task;
use uuid::Uuid;

use crate::api::auth::AdminAuth;
use crate::api::error::ApiResult;
use crate::service::task_service;
use crate::state::AppState;

async fn deliver(state: &AppState, task: Task) -> ApiResult<StatusCode> {
    task_service::dispatch(state, task).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /operations/{id}/watch_task
pub async fn watch_operation(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    deliver(&state, Task::WatchOperation(id)).await
}

/// POST /pipelines/{id}/build_task
pub async fn build_pipeline(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    deliver(&state, Task::BuildPipeline(id)).await
}

/// POST /pipelines/{id}/close_task
pub async fn close_pipeline(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    deliver(&state, Task::ClosePipeline(id)).await
}

/// POST /pipelines/{id}/refresh_task
pub async fn refresh_pipeline(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    deliver(&state, Task::RefreshPipeline(id)).await
}

/// POST /pipelines/refresh_task
pub async fn refresh_all(State(state): State<AppState>, _admin: AdminAuth) -> ApiResult<StatusCode> {
    deliver(&state, Task::RefreshAll).await
}

/// POST /pipeline_bases/{id}/hibernation_checking_task
pub async fn hibernation_check(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    deliver(&state, Task::HibernationCheck(id)).await
}

/// POST /pipeline_bases/{id}/pull_task
pub async fn pull_base(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    deliver(&state, Task::PullBase(id)).await
}

/// POST /pipeline_bases/pull_task
pub async fn pull_all(State(state): State<AppState>, _admin: AdminAuth) -> ApiResult<StatusCode> {
    deliver(&state, Task::PullAll).await
}

/// POST /pipeline_bases/{id}/changed_task
pub async fn base_changed(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    deliver(&state, Task::BaseChanged(id)).await
}

/// POST /instance_groups/{id}/changed_task
pub async fn instance_group_changed(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    deliver(&state, Task::InstanceGroupChanged(id)).await
}

/// POST /jobs/{id}/publish_task
pub async fn publish_job(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    deliver(&state, Task::PublishJob(id)).await
}

/// POST /instance_groups/{id}/health_check_task
pub async fn health_check(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    deliver(&state, Task::HealthCheck(id)).await
}
