//! Pipeline API Handlers
//!
//! HTTP endpoints for pipeline management.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use flotilla_core::domain::pipeline::Pipeline;
use flotilla_core::domain::pipeline_base::PipelineBase;
use flotilla_core::dto::pipeline::{
    CreatePipeline, CreatePipelineParams, PipelineBaseSummary, PipelineSummary, UpdatePipeline,
};
use uuid::Uuid;

use crate::api::auth::OrgAuth;
use crate::api::error::{ApiError, ApiResult};
use crate::service::{ServiceError, pipeline_base_service, pipeline_service};
use crate::state::AppState;

/// POST /pipelines
/// Create a new pipeline and start building its first base
pub async fn create_pipeline(
    State(state): State<AppState>,
    OrgAuth(org): OrgAuth,
    Query(params): Query<CreatePipelineParams>,
    Json(req): Json<CreatePipeline>,
) -> ApiResult<(StatusCode, Json<Pipeline>)> {
    tracing::info!("Creating pipeline: {} (dry run: {})", req.name, params.dry_run);

    let pipeline = pipeline_service::create(&state, org.id, req, params.dry_run).await?;
    Ok((StatusCode::CREATED, Json(pipeline)))
}

/// GET /pipelines
/// List the organization's pipelines
pub async fn list_pipelines(
    State(state): State<AppState>,
    OrgAuth(org): OrgAuth,
) -> ApiResult<Json<Vec<PipelineSummary>>> {
    tracing::debug!("Listing pipelines of organization {}", org.id);

    let pipelines = pipeline_service::list(&state, org.id).await?;
    Ok(Json(pipelines.into_iter().map(PipelineSummary::from).collect()))
}

/// GET /pipelines/{id}
pub async fn get_pipeline(
    State(state): State<AppState>,
    OrgAuth(org): OrgAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Pipeline>> {
    tracing::debug!("Getting pipeline: {}", id);

    Ok(Json(pipeline_service::get(&state, org.id, id).await?))
}

/// PUT /pipelines/{id}
/// Roll the pipeline onto a new base configuration
pub async fn update_pipeline(
    State(state): State<AppState>,
    OrgAuth(org): OrgAuth,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePipeline>,
) -> ApiResult<Json<Pipeline>> {
    tracing::info!("Updating pipeline: {}", id);

    Ok(Json(pipeline_service::update(&state, org.id, id, req).await?))
}

/// DELETE /pipelines/{id}
/// Destroy a stopped pipeline
pub async fn delete_pipeline(
    State(state): State<AppState>,
    OrgAuth(org): OrgAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting pipeline: {}", id);

    pipeline_service::destroy(&state, org.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /pipelines/{id}/close
pub async fn close_pipeline(
    State(state): State<AppState>,
    OrgAuth(org): OrgAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Pipeline>> {
    tracing::info!("Closing pipeline: {}", id);

    Ok(Json(pipeline_service::close_owned(&state, org.id, id).await?))
}

/// POST /pipelines/{id}/retry
/// Rebuild a pipeline whose current base failed to open
pub async fn retry_pipeline(
    State(state): State<AppState>,
    OrgAuth(org): OrgAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Pipeline>> {
    tracing::info!("Retrying build of pipeline: {}", id);

    Ok(Json(pipeline_service::retry_build(&state, org.id, id).await?))
}

/// GET /pipelines/{id}/bases
pub async fn list_pipeline_bases(
    State(state): State<AppState>,
    OrgAuth(org): OrgAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<PipelineBaseSummary>>> {
    let bases = pipeline_service::list_bases(&state, org.id, id).await?;
    Ok(Json(bases.into_iter().map(PipelineBaseSummary::from).collect()))
}

/// POST /pipeline_bases/{id}/retry
/// Re-issue the step that left a base in an error status
pub async fn retry_pipeline_base(
    State(state): State<AppState>,
    OrgAuth(org): OrgAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineBase>> {
    tracing::info!("Retrying pipeline base: {}", id);

    let base = pipeline_base_service::get(&state, id).await?;
    if base.organization_id != org.id {
        return Err(ApiError::from(ServiceError::not_found(
            flotilla_core::domain::EntityKind::PipelineBase,
            id,
        )));
    }
    Ok(Json(pipeline_base_service::retry(&state, id).await?))
}
