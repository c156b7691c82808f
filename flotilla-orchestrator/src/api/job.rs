//! Job API Handlers
//!
//! HTTP endpoints for job submission, readiness and runner reports.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use flotilla_core::domain::job::Job;
use flotilla_core::dto::job::{CreateJob, JobReport, JobSummary};
use uuid::Uuid;

use crate::api::auth::OrgAuth;
use crate::api::error::ApiResult;
use crate::service::job_service;
use crate::state::AppState;

// =============================================================================
// Submission & Readiness
// =============================================================================

/// POST /pipelines/{id}/jobs
/// Submit a job to the pipeline's current base
pub async fn submit_job(
    State(state): State<AppState>,
    OrgAuth(org): OrgAuth,
    Path(pipeline_id): Path<Uuid>,
    Json(req): Json<CreateJob>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    tracing::info!("Submitting job to pipeline: {} (ready: {})", pipeline_id, req.ready);

    let job = job_service::submit(&state, org.id, pipeline_id, req).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /pipelines/{id}/jobs
/// List all jobs of a pipeline
pub async fn list_jobs_by_pipeline(
    State(state): State<AppState>,
    OrgAuth(org): OrgAuth,
    Path(pipeline_id): Path<Uuid>,
) -> ApiResult<Json<Vec<JobSummary>>> {
    tracing::debug!("Listing jobs for pipeline: {}", pipeline_id);

    let jobs = job_service::list(&state, org.id, pipeline_id).await?;
    Ok(Json(jobs.into_iter().map(JobSummary::from).collect()))
}

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    OrgAuth(org): OrgAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    tracing::debug!("Getting job: {}", id);

    Ok(Json(job_service::get(&state, org.id, id).await?))
}

/// POST /jobs/{id}/activate
pub async fn activate_job(
    State(state): State<AppState>,
    OrgAuth(org): OrgAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    tracing::info!("Activating job: {}", id);

    Ok(Json(job_service::activate(&state, org.id, id).await?))
}

/// POST /jobs/{id}/inactivate
pub async fn inactivate_job(
    State(state): State<AppState>,
    OrgAuth(org): OrgAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    tracing::info!("Inactivating job: {}", id);

    Ok(Json(job_service::inactivate(&state, org.id, id).await?))
}

// =============================================================================
// Runner Reports
// =============================================================================

/// POST /jobs/{id}/started
pub async fn job_started(
    State(state): State<AppState>,
    OrgAuth(org): OrgAuth,
    Path(id): Path<Uuid>,
    Json(report): Json<JobReport>,
) -> ApiResult<Json<Job>> {
    tracing::info!("Job started: {} on {:?}", id, report.hostname);

    Ok(Json(job_service::started(&state, org.id, id, report).await?))
}

/// POST /jobs/{id}/success
pub async fn job_success(
    State(state): State<AppState>,
    OrgAuth(org): OrgAuth,
    Path(id): Path<Uuid>,
    Json(report): Json<JobReport>,
) -> ApiResult<Json<Job>> {
    Ok(Json(job_service::success(&state, org.id, id, report).await?))
}

/// POST /jobs/{id}/failure
pub async fn job_failure(
    State(state): State<AppState>,
    OrgAuth(org): OrgAuth,
    Path(id): Path<Uuid>,
    Json(report): Json<JobReport>,
) -> ApiResult<Json<Job>> {
    tracing::warn!("Job failed: {}", id);

    Ok(Json(job_service::failure(&state, org.id, id, report).await?))
}
