//! Job Dispatcher
//!
//! Admission and publishing of jobs. A job always targets one base of its
//! pipeline; it is published only while that base is awake and otherwise
//! waits as `blocked` until the base releases it.

use chrono::Utc;
use flotilla_core::domain::EntityKind;
use flotilla_core::domain::job::{Job, JobStatus};
use flotilla_core::domain::pipeline_base::{PipelineBase, PipelineBaseStatus};
use flotilla_core::dto::job::{CreateJob, JobReport};
use flotilla_core::task::Task;
use uuid::Uuid;

use super::error::{Result, ServiceError};
use super::transition::{transition, transition_with};
use super::{pipeline, pipeline_base};
use crate::repository::{self, job_repository, pipeline_base_repository, pipeline_repository};
use crate::state::AppState;

/// Times a job tries to cancel a contended hibernation check
const CANCEL_ATTEMPTS: usize = 3;

/// Statuses a job can be moved to another base from
const PENDING: &[JobStatus] = &[
    JobStatus::Inactive,
    JobStatus::Blocked,
    JobStatus::PublishingError,
];

/// Submit a job to the pipeline's current base
pub async fn submit(
    state: &AppState,
    organization_id: Uuid,
    pipeline_id: Uuid,
    req: CreateJob,
) -> Result<Job> {
    let pipeline = pipeline::get(state, organization_id, pipeline_id).await?;
    if !pipeline.status.accepts_jobs() {
        return Err(ServiceError::InvalidOperation(format!(
            "pipeline {} does not accept jobs while {}",
            pipeline.id, pipeline.status
        )));
    }
    let base = current_base(state, pipeline.curr_base_id, pipeline.id).await?;
    ensure_admits(&base)?;

    let job = Job::new(pipeline.id, base.id, req.id_by_client, req.message);
    let job = repository::insert(state.store(), &job).await?;
    tracing::info!("Job {} submitted to pipeline base {}", job.id, base.name);

    if req.ready {
        return dispatch(state, &job, &base).await;
    }
    Ok(job)
}

/// Make a job ready for publishing
///
/// The job moves to the pipeline's current base first, so a job left behind
/// by a rotation is published where it can still run.
pub async fn activate(state: &AppState, organization_id: Uuid, id: Uuid) -> Result<Job> {
    let job = get(state, organization_id, id).await?;
    match job.status {
        JobStatus::Inactive | JobStatus::PublishingError => {}
        status if status.is_active() => return Ok(job),
        status => {
            return Err(ServiceError::InvalidOperation(format!(
                "job {} cannot be activated while {}",
                id, status
            )));
        }
    }

    let pipeline = pipeline::get(state, organization_id, job.pipeline_id).await?;
    let base = current_base(state, pipeline.curr_base_id, pipeline.id).await?;
    ensure_admits(&base)?;

    let job = if job.pipeline_base_id != base.id {
        let mut next = job.clone();
        next.pipeline_base_id = base.id;
        repository::update(state.store(), &next).await?
    } else {
        job
    };
    dispatch(state, &job, &base).await
}

/// Take a job back out of the publishing path
pub async fn inactivate(state: &AppState, organization_id: Uuid, id: Uuid) -> Result<Job> {
    let job = get(state, organization_id, id).await?;
    match job.status {
        JobStatus::Inactive => Ok(job),
        JobStatus::Blocked | JobStatus::PublishingError => {
            transition(state.store(), &job, JobStatus::Inactive).await
        }
        status => Err(ServiceError::InvalidOperation(format!(
            "job {} cannot be inactivated while {}",
            id, status
        ))),
    }
}

/// Get a job whose pipeline belongs to the organization
pub async fn get(state: &AppState, organization_id: Uuid, id: Uuid) -> Result<Job> {
    let job = job_repository::find_by_id(state.store(), id)
        .await?
        .ok_or(ServiceError::not_found(EntityKind::Job, id))?;
    pipeline_repository::find_owned(state.store(), organization_id, job.pipeline_id)
        .await?
        .ok_or(ServiceError::not_found(EntityKind::Job, id))?;
    Ok(job)
}

/// Jobs of a pipeline across all of its bases, oldest first
pub async fn list(state: &AppState, organization_id: Uuid, pipeline_id: Uuid) -> Result<Vec<Job>> {
    let pipeline = pipeline::get(state, organization_id, pipeline_id).await?;
    let base_ids: Vec<Uuid> = pipeline_base_repository::list_by_pipeline(state.store(), pipeline.id)
        .await?
        .into_iter()
        .map(|b| b.id)
        .collect();
    Ok(job_repository::list_by_pipeline(state.store(), pipeline.id, &base_ids).await?)
}

// =============================================================================
// Runner Reports
// =============================================================================

pub async fn started(
    state: &AppState,
    organization_id: Uuid,
    id: Uuid,
    report: JobReport,
) -> Result<Job> {
    let job = get(state, organization_id, id).await?;
    if job.status == JobStatus::Started {
        return Ok(job);
    }

    transition_with(state.store(), &job, JobStatus::Started, |j| {
        j.started_at = Some(Utc::now());
        if report.hostname.is_some() {
            j.hostname = report.hostname;
        }
        Ok(())
    })
    .await
}

pub async fn success(
    state: &AppState,
    organization_id: Uuid,
    id: Uuid,
    report: JobReport,
) -> Result<Job> {
    finish(state, organization_id, id, JobStatus::Success, report).await
}

pub async fn failure(
    state: &AppState,
    organization_id: Uuid,
    id: Uuid,
    report: JobReport,
) -> Result<Job> {
    finish(state, organization_id, id, JobStatus::Failure, report).await
}

async fn finish(
    state: &AppState,
    organization_id: Uuid,
    id: Uuid,
    target: JobStatus,
    report: JobReport,
) -> Result<Job> {
    let job = get(state, organization_id, id).await?;
    if job.status == target {
        tracing::debug!("Job {} already reported {}", id, target);
        return Ok(job);
    }

    let job = transition_with(state.store(), &job, target, |j| {
        j.finished_at = Some(Utc::now());
        if report.hostname.is_some() {
            j.hostname = report.hostname;
        }
        if report.output.is_some() {
            j.output = report.output;
        }
        Ok(())
    })
    .await?;
    tracing::info!("Job {} finished: {}", job.id, job.status);
    Ok(job)
}

// =============================================================================
// Task Handlers
// =============================================================================

/// Publish a job released by its base
pub async fn publish(state: &AppState, id: Uuid) -> Result<()> {
    let Some(job) = job_repository::find_by_id(state.store(), id).await? else {
        return Ok(());
    };

    match job.status {
        JobStatus::Blocked => {
            let Some(base) =
                pipeline_base_repository::find_by_id(state.store(), job.pipeline_base_id).await?
            else {
                tracing::warn!("Job {} targets missing pipeline base {}", id, job.pipeline_base_id);
                return Ok(());
            };
            if !base.status.is_serving() {
                tracing::debug!("Job {} stays blocked while base {} is {}", id, base.id, base.status);
                return Ok(());
            }
            dispatch(state, &job, &base).await?;
        }
        JobStatus::Publishing => {
            // A previous delivery died between the status write and the send
            let base = pipeline_base::get(state, job.pipeline_base_id).await?;
            send(state, &job, &base).await?;
        }
        status => {
            tracing::debug!("Job {} is {}, nothing to publish", id, status);
        }
    }
    Ok(())
}

/// Enqueue a publish for every blocked job of a base
pub async fn release_blocked(state: &AppState, pipeline_base_id: Uuid) -> Result<usize> {
    let blocked = job_repository::list_by_base(
        state.store(),
        pipeline_base_id,
        Some(&[JobStatus::Blocked][..]),
    )
    .await?;
    for job in &blocked {
        state.enqueue(Task::PublishJob(job.id)).await?;
    }
    if !blocked.is_empty() {
        tracing::info!(
            "Released {} blocked jobs of pipeline base {}",
            blocked.len(),
            pipeline_base_id
        );
    }
    Ok(blocked.len())
}

/// Move jobs that never reached the bus from a retired base to its successor
pub async fn retarget_pending(state: &AppState, from_base_id: Uuid, to_base_id: Uuid) -> Result<usize> {
    let pending = job_repository::list_by_base(state.store(), from_base_id, Some(PENDING)).await?;
    for job in &pending {
        let mut next = job.clone();
        next.pipeline_base_id = to_base_id;
        let job = repository::update(state.store(), &next).await?;
        if job.status == JobStatus::Blocked {
            state.enqueue(Task::PublishJob(job.id)).await?;
        }
    }
    if !pending.is_empty() {
        tracing::info!(
            "Moved {} pending jobs from pipeline base {} to {}",
            pending.len(),
            from_base_id,
            to_base_id
        );
    }
    Ok(pending.len())
}

// =============================================================================
// Helpers
// =============================================================================

async fn current_base(
    state: &AppState,
    base_id: Option<Uuid>,
    pipeline_id: Uuid,
) -> Result<PipelineBase> {
    let Some(base_id) = base_id else {
        return Err(ServiceError::InvalidOperation(format!(
            "pipeline {} has no current base",
            pipeline_id
        )));
    };
    pipeline_base::get(state, base_id).await
}

fn ensure_admits(base: &PipelineBase) -> Result<()> {
    if base.status.is_error()
        || matches!(
            base.status,
            PipelineBaseStatus::Closing | PipelineBaseStatus::Closed
        )
    {
        return Err(ServiceError::InvalidOperation(format!(
            "pipeline base {} does not accept jobs while {}",
            base.id, base.status
        )));
    }
    Ok(())
}

/// Route a ready job according to its base's status
async fn dispatch(state: &AppState, job: &Job, base: &PipelineBase) -> Result<Job> {
    let base = settle_hibernation_check(state, base).await?;
    match base.status {
        PipelineBaseStatus::Awake => {
            let job = transition(state.store(), job, JobStatus::Publishing).await?;
            send(state, &job, &base).await
        }
        PipelineBaseStatus::HibernationChecking => Err(ServiceError::Conflict {
            kind: EntityKind::PipelineBase,
            id: base.id,
        }),
        PipelineBaseStatus::Hibernating => {
            let job = block(state, job).await?;
            pipeline_base::wake(state, base.id).await?;
            Ok(job)
        }
        PipelineBaseStatus::Opening
        | PipelineBaseStatus::Waking
        | PipelineBaseStatus::HibernationGoing => block(state, job).await,
        status => Err(ServiceError::InvalidOperation(format!(
            "pipeline base {} does not accept jobs while {}",
            base.id, status
        ))),
    }
}

/// Pull a base out of its hibernation check
///
/// A concurrent write to the base (the check itself, a group event) makes
/// the cancel lose; the base is then re-read and routed by its new status.
async fn settle_hibernation_check(state: &AppState, base: &PipelineBase) -> Result<PipelineBase> {
    let mut base = base.clone();
    for _ in 0..CANCEL_ATTEMPTS {
        if base.status != PipelineBaseStatus::HibernationChecking {
            break;
        }
        base = match pipeline_base::cancel_hibernation(state, &base).await {
            Ok(awake) => awake,
            Err(ServiceError::Conflict { .. }) => {
                tracing::debug!("Pipeline base {} changed while cancelling hibernation", base.id);
                pipeline_base::get(state, base.id).await?
            }
            Err(e) => return Err(e),
        };
    }
    Ok(base)
}

async fn block(state: &AppState, job: &Job) -> Result<Job> {
    let job = if job.status == JobStatus::PublishingError {
        transition(state.store(), job, JobStatus::Inactive).await?
    } else {
        job.clone()
    };
    if job.status == JobStatus::Blocked {
        return Ok(job);
    }
    transition(state.store(), &job, JobStatus::Blocked).await
}

async fn send(state: &AppState, job: &Job, base: &PipelineBase) -> Result<Job> {
    match state.bus.publish(&base.job_topic(), &job.outgoing_message()).await {
        Ok(message_id) => {
            transition_with(state.store(), job, JobStatus::Published, |j| {
                j.message_id = Some(message_id);
                j.published_at = Some(Utc::now());
                j.last_error = None;
                Ok(())
            })
            .await
        }
        Err(err) => {
            tracing::error!("Failed to publish job {}: {}", job.id, err);
            transition_with(state.store(), job, JobStatus::PublishingError, |j| {
                j.last_error = Some(err.to_string());
                Ok(())
            })
            .await
        }
    }
}
