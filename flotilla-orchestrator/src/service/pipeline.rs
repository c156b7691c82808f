//! Pipeline Controller
//!
//! Rotates a pipeline across base generations. A pipeline has at most one
//! base being prepared at a time: the current base while the pipeline is new,
//! or the next base while an update rolls out. Once the next base is up, one
//! write swaps it in as current and the former current base is closed.

use flotilla_core::domain::EntityKind;
use flotilla_core::domain::instance_group::InstanceGroup;
use flotilla_core::domain::job::Job;
use flotilla_core::domain::pipeline::{Pipeline, PipelineStatus};
use flotilla_core::domain::pipeline_base::{BaseConfig, PipelineBase, PipelineBaseStatus};
use flotilla_core::dto::pipeline::{CreatePipeline, UpdatePipeline};
use flotilla_core::task::Task;
use uuid::Uuid;

use super::error::{Result, ServiceError};
use super::transition::{transition, transition_with};
use super::{job, pipeline_base};
use crate::repository::{
    self, instance_group_repository, job_repository, pipeline_base_repository, pipeline_repository,
};
use crate::state::AppState;

/// Longest pipeline name; derived resource names must stay within provider limits
const MAX_NAME_LEN: usize = 40;

/// Create a pipeline and its first base
///
/// With `dry_run` both are persisted but the build is not started.
pub async fn create(
    state: &AppState,
    organization_id: Uuid,
    req: CreatePipeline,
    dry_run: bool,
) -> Result<Pipeline> {
    validate_name(&req.name)?;
    validate_config(&req.config)?;

    let mut pipeline = Pipeline::new(organization_id, req.name, req.config);
    let base_name = pipeline.next_base_name();
    let base = PipelineBase::new(organization_id, pipeline.id, base_name, pipeline.config.clone());
    pipeline.curr_base_id = Some(base.id);

    repository::insert(state.store(), &base).await?;
    let pipeline = repository::insert(state.store(), &pipeline).await?;
    tracing::info!("Pipeline created: {} ({})", pipeline.name, pipeline.id);

    if !dry_run {
        state.enqueue(Task::BuildPipeline(pipeline.id)).await?;
    }
    Ok(pipeline)
}

/// Get a pipeline owned by the organization
pub async fn get(state: &AppState, organization_id: Uuid, id: Uuid) -> Result<Pipeline> {
    pipeline_repository::find_owned(state.store(), organization_id, id)
        .await?
        .ok_or(ServiceError::not_found(EntityKind::Pipeline, id))
}

pub async fn list(state: &AppState, organization_id: Uuid) -> Result<Vec<Pipeline>> {
    Ok(pipeline_repository::list_by_organization(state.store(), organization_id).await?)
}

/// Every base created for the pipeline, oldest first
pub async fn list_bases(
    state: &AppState,
    organization_id: Uuid,
    id: Uuid,
) -> Result<Vec<PipelineBase>> {
    let pipeline = get(state, organization_id, id).await?;
    Ok(pipeline_base_repository::list_by_pipeline(state.store(), pipeline.id).await?)
}

/// Roll the pipeline onto a new base configuration
pub async fn update(
    state: &AppState,
    organization_id: Uuid,
    id: Uuid,
    req: UpdatePipeline,
) -> Result<Pipeline> {
    validate_config(&req.config)?;
    let pipeline = get(state, organization_id, id).await?;
    if pipeline.status != PipelineStatus::Running {
        return Err(ServiceError::InvalidOperation(format!(
            "pipeline {} can only be updated while running, it is {}",
            id, pipeline.status
        )));
    }

    let mut draft = pipeline.clone();
    let base_name = draft.next_base_name();
    let base = PipelineBase::new(organization_id, pipeline.id, base_name, req.config.clone());
    let base = repository::insert(state.store(), &base).await?;

    let updated = transition_with(state.store(), &pipeline, PipelineStatus::NextPreparing, |p| {
        p.generation = draft.generation;
        p.next_base_id = Some(base.id);
        p.config = req.config;
        Ok(())
    })
    .await;

    match updated {
        Ok(pipeline) => {
            tracing::info!("Pipeline {} preparing next base {}", pipeline.id, base.name);
            state.enqueue(Task::BuildPipeline(pipeline.id)).await?;
            Ok(pipeline)
        }
        Err(e) => {
            repository::delete::<PipelineBase>(state.store(), base.id).await?;
            Err(e)
        }
    }
}

/// Replace a current base that failed to open
pub async fn retry_build(state: &AppState, organization_id: Uuid, id: Uuid) -> Result<Pipeline> {
    let pipeline = get(state, organization_id, id).await?;
    if pipeline.status != PipelineStatus::CurrentPreparingError {
        return Err(ServiceError::InvalidOperation(format!(
            "pipeline {} can only be rebuilt after a failed build, it is {}",
            id, pipeline.status
        )));
    }

    let failed = pipeline.curr_base_id;
    let mut draft = pipeline.clone();
    let base_name = draft.next_base_name();
    let base = PipelineBase::new(organization_id, pipeline.id, base_name, pipeline.config.clone());
    let base = repository::insert(state.store(), &base).await?;

    let pipeline = transition_with(state.store(), &pipeline, PipelineStatus::CurrentPreparing, |p| {
        p.generation = draft.generation;
        p.prev_base_id = failed;
        p.curr_base_id = Some(base.id);
        Ok(())
    })
    .await?;

    if let Some(failed) = failed {
        close_base(state, failed).await?;
    }
    state.enqueue(Task::BuildPipeline(pipeline.id)).await?;
    tracing::info!("Pipeline {} rebuilding with base {}", pipeline.id, base.name);
    Ok(pipeline)
}

/// Stop the pipeline and close every base it references
pub async fn close(state: &AppState, id: Uuid) -> Result<Pipeline> {
    let pipeline = pipeline_repository::find_by_id(state.store(), id)
        .await?
        .ok_or(ServiceError::not_found(EntityKind::Pipeline, id))?;

    let pipeline = match pipeline.status {
        PipelineStatus::Stopped => return Ok(pipeline),
        PipelineStatus::Stopping => pipeline,
        _ => transition(state.store(), &pipeline, PipelineStatus::Stopping).await?,
    };

    close_bases(state, &pipeline).await
}

/// Close a pipeline owned by the organization
pub async fn close_owned(state: &AppState, organization_id: Uuid, id: Uuid) -> Result<Pipeline> {
    let pipeline = get(state, organization_id, id).await?;
    close(state, pipeline.id).await
}

/// Remove a stopped pipeline and everything it created
pub async fn destroy(state: &AppState, organization_id: Uuid, id: Uuid) -> Result<()> {
    let pipeline = get(state, organization_id, id).await?;
    if pipeline.status != PipelineStatus::Stopped {
        return Err(ServiceError::InvalidOperation(format!(
            "pipeline {} must be stopped before it is destroyed, it is {}",
            id, pipeline.status
        )));
    }

    let store = state.store();
    for base in pipeline_base_repository::list_by_pipeline(store, pipeline.id).await? {
        if base.status != PipelineBaseStatus::Closed {
            return Err(ServiceError::InvalidOperation(format!(
                "pipeline base {} is still {}",
                base.id, base.status
            )));
        }
        for job in job_repository::list_by_base(store, base.id, None).await? {
            repository::delete::<Job>(store, job.id).await?;
        }
        for ig in instance_group_repository::list_by_base(store, base.id).await? {
            repository::delete::<InstanceGroup>(store, ig.id).await?;
        }
        repository::delete::<PipelineBase>(store, base.id).await?;
    }
    repository::delete::<Pipeline>(store, pipeline.id).await?;

    tracing::info!("Pipeline destroyed: {}", id);
    Ok(())
}

// =============================================================================
// Task Handlers
// =============================================================================

/// Start opening the base the pipeline is preparing
pub async fn build(state: &AppState, id: Uuid) -> Result<()> {
    let Some(pipeline) = pipeline_repository::find_by_id(state.store(), id).await? else {
        return Ok(());
    };

    let target = match pipeline.status {
        PipelineStatus::CurrentPreparing => pipeline.curr_base_id,
        PipelineStatus::NextPreparing => pipeline.next_base_id,
        status => {
            tracing::debug!("Pipeline {} is {}, nothing to build", id, status);
            None
        }
    };

    if let Some(base_id) = target {
        pipeline_base::open(state, base_id).await?;
    }
    Ok(())
}

/// React to one of the pipeline's bases reaching a new status
pub async fn on_base_changed(state: &AppState, base_id: Uuid) -> Result<()> {
    let Some(base) = pipeline_base_repository::find_by_id(state.store(), base_id).await? else {
        return Ok(());
    };
    let Some(pipeline) = pipeline_repository::find_by_id(state.store(), base.pipeline_id).await?
    else {
        return Ok(());
    };

    match pipeline.status {
        PipelineStatus::CurrentPreparing if pipeline.curr_base_id == Some(base.id) => {
            if base.status.is_opened() {
                transition(state.store(), &pipeline, PipelineStatus::Running).await?;
            } else if base.status == PipelineBaseStatus::OpeningError {
                transition(state.store(), &pipeline, PipelineStatus::CurrentPreparingError).await?;
            }
        }
        PipelineStatus::NextPreparing if pipeline.next_base_id == Some(base.id) => {
            if base.status.is_opened() {
                swap(state, &pipeline).await?;
            } else if base.status == PipelineBaseStatus::OpeningError {
                tracing::warn!("Next base {} of pipeline {} failed to open", base.id, pipeline.id);
                transition_with(state.store(), &pipeline, PipelineStatus::Running, |p| {
                    p.next_base_id = None;
                    Ok(())
                })
                .await?;
                close_base(state, base.id).await?;
            }
        }
        PipelineStatus::Stopping => {
            if base.status == PipelineBaseStatus::ClosingError {
                transition(state.store(), &pipeline, PipelineStatus::StoppingError).await?;
            } else {
                close_bases(state, &pipeline).await?;
            }
        }
        _ => {
            if base.retired || pipeline.prev_base_id == Some(base.id) {
                // A replaced base could not close while it was busy
                close_base(state, base.id).await?;
            }
        }
    }
    Ok(())
}

/// Re-drive every base of a pipeline stuck in a transient status
pub async fn refresh(state: &AppState, id: Uuid) -> Result<()> {
    let Some(pipeline) = pipeline_repository::find_by_id(state.store(), id).await? else {
        return Ok(());
    };
    if !PipelineStatus::TRANSIENT.contains(&pipeline.status) {
        tracing::debug!("Pipeline {} is {}, nothing to refresh", id, pipeline.status);
        return Ok(());
    }

    tracing::debug!("Refreshing pipeline {} ({})", id, pipeline.status);
    let referenced = pipeline.referenced_bases();
    for base in pipeline_base_repository::list_by_pipeline(state.store(), pipeline.id).await? {
        let leftover = base.retired && base.status != PipelineBaseStatus::Closed;
        if leftover || referenced.contains(&base.id) {
            pipeline_base::reconcile(state, base.id).await?;
        }
    }
    if pipeline.status == PipelineStatus::Stopping {
        close_bases(state, &pipeline).await?;
    }
    Ok(())
}

/// Enqueue a refresh for every pipeline in a transient status
pub async fn refresh_all(state: &AppState) -> Result<usize> {
    let pipelines = pipeline_repository::list_by_status(state.store(), PipelineStatus::TRANSIENT).await?;
    for pipeline in &pipelines {
        state.enqueue(Task::RefreshPipeline(pipeline.id)).await?;
    }
    tracing::debug!("Refresh sweep enqueued {} pipelines", pipelines.len());
    Ok(pipelines.len())
}

async fn swap(state: &AppState, pipeline: &Pipeline) -> Result<Pipeline> {
    let former = pipeline.curr_base_id;
    if let Some(former) = former {
        retire(state, former).await?;
    }
    let swapped = transition_with(state.store(), pipeline, PipelineStatus::Running, |p| {
        p.prev_base_id = p.curr_base_id;
        p.curr_base_id = p.next_base_id.take();
        Ok(())
    })
    .await?;
    tracing::info!(
        "Pipeline {} swapped to base {:?}",
        swapped.id,
        swapped.curr_base_id
    );

    if let Some(former) = former {
        if let Some(current) = swapped.curr_base_id {
            job::retarget_pending(state, former, current).await?;
        }
        close_base(state, former).await?;
    }
    Ok(swapped)
}

/// Mark a base replaced as current so it closes once it settles
async fn retire(state: &AppState, base_id: Uuid) -> Result<()> {
    let Some(base) = pipeline_base_repository::find_by_id(state.store(), base_id).await? else {
        return Ok(());
    };
    if base.retired {
        return Ok(());
    }
    let mut next = base.clone();
    next.retired = true;
    repository::update(state.store(), &next).await?;
    Ok(())
}

async fn close_bases(state: &AppState, pipeline: &Pipeline) -> Result<Pipeline> {
    let mut all_closed = true;
    // Every generation, including retired ones the pipeline no longer points at
    for base in pipeline_base_repository::list_by_pipeline(state.store(), pipeline.id).await? {
        if base.status == PipelineBaseStatus::Closed {
            continue;
        }
        all_closed = false;
        close_base(state, base.id).await?;
    }

    if all_closed && pipeline.status == PipelineStatus::Stopping {
        let stopped = transition(state.store(), pipeline, PipelineStatus::Stopped).await?;
        tracing::info!("Pipeline {} stopped", stopped.id);
        return Ok(stopped);
    }
    Ok(pipeline.clone())
}

/// Close a base, leaving busy bases for a later base event
async fn close_base(state: &AppState, base_id: Uuid) -> Result<()> {
    match pipeline_base::close(state, base_id).await {
        Ok(_) | Err(ServiceError::NotFound { .. }) => Ok(()),
        Err(ServiceError::InvalidTransition { from, .. }) => {
            tracing::debug!("Pipeline base {} is {}, closing it later", base_id, from);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

// =============================================================================
// Validation
// =============================================================================

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ServiceError::Validation(
            "Pipeline name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(ServiceError::Validation(format!(
            "Pipeline name is too long (max {} characters)",
            MAX_NAME_LEN
        )));
    }

    let starts_with_letter = name.chars().next().is_some_and(|c| c.is_ascii_lowercase());
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !starts_with_letter || !valid_chars || name.ends_with('-') {
        return Err(ServiceError::Validation(format!(
            "Pipeline name '{}' must be lowercase letters, digits and hyphens, starting with a letter",
            name
        )));
    }

    Ok(())
}

fn validate_config(config: &BaseConfig) -> Result<()> {
    let spec = &config.instance_group;
    for (field, value) in [
        ("project_id", &spec.project_id),
        ("zone", &spec.zone),
        ("machine_type", &spec.machine_type),
        ("boot_disk.source_image", &spec.boot_disk.source_image),
        ("container.image", &config.container.image),
    ] {
        if value.trim().is_empty() {
            return Err(ServiceError::Validation(format!("{} cannot be empty", field)));
        }
    }

    if spec.token_rate < 0 {
        return Err(ServiceError::Validation(
            "token_rate cannot be negative".to_string(),
        ));
    }

    if config.container.size == 0 {
        return Err(ServiceError::Validation(
            "container.size must be at least 1".to_string(),
        ));
    }

    if spec.accelerators.count > 0 && spec.accelerators.accelerator_type.trim().is_empty() {
        return Err(ServiceError::Validation(
            "accelerators.accelerator_type is required when accelerators are requested".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::service::testing::{Harness, base_config};

    async fn pipeline(h: &Harness, id: Uuid) -> Pipeline {
        get(&h.state, h.org.id, id).await.unwrap()
    }

    async fn base_status(h: &Harness, id: Uuid) -> PipelineBaseStatus {
        pipeline_base::get(&h.state, id).await.unwrap().status
    }

    async fn running(h: &Harness) -> Pipeline {
        let created = h.create_pipeline("etl", 1).await;
        h.drain().await;
        let p = pipeline(h, created.id).await;
        assert_eq!(p.status, PipelineStatus::Running);
        p
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("").is_err());
        assert!(validate_name("Etl").is_err());
        assert!(validate_name("1etl").is_err());
        assert!(validate_name("etl-").is_err());
        assert!(validate_name("etl_jobs").is_err());
        assert!(validate_name(&"a".repeat(MAX_NAME_LEN + 1)).is_err());
        assert!(validate_name("etl-jobs-2").is_ok());
    }

    #[test]
    fn test_validate_config() {
        let mut config = base_config(1, 60);
        assert!(validate_config(&config).is_ok());

        config.container.image = " ".to_string();
        assert!(matches!(validate_config(&config), Err(ServiceError::Validation(_))));

        let mut config = base_config(1, 60);
        config.instance_group.accelerators.count = 1;
        config.instance_group.accelerators.accelerator_type = String::new();
        assert!(validate_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_create_build_run() {
        let h = Harness::new().await;
        let created = h.create_pipeline("etl", 1).await;
        assert_eq!(created.status, PipelineStatus::CurrentPreparing);
        assert!(created.curr_base_id.is_some());
        assert_eq!(h.queue.pending().await, vec![Task::BuildPipeline(created.id)]);

        h.drain().await;

        let p = pipeline(&h, created.id).await;
        assert_eq!(p.status, PipelineStatus::Running);
        assert_eq!(p.curr_base_id, created.curr_base_id);
        assert_eq!(base_status(&h, p.curr_base_id.unwrap()).await, PipelineBaseStatus::Awake);
    }

    #[tokio::test]
    async fn test_running_only_after_base_is_awake() {
        let h = Harness::with_polls(2).await;
        let created = h.create_pipeline("etl", 1).await;
        let base_id = created.curr_base_id.unwrap();

        // Deliver one task at a time and check the invariant after each
        for _ in 0..100 {
            if !h.deliver_next().await {
                break;
            }
            let p = pipeline(&h, created.id).await;
            if p.status == PipelineStatus::Running {
                assert!(base_status(&h, base_id).await.is_opened());
            }
        }
        assert_eq!(pipeline(&h, created.id).await.status, PipelineStatus::Running);
    }

    #[tokio::test]
    async fn test_dry_run_does_not_build() {
        let h = Harness::new().await;
        let created = create(
            &h.state,
            h.org.id,
            CreatePipeline {
                name: "etl".to_string(),
                config: base_config(1, 60),
            },
            true,
        )
        .await
        .unwrap();

        assert!(h.queue.pending().await.is_empty());
        assert_eq!(
            base_status(&h, created.curr_base_id.unwrap()).await,
            PipelineBaseStatus::Opening
        );
    }

    #[tokio::test]
    async fn test_failed_build_then_retry() {
        let h = Harness::new().await;
        let created = h.create_pipeline("etl", 1).await;
        h.cloud.fail_next("etl-1-base", "quota").await;
        h.drain().await;

        let p = pipeline(&h, created.id).await;
        assert_eq!(p.status, PipelineStatus::CurrentPreparingError);

        let retried = retry_build(&h.state, h.org.id, p.id).await.unwrap();
        assert_eq!(retried.status, PipelineStatus::CurrentPreparing);
        assert_ne!(retried.curr_base_id, p.curr_base_id);
        h.drain().await;

        let p = pipeline(&h, created.id).await;
        assert_eq!(p.status, PipelineStatus::Running);
        assert_eq!(base_status(&h, created.curr_base_id.unwrap()).await, PipelineBaseStatus::Closed);
        let current = pipeline_base::get(&h.state, p.curr_base_id.unwrap()).await.unwrap();
        assert_eq!(current.name, "etl-2");
    }

    #[tokio::test]
    async fn test_rotation_swaps_and_closes_former_current() {
        let h = Harness::new().await;
        let p = running(&h).await;
        let first = p.curr_base_id.unwrap();

        let mut config = base_config(2, 60);
        config.container.image = "acme/worker:2.0".to_string();
        let updating = update(&h.state, h.org.id, p.id, UpdatePipeline { config }).await.unwrap();
        assert_eq!(updating.status, PipelineStatus::NextPreparing);
        let second = updating.next_base_id.unwrap();
        assert_eq!(updating.curr_base_id, Some(first));

        // Deliver step by step: the pipeline never points at both as current
        for _ in 0..200 {
            if !h.deliver_next().await {
                break;
            }
            let p = pipeline(&h, p.id).await;
            assert_ne!(p.curr_base_id, p.next_base_id);
            assert!(p.curr_base_id == Some(first) || p.curr_base_id == Some(second));
        }

        let p = pipeline(&h, p.id).await;
        assert_eq!(p.status, PipelineStatus::Running);
        assert_eq!(p.curr_base_id, Some(second));
        assert_eq!(p.prev_base_id, Some(first));
        assert!(p.next_base_id.is_none());
        assert_eq!(base_status(&h, first).await, PipelineBaseStatus::Closed);
        assert_eq!(base_status(&h, second).await, PipelineBaseStatus::Awake);
    }

    #[tokio::test]
    async fn test_failed_next_base_returns_to_running() {
        let h = Harness::new().await;
        let p = running(&h).await;
        let first = p.curr_base_id.unwrap();

        h.cloud.fail_next("etl-2-ig", "bad image").await;
        let updating = update(&h.state, h.org.id, p.id, UpdatePipeline { config: base_config(1, 60) })
            .await
            .unwrap();
        let second = updating.next_base_id.unwrap();
        h.drain().await;

        let p = pipeline(&h, p.id).await;
        assert_eq!(p.status, PipelineStatus::Running);
        assert_eq!(p.curr_base_id, Some(first));
        assert!(p.next_base_id.is_none());
        assert_eq!(base_status(&h, first).await, PipelineBaseStatus::Awake);
        assert_eq!(base_status(&h, second).await, PipelineBaseStatus::Closed);
    }

    #[tokio::test]
    async fn test_base_replaced_while_waking_closes_after_second_rotation() {
        use flotilla_core::domain::instance_group::InstanceGroupStatus;
        use flotilla_core::domain::job::JobMessage;
        use flotilla_core::domain::organization::Organization;
        use flotilla_core::dto::job::CreateJob;

        let h = Harness::new().await;
        let p = running(&h).await;
        let first = pipeline_base::get(&h.state, p.curr_base_id.unwrap()).await.unwrap();
        let ig_id = first.instance_group_id.unwrap();
        let manager = crate::service::instance_group::get(&h.state, ig_id)
            .await
            .unwrap()
            .manager_name();

        let checking = transition(h.store(), &first, PipelineBaseStatus::HibernationChecking)
            .await
            .unwrap();
        pipeline_base::hibernate(&h.state, &checking).await.unwrap();
        h.drain().await;
        assert_eq!(base_status(&h, first.id).await, PipelineBaseStatus::Hibernating);

        let second = update(&h.state, h.org.id, p.id, UpdatePipeline { config: base_config(1, 3600) })
            .await
            .unwrap()
            .next_base_id
            .unwrap();

        // A ready job wakes the hibernating current base; its resize stays in flight
        h.cloud.hold(&manager).await;
        let req = CreateJob {
            id_by_client: None,
            message: JobMessage::default(),
            ready: true,
        };
        job::submit(&h.state, h.org.id, p.id, req).await.unwrap();
        assert_eq!(base_status(&h, first.id).await, PipelineBaseStatus::Waking);
        h.drain().await;

        let p = pipeline(&h, p.id).await;
        assert_eq!(p.curr_base_id, Some(second));
        assert_eq!(p.prev_base_id, Some(first.id));
        assert_eq!(base_status(&h, first.id).await, PipelineBaseStatus::Waking);

        let third = update(&h.state, h.org.id, p.id, UpdatePipeline { config: base_config(1, 3600) })
            .await
            .unwrap()
            .next_base_id
            .unwrap();
        h.drain().await;
        let p = pipeline(&h, p.id).await;
        assert_eq!(p.curr_base_id, Some(third));
        assert_eq!(p.prev_base_id, Some(second));

        // The first base settles after the pipeline stopped pointing at it
        h.cloud.release(&manager).await;
        h.drain().await;

        assert_eq!(base_status(&h, first.id).await, PipelineBaseStatus::Closed);
        assert_eq!(base_status(&h, second).await, PipelineBaseStatus::Closed);
        assert_eq!(base_status(&h, third).await, PipelineBaseStatus::Awake);
        let ig = crate::service::instance_group::get(&h.state, ig_id).await.unwrap();
        assert_eq!(ig.status, InstanceGroupStatus::Destructed);
        assert_eq!(ig.token_consumption, 0);

        let org = repository::get::<Organization>(h.store(), h.org.id).await.unwrap();
        assert_eq!(org.token_amount, h.org.token_amount - 1);
    }

    #[tokio::test]
    async fn test_close_reaches_retired_bases() {
        let h = Harness::new().await;
        let p = running(&h).await;
        let first = p.curr_base_id.unwrap();
        let ig_id = pipeline_base::get(&h.state, first)
            .await
            .unwrap()
            .instance_group_id
            .unwrap();
        let manager = crate::service::instance_group::get(&h.state, ig_id)
            .await
            .unwrap()
            .manager_name();

        // Rotate twice while the first base is stuck mid-hibernation
        h.cloud.hold(&manager).await;
        let base = pipeline_base::get(&h.state, first).await.unwrap();
        let base = transition(h.store(), &base, PipelineBaseStatus::HibernationChecking)
            .await
            .unwrap();
        pipeline_base::hibernate(&h.state, &base).await.unwrap();
        for _ in 0..2 {
            update(&h.state, h.org.id, p.id, UpdatePipeline { config: base_config(1, 3600) })
                .await
                .unwrap();
            h.drain().await;
        }
        let rotated = pipeline(&h, p.id).await;
        assert!(!rotated.referenced_bases().contains(&first));
        assert!(pipeline_base::get(&h.state, first).await.unwrap().retired);

        close(&h.state, p.id).await.unwrap();
        h.cloud.release(&manager).await;
        h.drain().await;

        assert_eq!(base_status(&h, first).await, PipelineBaseStatus::Closed);
        assert_eq!(pipeline(&h, p.id).await.status, PipelineStatus::Stopped);
    }

    #[tokio::test]
    async fn test_update_requires_running() {
        let h = Harness::new().await;
        let created = h.create_pipeline("etl", 1).await;

        let err = update(&h.state, h.org.id, created.id, UpdatePipeline { config: base_config(1, 60) })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOperation(_)));
        assert_eq!(list_bases(&h.state, h.org.id, created.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_close_stops_and_destroy_cleans_up() {
        let h = Harness::new().await;
        let p = running(&h).await;

        let err = destroy(&h.state, h.org.id, p.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOperation(_)));

        let stopping = close_owned(&h.state, h.org.id, p.id).await.unwrap();
        assert_eq!(stopping.status, PipelineStatus::Stopping);
        h.drain().await;
        assert_eq!(pipeline(&h, p.id).await.status, PipelineStatus::Stopped);

        destroy(&h.state, h.org.id, p.id).await.unwrap();
        assert!(matches!(
            get(&h.state, h.org.id, p.id).await,
            Err(ServiceError::NotFound { .. })
        ));
        assert!(
            pipeline_base_repository::list_by_pipeline(h.store(), p.id)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_close_waits_for_busy_base() {
        let h = Harness::new().await;
        let p = running(&h).await;
        let base = pipeline_base::get(&h.state, p.curr_base_id.unwrap()).await.unwrap();
        let ig = crate::service::instance_group::get(&h.state, base.instance_group_id.unwrap())
            .await
            .unwrap();

        // Hibernation in flight: the base cannot close yet
        h.cloud.hold(&ig.manager_name()).await;
        let base = transition(h.store(), &base, PipelineBaseStatus::HibernationChecking)
            .await
            .unwrap();
        pipeline_base::hibernate(&h.state, &base).await.unwrap();

        close(&h.state, p.id).await.unwrap();
        assert_eq!(base_status(&h, base.id).await, PipelineBaseStatus::HibernationGoing);

        h.cloud.release(&ig.manager_name()).await;
        h.drain().await;
        assert_eq!(base_status(&h, base.id).await, PipelineBaseStatus::Closed);
        assert_eq!(pipeline(&h, p.id).await.status, PipelineStatus::Stopped);
    }

    #[tokio::test]
    async fn test_other_organizations_pipeline_is_not_found() {
        let h = Harness::new().await;
        let created = h.create_pipeline("etl", 1).await;

        assert!(matches!(
            get(&h.state, Uuid::new_v4(), created.id).await,
            Err(ServiceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_refresh_all_targets_transient_pipelines() {
        let h = Harness::new().await;
        let p = running(&h).await;
        let preparing = h.create_pipeline("other", 1).await;
        h.queue.clear().await;

        assert_eq!(refresh_all(&h.state).await.unwrap(), 1);
        assert_eq!(h.queue.pending().await, vec![Task::RefreshPipeline(preparing.id)]);

        h.drain().await;
        assert_eq!(pipeline(&h, preparing.id).await.status, PipelineStatus::Running);
        assert_eq!(pipeline(&h, p.id).await.status, PipelineStatus::Running);
    }
}
