//! Hibernation Controller
//!
//! Idle detection for awake bases. A base is idle when none of its jobs is
//! active and its hibernation delay has elapsed since the later of its last
//! finished job and the moment it last woke up. An idle base is first marked
//! `hibernation_checking`; a separate check delivery confirms it is still idle
//! before the instance group is scaled to zero.

use chrono::{DateTime, Utc};
use flotilla_core::domain::job::JobStatus;
use flotilla_core::domain::pipeline_base::{PipelineBase, PipelineBaseStatus};
use flotilla_core::task::Task;
use uuid::Uuid;

use super::error::Result;
use super::pipeline_base;
use super::transition::transition;
use crate::repository::{job_repository, pipeline_base_repository};
use crate::state::AppState;

/// Statuses the pull sweep visits
const PULLED: &[PipelineBaseStatus] = &[PipelineBaseStatus::Awake, PipelineBaseStatus::Hibernating];

/// Run the idle test on one base
pub async fn pull(state: &AppState, id: Uuid) -> Result<()> {
    let Some(base) = pipeline_base_repository::find_by_id(state.store(), id).await? else {
        return Ok(());
    };

    if base.retired && base.status.is_opened() {
        // A replaced base that settled without its pipeline noticing
        tracing::info!("Pipeline base {} is retired, requesting its close", id);
        state.enqueue(Task::BaseChanged(base.id)).await?;
        return Ok(());
    }

    match base.status {
        PipelineBaseStatus::Awake => pull_awake(state, &base).await,
        PipelineBaseStatus::Hibernating => {
            // Catch jobs blocked while the base was on its way down
            let blocked =
                job_repository::list_by_base(state.store(), base.id, Some(&[JobStatus::Blocked][..]))
                    .await?;
            if !blocked.is_empty() {
                pipeline_base::wake(state, base.id).await?;
            }
            Ok(())
        }
        status => {
            tracing::debug!("Pipeline base {} is {}, skipping idle test", id, status);
            Ok(())
        }
    }
}

async fn pull_awake(state: &AppState, base: &PipelineBase) -> Result<()> {
    if job_repository::has_active(state.store(), base.id).await? {
        tracing::debug!("Pipeline base {} has active jobs", base.id);
        return Ok(());
    }

    let last_finished = job_repository::last_finished_at(state.store(), base.id).await?;
    let reference = idle_since(base, last_finished);
    let idle = (Utc::now() - reference).num_seconds();
    let delay = i64::try_from(base.config.hibernation_delay).unwrap_or(i64::MAX);
    if idle < delay {
        tracing::debug!(
            "Pipeline base {} idle for {}s of {}s",
            base.id,
            idle,
            delay
        );
        return Ok(());
    }

    tracing::info!("Pipeline base {} idle for {}s, checking hibernation", base.id, idle);
    let base = transition(state.store(), base, PipelineBaseStatus::HibernationChecking).await?;
    state.enqueue(Task::BaseChanged(base.id)).await?;
    state.enqueue(Task::HibernationCheck(base.id)).await?;
    Ok(())
}

/// Moment the idle clock started for a base
fn idle_since(base: &PipelineBase, last_finished: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let woke = base.awoke_at.unwrap_or(base.created_at);
    match last_finished {
        Some(finished) if finished > woke => finished,
        _ => woke,
    }
}

/// Confirm a base marked for hibernation is still idle
pub async fn check(state: &AppState, id: Uuid) -> Result<()> {
    let Some(base) = pipeline_base_repository::find_by_id(state.store(), id).await? else {
        return Ok(());
    };
    if base.status != PipelineBaseStatus::HibernationChecking {
        tracing::debug!("Pipeline base {} is {}, hibernation check dropped", id, base.status);
        return Ok(());
    }

    if job_repository::has_active(state.store(), base.id).await? {
        tracing::info!("Pipeline base {} became busy, staying awake", id);
        pipeline_base::cancel_hibernation(state, &base).await?;
    } else {
        pipeline_base::hibernate(state, &base).await?;
    }
    Ok(())
}

/// Enqueue an idle test for every awake or hibernating base
pub async fn sweep(state: &AppState) -> Result<usize> {
    let bases = pipeline_base_repository::list_by_status(state.store(), PULLED).await?;
    for base in &bases {
        state.enqueue(Task::PullBase(base.id)).await?;
    }
    tracing::debug!("Pull sweep enqueued {} bases", bases.len());
    Ok(bases.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use flotilla_core::domain::job::{Job, JobMessage};

    use crate::repository;
    use crate::service::testing::Harness;

    async fn awake_base(h: &Harness, delay: u64) -> PipelineBase {
        let pipeline = h.create_pipeline_with_delay("etl", 1, delay).await;
        h.drain().await;
        let base = pipeline_base::get(&h.state, pipeline.curr_base_id.unwrap()).await.unwrap();
        assert_eq!(base.status, PipelineBaseStatus::Awake);
        base
    }

    async fn status(h: &Harness, id: Uuid) -> PipelineBaseStatus {
        pipeline_base::get(&h.state, id).await.unwrap().status
    }

    #[test]
    fn test_idle_clock_starts_at_later_event() {
        let now = Utc::now();
        let mut base = PipelineBase::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "etl-1".to_string(),
            crate::service::testing::base_config(1, 60),
        );
        base.awoke_at = Some(now - Duration::seconds(100));

        assert_eq!(idle_since(&base, None), now - Duration::seconds(100));
        assert_eq!(
            idle_since(&base, Some(now - Duration::seconds(10))),
            now - Duration::seconds(10)
        );
        assert_eq!(
            idle_since(&base, Some(now - Duration::seconds(500))),
            now - Duration::seconds(100)
        );
    }

    #[tokio::test]
    async fn test_recently_woken_base_stays_awake() {
        let h = Harness::new().await;
        let base = awake_base(&h, 3600).await;

        pull(&h.state, base.id).await.unwrap();
        assert_eq!(status(&h, base.id).await, PipelineBaseStatus::Awake);
    }

    #[tokio::test]
    async fn test_hibernation_round_trip() {
        let h = Harness::new().await;
        let base = awake_base(&h, 0).await;

        pull(&h.state, base.id).await.unwrap();
        assert_eq!(status(&h, base.id).await, PipelineBaseStatus::HibernationChecking);
        assert!(h.queue.pending().await.contains(&Task::HibernationCheck(base.id)));

        check(&h.state, base.id).await.unwrap();
        assert_eq!(status(&h, base.id).await, PipelineBaseStatus::HibernationGoing);

        h.drain().await;
        assert_eq!(status(&h, base.id).await, PipelineBaseStatus::Hibernating);
    }

    #[tokio::test]
    async fn test_active_job_blocks_hibernation() {
        let h = Harness::new().await;
        let base = awake_base(&h, 0).await;

        let mut job = Job::new(base.pipeline_id, base.id, None, JobMessage::default());
        job.status = JobStatus::Published;
        repository::insert(h.store(), &job).await.unwrap();

        pull(&h.state, base.id).await.unwrap();
        assert_eq!(status(&h, base.id).await, PipelineBaseStatus::Awake);
    }

    #[tokio::test]
    async fn test_check_returns_busy_base_to_awake() {
        let h = Harness::new().await;
        let base = awake_base(&h, 0).await;
        pull(&h.state, base.id).await.unwrap();

        let mut job = Job::new(base.pipeline_id, base.id, None, JobMessage::default());
        job.status = JobStatus::Started;
        repository::insert(h.store(), &job).await.unwrap();

        check(&h.state, base.id).await.unwrap();
        assert_eq!(status(&h, base.id).await, PipelineBaseStatus::Awake);
    }

    #[tokio::test]
    async fn test_retired_base_is_handed_back_for_closing() {
        let h = Harness::new().await;
        let base = awake_base(&h, 0).await;
        let mut retired = base.clone();
        retired.retired = true;
        repository::update(h.store(), &retired).await.unwrap();
        h.queue.clear().await;

        pull(&h.state, base.id).await.unwrap();
        assert_eq!(status(&h, base.id).await, PipelineBaseStatus::Awake);
        assert_eq!(h.queue.pending().await, vec![Task::BaseChanged(base.id)]);
    }

    #[tokio::test]
    async fn test_sweep_visits_awake_and_hibernating_bases() {
        let h = Harness::new().await;
        let base = awake_base(&h, 3600).await;
        h.queue.clear().await;

        assert_eq!(sweep(&h.state).await.unwrap(), 1);
        assert_eq!(h.queue.pending().await, vec![Task::PullBase(base.id)]);
    }
}
