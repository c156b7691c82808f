//! Task descriptors
//!
//! A task is an at-least-once callback that advances one state machine step.
//! Tasks are addressed by path so that an external dispatcher can deliver them
//! as plain HTTP calls; the in-process dispatcher uses the same descriptors.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "task", content = "id", rename_all = "snake_case")]
pub enum Task {
    /// Poll a cloud operation and finalize its owner when done
    WatchOperation(Uuid),
    /// Start opening the pipeline's current or next base
    BuildPipeline(Uuid),
    /// Stop the pipeline and close its bases
    ClosePipeline(Uuid),
    /// Reconcile a pipeline stuck in a transient status
    RefreshPipeline(Uuid),
    /// Enqueue a refresh for every transient pipeline
    RefreshAll,
    /// Re-evaluate idleness of a base in `hibernation_checking`
    HibernationCheck(Uuid),
    /// Start the idle test for one awake base
    PullBase(Uuid),
    /// Run the idle test over every awake base
    PullAll,
    /// Publish a released job
    PublishJob(Uuid),
    /// Let a base react to its instance group's new status
    InstanceGroupChanged(Uuid),
    /// Let a pipeline react to one of its bases' new status
    BaseChanged(Uuid),
    /// Compare an instance group's working instances with its thresholds
    HealthCheck(Uuid),
}

impl Task {
    /// Endpoint path the task is delivered to
    pub fn path(&self) -> String {
        match self {
            Task::WatchOperation(id) => format!("/operations/{}/watch_task", id),
            Task::BuildPipeline(id) => format!("/pipelines/{}/build_task", id),
            Task::ClosePipeline(id) => format!("/pipelines/{}/close_task", id),
            Task::RefreshPipeline(id) => format!("/pipelines/{}/refresh_task", id),
            Task::RefreshAll => "/pipelines/refresh_task".to_string(),
            Task::HibernationCheck(id) => {
                format!("/pipeline_bases/{}/hibernation_checking_task", id)
            }
            Task::PullBase(id) => format!("/pipeline_bases/{}/pull_task", id),
            Task::PullAll => "/pipeline_bases/pull_task".to_string(),
            Task::PublishJob(id) => format!("/jobs/{}/publish_task", id),
            Task::InstanceGroupChanged(id) => format!("/instance_groups/{}/changed_task", id),
            Task::BaseChanged(id) => format!("/pipeline_bases/{}/changed_task", id),
            Task::HealthCheck(id) => format!("/instance_groups/{}/health_check_task", id),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_address_the_entity() {
        let id = Uuid::new_v4();
        assert_eq!(
            Task::WatchOperation(id).path(),
            format!("/operations/{}/watch_task", id)
        );
        assert_eq!(
            Task::BuildPipeline(id).path(),
            format!("/pipelines/{}/build_task", id)
        );
        assert_eq!(Task::PullAll.path(), "/pipeline_bases/pull_task");
        assert_eq!(
            Task::BaseChanged(id).path(),
            format!("/pipeline_bases/{}/changed_task", id)
        );
        assert_eq!(
            Task::HealthCheck(id).path(),
            format!("/instance_groups/{}/health_check_task", id)
        );
    }

    #[test]
    fn test_task_serializes_with_tag() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(Task::HibernationCheck(id)).unwrap();
        assert_eq!(json["task"], "hibernation_check");
        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back, Task::HibernationCheck(id));
    }
}
