//! Pipeline base domain types
//!
//! A pipeline base is one concrete deployed generation of a pipeline: its
//! messaging resources, its instance group and the container running on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::instance_group::InstanceGroupSpec;
use super::{Entity, EntityKind, Lifecycle, Stateful};
use crate::status_labels;

/// Container launched on every instance of the base
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    /// Containers started per instance
    #[serde(default = "default_containers_per_instance")]
    pub size: u32,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub options: String,
    #[serde(default)]
    pub stackdriver_agent: bool,
}

fn default_containers_per_instance() -> u32 {
    1
}

/// Configuration used to open a new base generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseConfig {
    pub instance_group: InstanceGroupSpec,
    pub container: ContainerSpec,
    /// Seconds of inactivity before the base is considered for hibernation
    #[serde(default)]
    pub hibernation_delay: u64,
}

/// Lifecycle of a pipeline base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineBaseStatus {
    Opening,
    OpeningError,
    Hibernating,
    Waking,
    WakingError,
    Awake,
    HibernationChecking,
    HibernationGoing,
    HibernationGoingError,
    Closing,
    ClosingError,
    Closed,
}

status_labels!(PipelineBaseStatus {
    Opening => "opening",
    OpeningError => "opening_error",
    Hibernating => "hibernating",
    Waking => "waking",
    WakingError => "waking_error",
    Awake => "awake",
    HibernationChecking => "hibernation_checking",
    HibernationGoing => "hibernation_going",
    HibernationGoingError => "hibernation_going_error",
    Closing => "closing",
    ClosingError => "closing_error",
    Closed => "closed",
});

impl Lifecycle for PipelineBaseStatus {
    fn successors(self) -> &'static [Self] {
        use PipelineBaseStatus::*;
        match self {
            Opening => &[Awake, OpeningError, Closing],
            OpeningError => &[Closing, Closed],
            Awake => &[HibernationChecking, Closing],
            HibernationChecking => &[HibernationGoing, Awake, Closing],
            HibernationGoing => &[Hibernating, HibernationGoingError],
            HibernationGoingError => &[HibernationGoing, Closing],
            Hibernating => &[Waking, Closing],
            Waking => &[Awake, WakingError],
            WakingError => &[Waking, Closing],
            Closing => &[Closed, ClosingError],
            ClosingError => &[Closing],
            Closed => &[],
        }
    }

    fn as_str(self) -> &'static str {
        self.label()
    }
}

impl PipelineBaseStatus {
    /// Statuses whose instance group may be running jobs
    pub fn is_serving(self) -> bool {
        matches!(
            self,
            PipelineBaseStatus::Awake | PipelineBaseStatus::HibernationChecking
        )
    }

    /// Statuses reached once the base has finished opening and is not closing
    pub fn is_opened(self) -> bool {
        matches!(
            self,
            PipelineBaseStatus::Awake
                | PipelineBaseStatus::HibernationChecking
                | PipelineBaseStatus::HibernationGoing
                | PipelineBaseStatus::HibernationGoingError
                | PipelineBaseStatus::Hibernating
                | PipelineBaseStatus::Waking
                | PipelineBaseStatus::WakingError
        )
    }

    pub fn is_error(self) -> bool {
        matches!(
            self,
            PipelineBaseStatus::OpeningError
                | PipelineBaseStatus::WakingError
                | PipelineBaseStatus::HibernationGoingError
                | PipelineBaseStatus::ClosingError
        )
    }
}

/// One deployed environment of a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineBase {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub pipeline_id: Uuid,
    pub name: String,
    pub config: BaseConfig,
    pub status: PipelineBaseStatus,
    /// Set once the instance group construction has been requested; a base
    /// closed before that point stays without one
    pub instance_group_id: Option<Uuid>,
    /// Deployment holding the base's topics and subscriptions
    pub deployment_name: String,
    /// Cloud operation owned by the base itself, if one is in flight
    pub operation_id: Option<Uuid>,
    /// Last time the base became awake; the idle clock starts here
    pub awoke_at: Option<DateTime<Utc>>,
    /// Replaced as the pipeline's current base; closes as soon as it settles
    #[serde(default)]
    pub retired: bool,
    pub last_error: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineBase {
    /// New base in `opening` for a pipeline generation
    pub fn new(organization_id: Uuid, pipeline_id: Uuid, name: String, config: BaseConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            pipeline_id,
            deployment_name: format!("{}-base", name),
            name,
            config,
            status: PipelineBaseStatus::Opening,
            instance_group_id: None,
            operation_id: None,
            awoke_at: None,
            retired: false,
            last_error: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn job_topic(&self) -> String {
        format!("{}-job-topic", self.name)
    }

    pub fn job_subscription(&self) -> String {
        format!("{}-job-subscription", self.name)
    }

    pub fn progress_topic(&self) -> String {
        format!("{}-progress-topic", self.name)
    }

    pub fn progress_subscription(&self) -> String {
        format!("{}-progress-subscription", self.name)
    }
}

impl Entity for PipelineBase {
    const KIND: EntityKind = EntityKind::PipelineBase;

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn parent_id(&self) -> Option<Uuid> {
        Some(self.pipeline_id)
    }

    fn status_label(&self) -> Option<&'static str> {
        Some(self.status.label())
    }
}

impl Stateful for PipelineBase {
    type Status = PipelineBaseStatus;

    fn status(&self) -> PipelineBaseStatus {
        self.status
    }

    fn set_status(&mut self, status: PipelineBaseStatus) {
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hibernation_cycle_is_legal() {
        use PipelineBaseStatus::*;
        let cycle = [
            Awake,
            HibernationChecking,
            HibernationGoing,
            Hibernating,
            Waking,
            Awake,
        ];
        for pair in cycle.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_error_statuses_do_not_self_heal() {
        use PipelineBaseStatus::*;
        assert!(!OpeningError.can_transition_to(Awake));
        assert!(!WakingError.can_transition_to(Awake));
        assert!(!ClosingError.can_transition_to(Closed));
    }

    #[test]
    fn test_opened_excludes_opening_and_closing() {
        use PipelineBaseStatus::*;
        assert!(Hibernating.is_opened());
        assert!(Awake.is_opened());
        assert!(!Opening.is_opened());
        assert!(!OpeningError.is_opened());
        assert!(!Closing.is_opened());
    }

    #[test]
    fn test_closed_is_terminal() {
        assert!(PipelineBaseStatus::Closed.is_terminal());
        assert!(!PipelineBaseStatus::Hibernating.is_terminal());
    }

    #[test]
    fn test_labels_serialize_as_snake_case() {
        let json = serde_json::to_string(&PipelineBaseStatus::HibernationGoingError).unwrap();
        assert_eq!(json, "\"hibernation_going_error\"");
        assert_eq!(
            PipelineBaseStatus::HibernationGoingError.to_string(),
            "hibernation_going_error"
        );
    }
}
