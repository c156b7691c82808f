//! Pipeline domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pipeline_base::BaseConfig;
use super::{Entity, EntityKind, Lifecycle, Stateful};
use crate::status_labels;

/// Lifecycle of a pipeline across its base generations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    CurrentPreparing,
    CurrentPreparingError,
    Running,
    NextPreparing,
    Stopping,
    StoppingError,
    Stopped,
}

status_labels!(PipelineStatus {
    CurrentPreparing => "current_preparing",
    CurrentPreparingError => "current_preparing_error",
    Running => "running",
    NextPreparing => "next_preparing",
    Stopping => "stopping",
    StoppingError => "stopping_error",
    Stopped => "stopped",
});

impl Lifecycle for PipelineStatus {
    fn successors(self) -> &'static [Self] {
        use PipelineStatus::*;
        match self {
            CurrentPreparing => &[Running, CurrentPreparingError, Stopping],
            CurrentPreparingError => &[CurrentPreparing, Stopping],
            Running => &[NextPreparing, Stopping],
            NextPreparing => &[Running, Stopping],
            Stopping => &[Stopped, StoppingError],
            StoppingError => &[Stopping],
            Stopped => &[],
        }
    }

    fn as_str(self) -> &'static str {
        self.label()
    }
}

impl PipelineStatus {
    /// Statuses the refresh sweep reconciles
    pub const TRANSIENT: &'static [PipelineStatus] = &[
        PipelineStatus::CurrentPreparing,
        PipelineStatus::NextPreparing,
        PipelineStatus::Stopping,
    ];

    /// Whether jobs may be submitted to the pipeline
    pub fn accepts_jobs(self) -> bool {
        matches!(
            self,
            PipelineStatus::CurrentPreparing | PipelineStatus::Running | PipelineStatus::NextPreparing
        )
    }
}

/// Logical batch-processing unit exposed to clients
///
/// The base ids are weak references: a base may outlive its pipeline while it
/// is being torn down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    /// Configuration for the next base generation
    pub config: BaseConfig,
    pub prev_base_id: Option<Uuid>,
    pub curr_base_id: Option<Uuid>,
    pub next_base_id: Option<Uuid>,
    /// Generation counter used to name bases
    pub generation: u32,
    pub status: PipelineStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pipeline {
    pub fn new(organization_id: Uuid, name: String, config: BaseConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name,
            config,
            prev_base_id: None,
            curr_base_id: None,
            next_base_id: None,
            generation: 0,
            status: PipelineStatus::CurrentPreparing,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Name for the next base generation
    pub fn next_base_name(&mut self) -> String {
        self.generation += 1;
        format!("{}-{}", self.name, self.generation)
    }

    /// Every base id the pipeline still references
    pub fn referenced_bases(&self) -> Vec<Uuid> {
        [self.prev_base_id, self.curr_base_id, self.next_base_id]
            .into_iter()
            .flatten()
            .collect()
    }
}

impl Entity for Pipeline {
    const KIND: EntityKind = EntityKind::Pipeline;

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
        Some(self.organization_id)
    }

    fn status_label(&self) -> Option<&'static str> {
        Some(self.status.label())
    }
}

impl Stateful for Pipeline {
    type Status = PipelineStatus;

    fn status(&self) -> PipelineStatus {
        self.status
    }

    fn set_status(&mut self, status: PipelineStatus) {
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preparing_statuses_are_exclusive() {
        use PipelineStatus::*;
        assert!(!CurrentPreparing.can_transition_to(NextPreparing));
        assert!(!NextPreparing.can_transition_to(CurrentPreparing));
        assert!(!NextPreparing.can_transition_to(NextPreparing));
    }

    #[test]
    fn test_stopped_is_terminal() {
        assert!(PipelineStatus::Stopped.is_terminal());
        assert!(!PipelineStatus::Stopped.accepts_jobs());
        assert!(PipelineStatus::Running.accepts_jobs());
    }

    #[test]
    fn test_unknown_label_is_rejected() {
        assert!("hibernating".parse::<PipelineStatus>().is_err());
        assert_eq!("next_preparing".parse::<PipelineStatus>(), Ok(PipelineStatus::NextPreparing));
    }
}
