//! Job domain types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Entity, EntityKind, Lifecycle, Stateful};
use crate::status_labels;

/// Attribute key carrying the job id on every published message
pub const JOB_ID_ATTRIBUTE: &str = "flotilla.job_id";

/// Payload published to the base's job topic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub data: String,
}

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Inactive,
    Blocked,
    Publishing,
    PublishingError,
    Published,
    Started,
    Success,
    Failure,
}

status_labels!(JobStatus {
    Inactive => "inactive",
    Blocked => "blocked",
    Publishing => "publishing",
    PublishingError => "publishing_error",
    Published => "published",
    Started => "started",
    Success => "success",
    Failure => "failure",
});

impl Lifecycle for JobStatus {
    fn successors(self) -> &'static [Self] {
        use JobStatus::*;
        match self {
            Inactive => &[Blocked, Publishing],
            Blocked => &[Publishing, Inactive],
            Publishing => &[Published, PublishingError],
            PublishingError => &[Publishing, Inactive],
            Published => &[Started],
            Started => &[Success, Failure],
            Success | Failure => &[],
        }
    }

    fn as_str(self) -> &'static str {
        self.label()
    }
}

impl JobStatus {
    /// Statuses that keep a base from hibernating
    pub const ACTIVE: &'static [JobStatus] = &[
        JobStatus::Blocked,
        JobStatus::Publishing,
        JobStatus::Published,
        JobStatus::Started,
    ];

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure)
    }
}

/// A unit of work published to a pipeline base
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub pipeline_base_id: Uuid,
    pub id_by_client: Option<String>,
    pub message: JobMessage,
    pub status: JobStatus,
    /// Assigned by the message bus once published
    pub message_id: Option<String>,
    pub hostname: Option<String>,
    pub output: Option<String>,
    pub last_error: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        pipeline_id: Uuid,
        pipeline_base_id: Uuid,
        id_by_client: Option<String>,
        message: JobMessage,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            pipeline_id,
            pipeline_base_id,
            id_by_client,
            message,
            status: JobStatus::Inactive,
            message_id: None,
            hostname: None,
            output: None,
            last_error: None,
            published_at: None,
            started_at: None,
            finished_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Message as it goes on the wire, tagged with the job id for dedup
    pub fn outgoing_message(&self) -> JobMessage {
        let mut message = self.message.clone();
        message
            .attributes
            .insert(JOB_ID_ATTRIBUTE.to_string(), self.id.to_string());
        message
    }
}

impl Entity for Job {
    const KIND: EntityKind = EntityKind::Job;

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
        Some(self.pipeline_base_id)
    }

    fn status_label(&self) -> Option<&'static str> {
        Some(self.status.label())
    }
}

impl Stateful for Job {
    type Status = JobStatus;

    fn status(&self) -> JobStatus {
        self.status
    }

    fn set_status(&mut self, status: JobStatus) {
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finished_jobs_are_immutable() {
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::Failure.is_terminal());
        assert!(!JobStatus::Started.is_terminal());
    }

    #[test]
    fn test_runner_progression() {
        use JobStatus::*;
        assert!(Published.can_transition_to(Started));
        assert!(Started.can_transition_to(Success));
        assert!(!Published.can_transition_to(Success));
        assert!(!Inactive.can_transition_to(Published));
    }

    #[test]
    fn test_outgoing_message_carries_job_id() {
        let mut message = JobMessage::default();
        message.attributes.insert("kind".to_string(), "resize".to_string());
        let job = Job::new(Uuid::new_v4(), Uuid::new_v4(), None, message);

        let outgoing = job.outgoing_message();
        assert_eq!(outgoing.attributes.get(JOB_ID_ATTRIBUTE), Some(&job.id.to_string()));
        assert_eq!(outgoing.attributes.get("kind"), Some(&"resize".to_string()));
        assert!(!job.message.attributes.contains_key(JOB_ID_ATTRIBUTE));
    }
}
