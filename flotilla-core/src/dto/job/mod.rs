//! Job DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{Job, JobMessage, JobStatus};

/// Request to submit a job to a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJob {
    #[serde(default)]
    pub id_by_client: Option<String>,
    pub message: JobMessage,
    /// Publish as soon as the pipeline's current base allows it
    #[serde(default)]
    pub ready: bool,
}

/// Progress reported by a runner for a job it picked up
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobReport {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}

/// Summary information about a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub id_by_client: Option<String>,
    pub status: JobStatus,
    pub message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobSummary {
    fn from(job: Job) -> Self {
        JobSummary {
            id: job.id,
            pipeline_id: job.pipeline_id,
            id_by_client: job.id_by_client,
            status: job.status,
            message_id: job.message_id,
            created_at: job.created_at,
            finished_at: job.finished_at,
        }
    }
}
