//! Pipeline DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::{Pipeline, PipelineStatus};
use crate::domain::pipeline_base::{BaseConfig, PipelineBase, PipelineBaseStatus};

/// Request to create a new pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePipeline {
    pub name: String,
    pub config: BaseConfig,
}

/// Request to roll a pipeline onto a new base configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePipeline {
    pub config: BaseConfig,
}

/// Query flags accepted by pipeline creation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePipelineParams {
    /// Persist the pipeline and its base without starting the build
    #[serde(default)]
    pub dry_run: bool,
}

/// Summary information about a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub id: Uuid,
    pub name: String,
    pub status: PipelineStatus,
    pub curr_base_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<Pipeline> for PipelineSummary {
    fn from(pipeline: Pipeline) -> Self {
        PipelineSummary {
            id: pipeline.id,
            name: pipeline.name,
            status: pipeline.status,
            curr_base_id: pipeline.curr_base_id,
            created_at: pipeline.created_at,
        }
    }
}

/// Summary information about a pipeline base
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineBaseSummary {
    pub id: Uuid,
    pub name: String,
    pub status: PipelineBaseStatus,
    pub instance_group_id: Option<Uuid>,
    pub awoke_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl From<PipelineBase> for PipelineBaseSummary {
    fn from(base: PipelineBase) -> Self {
        PipelineBaseSummary {
            id: base.id,
            name: base.name,
            status: base.status,
            instance_group_id: base.instance_group_id,
            awoke_at: base.awoke_at,
            last_error: base.last_error,
        }
    }
}
