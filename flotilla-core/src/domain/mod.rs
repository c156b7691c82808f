//! Core domain types
//!
//! This module contains the persisted entities of the orchestrator. Every entity
//! carries an optimistic-concurrency `version` that the store checks on write, and
//! every entity with a lifecycle exposes its status through [`Stateful`] so that
//! transitions can be validated against the entity's transition table.

pub mod auth;
pub mod instance_group;
pub mod job;
pub mod lifecycle;
pub mod operation;
pub mod organization;
pub mod pipeline;
pub mod pipeline_base;

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

pub use lifecycle::Lifecycle;

/// Kind of a persisted entity, used as the store's table discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Organization,
    AuthToken,
    Pipeline,
    PipelineBase,
    InstanceGroup,
    CloudAsyncOperation,
    Job,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Organization => "organization",
            EntityKind::AuthToken => "auth_token",
            EntityKind::Pipeline => "pipeline",
            EntityKind::PipelineBase => "pipeline_base",
            EntityKind::InstanceGroup => "instance_group",
            EntityKind::CloudAsyncOperation => "cloud_async_operation",
            EntityKind::Job => "job",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted record with an identity and an optimistic version
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> Uuid;

    /// Version of the record as last read from (or written to) the store.
    /// Zero means the record has never been stored.
    fn version(&self) -> i64;

    fn set_version(&mut self, version: i64);

    /// Refresh `updated_at` before a write
    fn touch(&mut self, now: DateTime<Utc>);

    /// Id of the record this one is listed under (organization of a pipeline,
    /// base of a job, ...). Used by store queries.
    fn parent_id(&self) -> Option<Uuid> {
        None
    }

    /// Persisted status label, used by store queries
    fn status_label(&self) -> Option<&'static str> {
        None
    }
}

/// An entity whose status is governed by a transition table
pub trait Stateful: Entity {
    type Status: Lifecycle;

    fn status(&self) -> Self::Status;

    fn set_status(&mut self, status: Self::Status);
}
