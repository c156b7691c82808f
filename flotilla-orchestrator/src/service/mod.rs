//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Each controller owns one state machine and talks to the others in two ways:
//! direct calls downwards (pipeline → base → instance group → operation) and
//! tasks upwards, so that no controller calls back into its caller.

pub mod auth;
pub mod error;
pub mod hibernation;
pub mod instance_group;
pub mod job;
pub mod operation;
pub mod organization;
pub mod pipeline;
pub mod pipeline_base;
pub mod task;
pub mod transition;

#[cfg(test)]
pub mod testing;

// Re-export for convenience
pub use auth as auth_service;
pub use error::{Result, ServiceError};
pub use job as job_service;
pub use organization as organization_service;
pub use pipeline as pipeline_service;
pub use pipeline_base as pipeline_base_service;
pub use task as task_service;
