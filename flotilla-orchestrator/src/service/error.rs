//! Service Errors
//!
//! One error type shared by every controller. Provider and bus failures that
//! belong on an entity's error status are recorded there and never reach the
//! caller; the variants below are what is left for the API and task layers.

use flotilla_core::domain::EntityKind;
use thiserror::Error;
use uuid::Uuid;

use crate::provider::{ProviderError, PublishError, TaskQueueError};
use crate::repository::StoreError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: Uuid },

    #[error("{kind} {id} was modified concurrently")]
    Conflict { kind: EntityKind, id: Uuid },

    #[error("{kind} {id} cannot move from {from} to {to}")]
    InvalidTransition {
        kind: EntityKind,
        id: Uuid,
        from: String,
        to: String,
    },

    #[error("{0}")]
    InvalidOperation(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    TaskQueue(#[from] TaskQueueError),

    #[error(transparent)]
    Store(StoreError),
}

impl ServiceError {
    pub fn not_found(kind: EntityKind, id: Uuid) -> Self {
        ServiceError::NotFound { kind, id }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { kind, id } => ServiceError::Conflict { kind, id },
            StoreError::NotFound { kind, id } => ServiceError::NotFound { kind, id },
            other => ServiceError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_conflict_maps_to_service_conflict() {
        let id = Uuid::new_v4();
        let err: ServiceError = StoreError::Conflict {
            kind: EntityKind::Pipeline,
            id,
        }
        .into();
        assert!(matches!(err, ServiceError::Conflict { kind: EntityKind::Pipeline, .. }));
        assert_eq!(err.to_string(), format!("pipeline {} was modified concurrently", id));
    }

    #[test]
    fn test_transition_error_names_the_action() {
        let id = Uuid::new_v4();
        let err = ServiceError::InvalidTransition {
            kind: EntityKind::PipelineBase,
            id,
            from: "waking".to_string(),
            to: "closing".to_string(),
        };
        assert_eq!(
            err.to_string(),
            format!("pipeline_base {} cannot move from waking to closing", id)
        );
    }
}
