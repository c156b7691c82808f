//! Provider Module
//!
//! External collaborators of the orchestrator: the cloud resource provider,
//! the message bus and the task queue, together with the payloads sent to
//! the cloud.

pub mod bus;
pub mod cloud;
pub mod deployment;
pub mod queue;
pub mod startup_script;

pub use bus::{InMemoryBus, PublishError, Publisher};
pub use cloud::{
    CloudProvider, InMemoryCloud, InstanceStatus, ManagedInstance, ProviderError, ResourceRequest,
};
pub use queue::{TaskQueue, TaskQueueError};
