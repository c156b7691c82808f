//! Shared application state
//!
//! Every handler and task receives the same bundle of collaborators. The store
//! is the only shared mutable resource; the provider, the bus and the queue
//! are external systems reached through their traits.

use std::sync::Arc;
use std::time::Duration;

use flotilla_core::task::Task;

use crate::config::Config;
use crate::provider::{CloudProvider, Publisher, TaskQueue, TaskQueueError};
use crate::repository::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub cloud: Arc<dyn CloudProvider>,
    pub bus: Arc<dyn Publisher>,
    pub tasks: Arc<dyn TaskQueue>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        cloud: Arc<dyn CloudProvider>,
        bus: Arc<dyn Publisher>,
        tasks: Arc<dyn TaskQueue>,
        config: Config,
    ) -> Self {
        Self {
            store,
            cloud,
            bus,
            tasks,
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Enqueue a task for immediate delivery
    pub async fn enqueue(&self, task: Task) -> Result<(), TaskQueueError> {
        self.tasks.enqueue(task, Duration::ZERO).await
    }
}
