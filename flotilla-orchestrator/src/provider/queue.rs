//! Task queue
//!
//! Tasks are delivered at least once, after an optional delay. Handlers must
//! tolerate redelivery.

use std::time::Duration;

use async_trait::async_trait;
use flotilla_core::task::Task;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskQueueError {
    #[error("task queue is closed")]
    Closed,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: Task, delay: Duration) -> Result<(), TaskQueueError>;
}

/// Keeps enqueued tasks until a test harness delivers them
#[cfg(test)]
#[derive(Default)]
pub struct RecordingTaskQueue {
    tasks: tokio::sync::Mutex<std::collections::VecDeque<(Task, Duration)>>,
}

#[cfg(test)]
impl RecordingTaskQueue {
    pub async fn pop(&self) -> Option<(Task, Duration)> {
        self.tasks.lock().await.pop_front()
    }

    pub async fn pending(&self) -> Vec<Task> {
        self.tasks.lock().await.iter().map(|(t, _)| *t).collect()
    }

    pub async fn clear(&self) {
        self.tasks.lock().await.clear();
    }
}

#[cfg(test)]
#[async_trait]
impl TaskQueue for RecordingTaskQueue {
    async fn enqueue(&self, task: Task, delay: Duration) -> Result<(), TaskQueueError> {
        self.tasks.lock().await.push_back((task, delay));
        Ok(())
    }
}
