//! Local task worker
//!
//! In-process dispatcher for standalone runs. Enqueued tasks travel through an
//! unbounded channel; each delivery runs in its own task, sleeps for its delay
//! and then goes through [`task::dispatch`]. Failed deliveries come back with
//! a capped exponential backoff. Two tickers feed the periodic sweeps.

use std::time::Duration;

use async_trait::async_trait;
use flotilla_core::task::Task;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::provider::{TaskQueue, TaskQueueError};
use crate::service::task;
use crate::state::AppState;

/// Deliveries after which a failing task is given up; the refresh sweep
/// reconciles whatever it left behind
const MAX_ATTEMPTS: u32 = 12;

const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// One pending delivery of a task
#[derive(Debug, Clone, Copy)]
pub struct Delivery {
    pub task: Task,
    pub delay: Duration,
    pub attempt: u32,
}

/// Task queue backed by the in-process worker
#[derive(Clone)]
pub struct LocalTaskQueue {
    sender: mpsc::UnboundedSender<Delivery>,
}

impl LocalTaskQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, delivery: Delivery) -> Result<(), TaskQueueError> {
        self.sender.send(delivery).map_err(|_| TaskQueueError::Closed)
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn enqueue(&self, task: Task, delay: Duration) -> Result<(), TaskQueueError> {
        self.send(Delivery {
            task,
            delay,
            attempt: 0,
        })
    }
}

/// Delay before redelivering a task that failed `attempt` times
pub fn backoff(attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
    BASE_BACKOFF.saturating_mul(factor).min(MAX_BACKOFF)
}

/// Start delivering tasks from `receiver`
pub fn spawn(
    state: AppState,
    queue: LocalTaskQueue,
    mut receiver: mpsc::UnboundedReceiver<Delivery>,
) -> JoinHandle<()> {
    info!("Starting local task worker");
    tokio::spawn(async move {
        while let Some(delivery) = receiver.recv().await {
            let state = state.clone();
            let queue = queue.clone();
            tokio::spawn(async move {
                deliver(state, queue, delivery).await;
            });
        }
        debug!("Task channel closed, worker stopping");
    })
}

async fn deliver(state: AppState, queue: LocalTaskQueue, delivery: Delivery) {
    if !delivery.delay.is_zero() {
        time::sleep(delivery.delay).await;
    }

    let Err(e) = task::dispatch(&state, delivery.task).await else {
        return;
    };

    let attempt = delivery.attempt + 1;
    if attempt >= MAX_ATTEMPTS {
        error!(
            "Giving up on {} after {} attempts: {}",
            delivery.task, attempt, e
        );
        return;
    }

    let delay = backoff(attempt);
    warn!(
        "Delivery of {} failed (attempt {}), retrying in {:?}: {}",
        delivery.task, attempt, delay, e
    );
    let retry = Delivery {
        task: delivery.task,
        delay,
        attempt,
    };
    if queue.send(retry).is_err() {
        error!("Task channel closed, dropping {}", delivery.task);
    }
}

/// Start the refresh and pull sweeps
pub fn spawn_tickers(state: AppState) -> Vec<JoinHandle<()>> {
    vec![
        ticker(state.clone(), Task::RefreshAll, state.config.refresh_interval),
        ticker(state.clone(), Task::PullAll, state.config.pull_interval),
    ]
}

fn ticker(state: AppState, task: Task, period: Duration) -> JoinHandle<()> {
    info!("Scheduling {} every {:?}", task, period);
    tokio::spawn(async move {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = state.enqueue(task).await {
                error!("Failed to enqueue {}: {}", task, e);
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::domain::pipeline::PipelineStatus;
    use flotilla_core::dto::pipeline::CreatePipeline;
    use std::sync::Arc;

    use crate::config::Config;
    use crate::provider::{InMemoryBus, InMemoryCloud};
    use crate::repository::MemoryStore;
    use crate::service::{organization, pipeline, testing};

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff(0), Duration::from_secs(1));
        assert_eq!(backoff(3), Duration::from_secs(8));
        assert_eq!(backoff(9), MAX_BACKOFF);
        assert_eq!(backoff(u32::MAX), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_fails() {
        let (queue, receiver) = LocalTaskQueue::new();
        drop(receiver);
        assert!(matches!(
            queue.enqueue(Task::PullAll, Duration::ZERO).await,
            Err(TaskQueueError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_worker_drives_pipeline_to_running() {
        let (queue, receiver) = LocalTaskQueue::new();
        let mut config = Config::default();
        config.watch_interval = Duration::from_millis(5);
        let state = AppState::new(
            Arc::new(MemoryStore::new()),
            Arc::new(InMemoryCloud::new(2)),
            Arc::new(InMemoryBus::new()),
            Arc::new(queue.clone()),
            config,
        );
        let worker = spawn(state.clone(), queue, receiver);

        let org = organization::create(
            state.store(),
            flotilla_core::dto::organization::CreateOrganization {
                name: "acme".to_string(),
                memo: None,
                token_amount: 100,
            },
        )
        .await
        .unwrap();
        let p = pipeline::create(
            &state,
            org.id,
            CreatePipeline {
                name: "etl".to_string(),
                config: testing::base_config(1, 60),
            },
            false,
        )
        .await
        .unwrap();

        let mut status = p.status;
        for _ in 0..200 {
            status = pipeline::get(&state, org.id, p.id).await.unwrap().status;
            if status == PipelineStatus::Running {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, PipelineStatus::Running);
        worker.abort();
    }
}
