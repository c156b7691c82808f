//! Message bus
//!
//! Jobs are published to their base's job topic. The bus assigns the message
//! id that is recorded on the job.

use std::collections::HashSet;

use async_trait::async_trait;
use flotilla_core::domain::job::JobMessage;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("topic {topic} rejected the message: {message}")]
    Rejected { topic: String, message: String },
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish a message and return the bus-assigned message id
    async fn publish(&self, topic: &str, message: &JobMessage) -> Result<String, PublishError>;
}

/// Message accepted by the in-memory bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub message_id: String,
    pub message: JobMessage,
}

#[derive(Default)]
struct BusState {
    counter: u64,
    published: Vec<PublishedMessage>,
    failing_topics: HashSet<String>,
}

/// Records published messages; topics can be made to fail
#[derive(Default)]
pub struct InMemoryBus {
    state: Mutex<BusState>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_topic(&self, topic: &str) {
        self.state.lock().await.failing_topics.insert(topic.to_string());
    }

    pub async fn restore_topic(&self, topic: &str) {
        self.state.lock().await.failing_topics.remove(topic);
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().await.published.clone()
    }
}

#[async_trait]
impl Publisher for InMemoryBus {
    async fn publish(&self, topic: &str, message: &JobMessage) -> Result<String, PublishError> {
        let mut state = self.state.lock().await;
        if state.failing_topics.contains(topic) {
            return Err(PublishError::Rejected {
                topic: topic.to_string(),
                message: "topic is failing".to_string(),
            });
        }

        state.counter += 1;
        let message_id = format!("{}", state.counter);
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            message_id: message_id.clone(),
            message: message.clone(),
        });

        tracing::debug!("Published message {} to {}", message_id, topic);
        Ok(message_id)
    }
}
