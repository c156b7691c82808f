//! Test harness
//!
//! Wires the controllers to the in-memory store, the simulated provider, the
//! in-memory bus and a recording task queue. Tasks are delivered by hand, one
//! at a time, so tests can observe every intermediate state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flotilla_core::domain::EntityKind;
use flotilla_core::domain::instance_group::{Accelerators, BootDisk, InstanceGroupSpec};
use flotilla_core::domain::organization::Organization;
use flotilla_core::domain::pipeline::Pipeline;
use flotilla_core::domain::pipeline_base::{BaseConfig, ContainerSpec, PipelineBase};
use flotilla_core::dto::organization::CreateOrganization;
use flotilla_core::dto::pipeline::CreatePipeline;
use flotilla_core::task::Task;
use uuid::Uuid;

use super::{organization, pipeline, task};
use crate::config::Config;
use crate::provider::queue::RecordingTaskQueue;
use crate::provider::{InMemoryBus, InMemoryCloud};
use crate::repository::{self, Filter, MemoryStore, Record, Store, StoreError};
use crate::state::AppState;

/// Upper bound on deliveries in one drain; a watch on a held operation
/// would otherwise loop forever
const MAX_DELIVERIES: usize = 500;

const DEFAULT_TOKENS: i64 = 1000;

/// Base configuration with `instance_size` instances at one token each
pub fn base_config(instance_size: u32, hibernation_delay: u64) -> BaseConfig {
    BaseConfig {
        instance_group: InstanceGroupSpec {
            project_id: "acme-project".to_string(),
            zone: "us-central1-a".to_string(),
            machine_type: "n1-standard-1".to_string(),
            boot_disk: BootDisk {
                source_image: "projects/cos-cloud/global/images/family/cos-stable".to_string(),
                size_gb: 0,
                disk_type: None,
            },
            accelerators: Accelerators::default(),
            preemptible: false,
            instance_size,
            token_rate: 1,
            health_check: Default::default(),
        },
        container: ContainerSpec {
            image: "acme/worker:1.0".to_string(),
            size: 1,
            command: String::new(),
            options: String::new(),
            stackdriver_agent: false,
        },
        hibernation_delay,
    }
}

pub struct Harness {
    pub state: AppState,
    pub cloud: Arc<InMemoryCloud>,
    pub bus: Arc<InMemoryBus>,
    pub queue: Arc<RecordingTaskQueue>,
    pub org: Organization,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(1, DEFAULT_TOKENS).await
    }

    /// Harness over a caller-supplied store
    pub async fn with_store(store: Arc<dyn Store>) -> Self {
        Self::build_with(store, 1, DEFAULT_TOKENS).await
    }

    /// Operations report done on their `polls`-th watch
    pub async fn with_polls(polls: u32) -> Self {
        Self::build(polls, DEFAULT_TOKENS).await
    }

    pub async fn with_tokens(token_amount: i64) -> Self {
        Self::build(1, token_amount).await
    }

    async fn build(polls: u32, token_amount: i64) -> Self {
        Self::build_with(Arc::new(MemoryStore::new()), polls, token_amount).await
    }

    async fn build_with(store: Arc<dyn Store>, polls: u32, token_amount: i64) -> Self {
        let cloud = Arc::new(InMemoryCloud::new(polls));
        let bus = Arc::new(InMemoryBus::new());
        let queue = Arc::new(RecordingTaskQueue::default());

        let mut config = Config::default();
        config.watch_interval = Duration::ZERO;

        let state = AppState::new(
            store,
            cloud.clone(),
            bus.clone(),
            queue.clone(),
            config,
        );

        let org = organization::create(
            state.store(),
            CreateOrganization {
                name: "acme".to_string(),
                memo: None,
                token_amount,
            },
        )
        .await
        .unwrap();

        Self {
            state,
            cloud,
            bus,
            queue,
            org,
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.state.store()
    }

    /// Create a pipeline; the build task is left in the queue
    pub async fn create_pipeline(&self, name: &str, instance_size: u32) -> Pipeline {
        self.create_pipeline_with_delay(name, instance_size, 3600).await
    }

    pub async fn create_pipeline_with_delay(
        &self,
        name: &str,
        instance_size: u32,
        hibernation_delay: u64,
    ) -> Pipeline {
        pipeline::create(
            &self.state,
            self.org.id,
            CreatePipeline {
                name: name.to_string(),
                config: base_config(instance_size, hibernation_delay),
            },
            false,
        )
        .await
        .unwrap()
    }

    /// Store a standalone base in `opening`, outside any pipeline flow
    pub async fn insert_base(&self, name: &str, instance_size: u32) -> PipelineBase {
        let base = PipelineBase::new(
            self.org.id,
            Uuid::new_v4(),
            name.to_string(),
            base_config(instance_size, 3600),
        );
        repository::insert(self.store(), &base).await.unwrap()
    }

    /// Deliver the oldest queued task; false when the queue is empty
    pub async fn deliver_next(&self) -> bool {
        let Some((next, _)) = self.queue.pop().await else {
            return false;
        };
        if let Err(e) = task::dispatch(&self.state, next).await {
            panic!("delivery of {} failed: {}", next, e);
        }
        true
    }

    /// Deliver tasks until the queue is empty
    pub async fn drain(&self) {
        for _ in 0..MAX_DELIVERIES {
            if !self.deliver_next().await {
                return;
            }
        }
    }

    /// Deliver only operation watches, dropping every other task
    pub async fn drain_watches(&self) {
        for _ in 0..MAX_DELIVERIES {
            let Some((next, _)) = self.queue.pop().await else {
                return;
            };
            if let Task::WatchOperation(_) = next {
                if let Err(e) = task::dispatch(&self.state, next).await {
                    panic!("delivery of {} failed: {}", next, e);
                }
            }
        }
    }
}

/// Memory store that can be told to lose the next write of one entity kind
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    fail_next: tokio::sync::Mutex<Option<EntityKind>>,
}

impl FailingStore {
    /// The next update of a `kind` record fails as if the database went away
    pub async fn fail_next_update(&self, kind: EntityKind) {
        *self.fail_next.lock().await = Some(kind);
    }
}

#[async_trait]
impl Store for FailingStore {
    async fn get(&self, kind: EntityKind, id: Uuid) -> Result<Option<Record>, StoreError> {
        self.inner.get(kind, id).await
    }

    async fn put(&self, record: Record, expected_version: Option<i64>) -> Result<i64, StoreError> {
        if expected_version.is_some() {
            let mut armed = self.fail_next.lock().await;
            if *armed == Some(record.kind) {
                *armed = None;
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
        }
        self.inner.put(record, expected_version).await
    }

    async fn query(&self, kind: EntityKind, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        self.inner.query(kind, filter).await
    }

    async fn delete(&self, kind: EntityKind, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete(kind, id).await
    }
}
