use std::sync::Arc;

use aggregator_common::event::Event;
use aggregator_common::stats::{StatsAggregator, StatsSnapshot};
use aggregator_common::store::{DedupRecord, Deduplicator, StoreResult};
use health::{HealthRegistry, HealthStatus};
use serde::Serialize;

use crate::config::PipelineConfig;
use crate::coordinator::{PublishCoordinator, PublishSummary};
use crate::error::PublishError;
use crate::queue::IngestQueue;
use crate::worker::WorkerPool;

/// Reachability of the pieces an operator cares about.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub store_reachable: bool,
    pub queue_depth: usize,
    pub workers_alive: usize,
}

/// The running ingest pipeline: one queue, one worker pool and the counters they share.
pub struct EventAggregator {
    store: Arc<dyn Deduplicator>,
    queue: IngestQueue,
    stats: Arc<StatsAggregator>,
    liveness: HealthRegistry,
    pool: WorkerPool,
    coordinator: PublishCoordinator,
}

impl EventAggregator {
    /// Start the worker pool over `store`. Must be called from within a tokio runtime.
    pub async fn start(config: &PipelineConfig, store: Arc<dyn Deduplicator>) -> Self {
        let queue = IngestQueue::new(config.queue_capacity.get(), config.enqueue_timeout.0);
        let stats = Arc::new(StatsAggregator::new());
        let liveness = HealthRegistry::new("workers");

        let pool = WorkerPool::start(
            config.worker_count.get(),
            queue.clone(),
            store.clone(),
            stats.clone(),
            config.poll_interval.0,
            liveness.clone(),
            config.liveness_deadline.0,
        )
        .await;
        let coordinator =
            PublishCoordinator::new(queue.clone(), stats.clone(), config.outcome_timeout.0);

        Self {
            store,
            queue,
            stats,
            liveness,
            pool,
            coordinator,
        }
    }

    pub async fn publish(&self, events: Vec<Event>) -> Result<PublishSummary, PublishError> {
        self.coordinator.publish(events).await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn list_events(&self, topic: Option<&str>) -> StoreResult<Vec<DedupRecord>> {
        self.store.list(topic).await
    }

    pub async fn health_check(&self) -> HealthReport {
        HealthReport {
            store_reachable: self.store.ping().await,
            queue_depth: self.queue.depth(),
            workers_alive: self.pool.workers_alive(),
        }
    }

    /// Liveness of every worker, healthy only while all of them keep reporting.
    pub fn liveness(&self) -> HealthStatus {
        self.liveness.get_status()
    }

    /// Stop accepting events and wait until the workers have drained the queue.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await
    }
}
