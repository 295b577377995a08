use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time;

use aggregator_common::event::Event;
use aggregator_common::stats::StatsAggregator;
use aggregator_common::store::{Deduplicator, InsertOutcome};
use futures::FutureExt;
use health::{ComponentStatus, HealthHandle, HealthRegistry};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::FailureReason;
use crate::queue::{Dequeued, EventOutcome, IngestQueue, QueuedEvent};

/// A fixed set of workers draining the `IngestQueue` into the dedup store.
///
/// Workers never talk to each other: the store's uniqueness constraint decides duplicates and
/// the `StatsAggregator` counters are atomic.
pub struct WorkerPool {
    queue: IngestQueue,
    liveness: HealthRegistry,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `worker_count` workers, each registered as a `worker-{i}` component of `liveness`.
    ///
    /// # Arguments
    ///
    /// * `poll_interval`: Longest a worker waits on an empty queue before reporting liveness.
    /// * `liveness_deadline`: How long a liveness report stays valid; must exceed `poll_interval`
    ///   plus the slowest store insert, as a busy worker only reports between events.
    pub async fn start(
        worker_count: usize,
        queue: IngestQueue,
        store: Arc<dyn Deduplicator>,
        stats: Arc<StatsAggregator>,
        poll_interval: time::Duration,
        liveness: HealthRegistry,
        liveness_deadline: time::Duration,
    ) -> Self {
        let mut handles = Vec::with_capacity(worker_count);

        for i in 0..worker_count {
            let handle = liveness
                .register(format!("worker-{i}"), liveness_deadline)
                .await;
            let worker = Worker {
                queue: queue.clone(),
                store: store.clone(),
                stats: stats.clone(),
                poll_interval,
                liveness: handle,
            };
            handles.push(tokio::spawn(worker.run()));
        }

        info!("worker pool started with {} workers", worker_count);

        Self {
            queue,
            liveness,
            handles: Mutex::new(handles),
        }
    }

    /// Number of workers that reported healthy within their deadline.
    pub fn workers_alive(&self) -> usize {
        self.liveness.get_status().healthy_components()
    }

    /// Close the queue, let workers drain what was already enqueued and wait for them to exit.
    pub async fn shutdown(&self) {
        self.queue.close().await;

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(error) = handle.await {
                error!("worker task ended abnormally: {}", error);
            }
        }

        info!("worker pool stopped");
    }
}

struct Worker {
    queue: IngestQueue,
    store: Arc<dyn Deduplicator>,
    stats: Arc<StatsAggregator>,
    poll_interval: time::Duration,
    liveness: HealthHandle,
}

impl Worker {
    async fn run(self) {
        debug!("{} started", self.liveness.component());

        loop {
            match self.queue.dequeue(self.poll_interval).await {
                Dequeued::Event(queued) => {
                    self.liveness.report_healthy().await;
                    self.handle(queued).await;
                }
                Dequeued::Idle => self.liveness.report_healthy().await,
                Dequeued::Closed => break,
            }
        }

        self.liveness.report_status(ComponentStatus::Stopped).await;
        debug!("{} stopped", self.liveness.component());
    }

    /// Process one event and report its outcome. A panic while processing is contained to the
    /// event: it is counted as a failure and the worker carries on with the next one.
    async fn handle(&self, queued: QueuedEvent) {
        let QueuedEvent {
            event,
            reply,
            enqueued_at,
        } = queued;

        let processing = AssertUnwindSafe(process_event(self.store.as_ref(), &self.stats, &event))
            .catch_unwind();
        let outcome = match processing.await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(
                    "{} panicked while processing {}",
                    self.liveness.component(),
                    event.identity()
                );
                self.stats.record_failure(&event.topic);
                EventOutcome::Failed(FailureReason::WorkerPanic)
            }
        };

        metrics::histogram!("aggregator_event_processing_duration_seconds")
            .record(enqueued_at.elapsed().as_secs_f64());

        if reply.send(outcome).is_err() {
            debug!("publisher of {} stopped waiting", event.identity());
        }
    }
}

/// Classify an event through a single atomic insert in the store and update counters.
async fn process_event(
    store: &dyn Deduplicator,
    stats: &StatsAggregator,
    event: &Event,
) -> EventOutcome {
    match store.try_insert(event).await {
        Ok(InsertOutcome::Inserted) => {
            debug!("processed new event {}", event.identity());
            stats.record_unique(&event.topic);
            EventOutcome::Accepted
        }
        Ok(InsertOutcome::AlreadyExists) => {
            debug!("dropped duplicate event {}", event.identity());
            stats.record_duplicate(&event.topic);
            EventOutcome::Duplicate
        }
        Err(error) => {
            error!("failed to record {}: {}", event.identity(), error);
            stats.record_failure(&event.topic);
            EventOutcome::Failed(FailureReason::StoreUnavailable(error.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aggregator_common::store::{DedupRecord, StoreError, StoreResult};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Panics on the events whose id starts with "boom", accepts everything else once.
    #[derive(Default)]
    struct ExplodingStore {
        seen: std::sync::Mutex<Vec<String>>,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Deduplicator for ExplodingStore {
        async fn try_insert(&self, event: &Event) -> StoreResult<InsertOutcome> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if event.event_id.starts_with("boom") {
                panic!("exploding store");
            }
            let mut seen = self.seen.lock().unwrap();
            if seen.contains(&event.event_id) {
                return Ok(InsertOutcome::AlreadyExists);
            }
            seen.push(event.event_id.clone());
            Ok(InsertOutcome::Inserted)
        }

        async fn list(&self, _topic: Option<&str>) -> StoreResult<Vec<DedupRecord>> {
            Ok(vec![])
        }

        async fn ping(&self) -> bool {
            true
        }
    }

    struct UnavailableStore;

    #[async_trait]
    impl Deduplicator for UnavailableStore {
        async fn try_insert(&self, _event: &Event) -> StoreResult<InsertOutcome> {
            Err(StoreError::QueryError {
                command: "INSERT".to_owned(),
                error: sqlx::Error::PoolTimedOut,
            })
        }

        async fn list(&self, _topic: Option<&str>) -> StoreResult<Vec<DedupRecord>> {
            Ok(vec![])
        }

        async fn ping(&self) -> bool {
            false
        }
    }

    fn event(event_id: &str) -> Event {
        Event::new("test.topic", event_id, "test", json!({}))
    }

    async fn start_pool(
        workers: usize,
        store: Arc<dyn Deduplicator>,
    ) -> (WorkerPool, IngestQueue, Arc<StatsAggregator>) {
        let queue = IngestQueue::new(100, time::Duration::from_millis(100));
        let stats = Arc::new(StatsAggregator::new());
        let pool = WorkerPool::start(
            workers,
            queue.clone(),
            store,
            stats.clone(),
            time::Duration::from_millis(20),
            HealthRegistry::new("liveness"),
            time::Duration::from_secs(30),
        )
        .await;
        (pool, queue, stats)
    }

    async fn publish(queue: &IngestQueue, stats: &StatsAggregator, event: Event) -> EventOutcome {
        stats.record_received(&event.topic);
        let outcome = queue.enqueue(event).await.unwrap();
        tokio::time::timeout(time::Duration::from_secs(5), outcome)
            .await
            .expect("no outcome reported")
            .expect("reply channel dropped")
    }

    #[tokio::test]
    async fn test_classifies_unique_and_duplicate() {
        let store = Arc::new(ExplodingStore::default());
        let (pool, queue, stats) = start_pool(3, store).await;

        assert_eq!(
            publish(&queue, &stats, event("evt_1")).await,
            EventOutcome::Accepted
        );
        assert_eq!(
            publish(&queue, &stats, event("evt_1")).await,
            EventOutcome::Duplicate
        );

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.unique_processed, 1);
        assert_eq!(snapshot.duplicate_dropped, 1);
        assert_eq!(snapshot.in_flight, 0);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_panic_is_contained_to_the_event() {
        let store = Arc::new(ExplodingStore::default());
        let (pool, queue, stats) = start_pool(1, store.clone()).await;

        assert_eq!(
            publish(&queue, &stats, event("boom_1")).await,
            EventOutcome::Failed(FailureReason::WorkerPanic)
        );
        // The single worker survived and keeps processing.
        assert_eq!(
            publish(&queue, &stats, event("evt_2")).await,
            EventOutcome::Accepted
        );

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.unique_processed, 1);
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 2);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_store_failure_is_not_counted_as_processed() {
        let (pool, queue, stats) = start_pool(2, Arc::new(UnavailableStore)).await;

        let outcome = publish(&queue, &stats, event("evt_1")).await;

        assert!(matches!(
            outcome,
            EventOutcome::Failed(FailureReason::StoreUnavailable(_))
        ));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.unique_processed, 0);
        assert_eq!(snapshot.duplicate_dropped, 0);
        assert!(snapshot.topics.is_empty());

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_workers_report_alive_then_stop() {
        let (pool, _queue, _stats) = start_pool(4, Arc::new(ExplodingStore::default())).await;

        let deadline = time::Instant::now() + time::Duration::from_secs(5);
        while pool.workers_alive() < 4 && time::Instant::now() < deadline {
            tokio::time::sleep(time::Duration::from_millis(20)).await;
        }
        assert_eq!(pool.workers_alive(), 4);

        pool.shutdown().await;

        let deadline = time::Instant::now() + time::Duration::from_secs(5);
        while pool.workers_alive() > 0 && time::Instant::now() < deadline {
            tokio::time::sleep(time::Duration::from_millis(20)).await;
        }
        assert_eq!(pool.workers_alive(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_events() {
        let store = Arc::new(ExplodingStore::default());
        let (pool, queue, stats) = start_pool(2, store).await;

        let mut outcomes = Vec::new();
        for i in 0..20 {
            stats.record_received("test.topic");
            outcomes.push(queue.enqueue(event(&format!("evt_{i}"))).await.unwrap());
        }
        pool.shutdown().await;

        for outcome in outcomes {
            assert_eq!(outcome.await.unwrap(), EventOutcome::Accepted);
        }
        assert_eq!(stats.snapshot().unique_processed, 20);
    }
}
