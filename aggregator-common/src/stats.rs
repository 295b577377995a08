use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;

/// Point-in-time view of the aggregator counters.
///
/// Each counter is read atomically on its own; the snapshot as a whole is not a global atomic view.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub unique_processed: u64,
    pub duplicate_dropped: u64,
    pub failures: u64,
    pub in_flight: u64,
    /// Unique events processed per topic.
    pub topics: BTreeMap<String, u64>,
    /// Seconds since the aggregator started.
    pub uptime: f64,
}

/// In-memory counters updated concurrently by workers and the publish path.
///
/// Observational only: the dedup store is the source of truth for what has been seen.
/// Counters start at zero with the process and are never persisted.
pub struct StatsAggregator {
    started_at: Instant,
    received: AtomicU64,
    unique_processed: AtomicU64,
    duplicate_dropped: AtomicU64,
    failures: AtomicU64,
    in_flight: AtomicU64,
    topics: DashMap<String, u64>,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            received: AtomicU64::new(0),
            unique_processed: AtomicU64::new(0),
            duplicate_dropped: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            topics: DashMap::new(),
        }
    }

    /// An event entered the pipeline. It stays in flight until one of the other `record_*` calls.
    pub fn record_received(&self, topic: &str) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.received.fetch_add(1, Ordering::SeqCst);
        metrics::counter!("aggregator_events_received_total", "topic" => topic.to_owned())
            .increment(1);
    }

    pub fn record_unique(&self, topic: &str) {
        self.unique_processed.fetch_add(1, Ordering::SeqCst);
        *self.topics.entry(topic.to_owned()).or_insert(0) += 1;
        self.leave_flight();
        metrics::counter!("aggregator_events_unique_total", "topic" => topic.to_owned())
            .increment(1);
    }

    pub fn record_duplicate(&self, topic: &str) {
        self.duplicate_dropped.fetch_add(1, Ordering::SeqCst);
        self.leave_flight();
        metrics::counter!("aggregator_events_duplicate_total", "topic" => topic.to_owned())
            .increment(1);
    }

    /// The event was received but could not be classified, e.g. the store was unavailable.
    pub fn record_failure(&self, topic: &str) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        self.leave_flight();
        metrics::counter!("aggregator_events_failed_total", "topic" => topic.to_owned())
            .increment(1);
    }

    fn leave_flight(&self) {
        // Saturate rather than wrap if a caller records an outcome it never received.
        _ = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::SeqCst),
            unique_processed: self.unique_processed.load(Ordering::SeqCst),
            duplicate_dropped: self.duplicate_dropped.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            topics: self
                .topics
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            uptime: self.started_at.elapsed().as_secs_f64(),
        }
    }
}
