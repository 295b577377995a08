use std::sync::Arc;
use std::time;

use aggregator_common::event::Event;
use aggregator_common::stats::StatsAggregator;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::{FailureReason, PublishError};
use crate::queue::{EventOutcome, IngestQueue};

/// Outcome counts of one publish call, whatever the batch size.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishSummary {
    /// Events processed for the first time.
    pub accepted: u64,
    /// Events refused because their identity already existed.
    pub rejected: u64,
    /// Same as `rejected`: every rejection is a duplicate identity.
    pub duplicates_immediate: u64,
    /// Events that could not be classified. Publishing them again is safe.
    pub failures: u64,
    /// Events whose outcome was not observed before the deadline. They may still complete.
    pub timed_out: u64,
}

impl PublishSummary {
    fn record(&mut self, outcome: &EventOutcome) {
        match outcome {
            EventOutcome::Accepted => self.accepted += 1,
            EventOutcome::Duplicate => {
                self.rejected += 1;
                self.duplicates_immediate += 1;
            }
            EventOutcome::Failed(_) => self.failures += 1,
            EventOutcome::TimedOut => self.timed_out += 1,
        }
    }
}

/// Entry point of the boundary: validates, enqueues and waits for the outcome of every event.
pub struct PublishCoordinator {
    queue: IngestQueue,
    stats: Arc<StatsAggregator>,
    outcome_timeout: time::Duration,
}

impl PublishCoordinator {
    pub fn new(
        queue: IngestQueue,
        stats: Arc<StatsAggregator>,
        outcome_timeout: time::Duration,
    ) -> Self {
        Self {
            queue,
            stats,
            outcome_timeout,
        }
    }

    /// Publish a batch of events, a single event being a batch of one.
    ///
    /// The whole batch is validated first: an empty batch or any malformed event rejects it
    /// before anything is queued or counted. Past validation, events are isolated from each
    /// other and every outcome ends up in the returned summary.
    pub async fn publish(&self, events: Vec<Event>) -> Result<PublishSummary, PublishError> {
        if events.is_empty() {
            return Err(PublishError::EmptyBatch);
        }
        for (index, event) in events.iter().enumerate() {
            event
                .validate()
                .map_err(|error| PublishError::InvalidEvent { index, error })?;
        }

        metrics::histogram!("aggregator_publish_batch_size").record(events.len() as f64);

        let mut summary = PublishSummary::default();
        let mut pending = Vec::with_capacity(events.len());

        for event in events {
            let topic = event.topic.clone();
            let admission = Admission::new(&self.stats, &topic);

            match self.queue.enqueue(event).await {
                Ok(outcome) => {
                    admission.handed_off();
                    pending.push((topic, outcome));
                }
                Err(error) => {
                    warn!("failed to enqueue event for topic {}: {}", topic, error);
                    summary.record(&EventOutcome::Failed(error.into()));
                }
            }
        }

        let deadline = tokio::time::Instant::now() + self.outcome_timeout;
        let outcomes = join_all(
            pending
                .into_iter()
                .map(|(topic, outcome)| self.wait_for_outcome(topic, outcome, deadline)),
        )
        .await;

        for outcome in outcomes.iter() {
            summary.record(outcome);
        }

        Ok(summary)
    }

    async fn wait_for_outcome(
        &self,
        topic: String,
        outcome: oneshot::Receiver<EventOutcome>,
        deadline: tokio::time::Instant,
    ) -> EventOutcome {
        match tokio::time::timeout_at(deadline, outcome).await {
            Ok(Ok(outcome)) => outcome,
            // The event was dropped before any worker recorded it, so it is settled here.
            Ok(Err(_)) => {
                warn!("event for topic {} was dropped before processing", topic);
                self.stats.record_failure(&topic);
                EventOutcome::Failed(FailureReason::Abandoned)
            }
            Err(_) => EventOutcome::TimedOut,
        }
    }
}

/// An event counted as received that must end up queued or counted as a failure.
///
/// Dropping it without calling `handed_off`, on an enqueue error or because the publish itself
/// was cancelled while waiting for room, records the failure.
struct Admission<'a> {
    stats: &'a StatsAggregator,
    topic: &'a str,
    settled: bool,
}

impl<'a> Admission<'a> {
    fn new(stats: &'a StatsAggregator, topic: &'a str) -> Self {
        stats.record_received(topic);
        Self {
            stats,
            topic,
            settled: false,
        }
    }

    /// The queue owns the event now, a worker will settle it.
    fn handed_off(mut self) {
        self.settled = true;
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.stats.record_failure(self.topic);
        }
    }
}
