use std::sync::Arc;
use std::time;

use aggregator_common::event::Event;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::{EnqueueError, FailureReason};

/// The outcome of one published event, as reported back to the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// First time this identity was processed.
    Accepted,
    /// The identity was already in the store.
    Duplicate,
    Failed(FailureReason),
    /// The publisher stopped waiting. The event may still complete in the background.
    TimedOut,
}

/// An event waiting in the queue, with the channel its outcome is reported on.
pub struct QueuedEvent {
    pub event: Event,
    pub reply: oneshot::Sender<EventOutcome>,
    pub enqueued_at: time::Instant,
}

/// What a worker got when it asked the queue for work.
pub enum Dequeued {
    Event(QueuedEvent),
    /// Nothing arrived within the wait.
    Idle,
    /// The queue was closed and fully drained.
    Closed,
}

/// A bounded FIFO queue of events shared by every publisher and every worker.
///
/// Producers wait for room up to `enqueue_timeout`. Consumers take turns on the receiving half,
/// so each event is handed to exactly one worker.
#[derive(Clone)]
pub struct IngestQueue {
    sender: mpsc::Sender<QueuedEvent>,
    receiver: Arc<Mutex<mpsc::Receiver<QueuedEvent>>>,
    enqueue_timeout: time::Duration,
}

impl IngestQueue {
    pub fn new(capacity: usize, enqueue_timeout: time::Duration) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);

        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            enqueue_timeout,
        }
    }

    /// Enqueue an event, returning the channel its outcome will be reported on.
    /// We take ownership of the Event to enforce a specific delivery is only enqueued once.
    pub async fn enqueue(
        &self,
        event: Event,
    ) -> Result<oneshot::Receiver<EventOutcome>, EnqueueError> {
        let (reply, outcome) = oneshot::channel();
        let queued = QueuedEvent {
            event,
            reply,
            enqueued_at: time::Instant::now(),
        };

        self.sender
            .send_timeout(queued, self.enqueue_timeout)
            .await
            .map_err(|error| match error {
                mpsc::error::SendTimeoutError::Timeout(_) => {
                    EnqueueError::QueueFull(self.enqueue_timeout)
                }
                mpsc::error::SendTimeoutError::Closed(_) => EnqueueError::QueueClosed,
            })?;

        metrics::gauge!("aggregator_queue_depth").set(self.depth() as f64);

        Ok(outcome)
    }

    /// Wait up to `wait` for the next event.
    pub async fn dequeue(&self, wait: time::Duration) -> Dequeued {
        let next = tokio::time::timeout(wait, async {
            let mut receiver = self.receiver.lock().await;
            receiver.recv().await
        })
        .await;

        match next {
            Ok(Some(queued)) => {
                metrics::gauge!("aggregator_queue_depth").set(self.depth() as f64);
                Dequeued::Event(queued)
            }
            Ok(None) => Dequeued::Closed,
            Err(_) => Dequeued::Idle,
        }
    }

    /// Number of events currently waiting.
    pub fn depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Refuse new events. Events already queued can still be dequeued.
    pub async fn close(&self) {
        self.receiver.lock().await.close()
    }
}
