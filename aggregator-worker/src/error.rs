use std::time;

use aggregator_common::event::ValidationError;
use thiserror::Error;

/// Enumeration of errors when handing an event to the `IngestQueue`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("queue stayed full for {0:?}")]
    QueueFull(time::Duration),
    #[error("queue is closed")]
    QueueClosed,
}

/// Why an event was neither accepted nor found to be a duplicate.
/// All of them are transient: publishing the event again is safe.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    #[error(transparent)]
    Enqueue(#[from] EnqueueError),
    #[error("dedup store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("worker panicked while processing the event")]
    WorkerPanic,
    #[error("event was dropped before a worker reported its outcome")]
    Abandoned,
}

/// Enumeration of errors rejecting a whole publish before anything is enqueued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("request holds no event")]
    EmptyBatch,
    #[error("event at index {index} is invalid: {error}")]
    InvalidEvent {
        index: usize,
        error: ValidationError,
    },
}
