use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

/// Tunables of the ingest pipeline: queue, worker pool and publish waits.
#[derive(Envconfig, Clone, Debug)]
pub struct PipelineConfig {
    /// Number of concurrent workers draining the queue.
    #[envconfig(default = "5")]
    pub worker_count: NonZeroUsize,

    #[envconfig(default = "10000")]
    pub queue_capacity: NonZeroUsize,

    /// How long a publish may wait for room in a full queue before failing with `QueueFull`.
    #[envconfig(default = "1000")]
    pub enqueue_timeout: EnvMsDuration,

    /// How long a publish waits for the outcomes of its events once they are queued.
    #[envconfig(default = "5000")]
    pub outcome_timeout: EnvMsDuration,

    /// Longest time an idle worker waits on the queue before reporting liveness again.
    #[envconfig(default = "100")]
    pub poll_interval: EnvMsDuration,

    #[envconfig(default = "30000")]
    pub liveness_deadline: EnvMsDuration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: NonZeroUsize::new(5).unwrap_or(NonZeroUsize::MIN),
            queue_capacity: NonZeroUsize::new(10_000).unwrap_or(NonZeroUsize::MIN),
            enqueue_timeout: EnvMsDuration(time::Duration::from_millis(1000)),
            outcome_timeout: EnvMsDuration(time::Duration::from_millis(5000)),
            poll_interval: EnvMsDuration(time::Duration::from_millis(100)),
            liveness_deadline: EnvMsDuration(time::Duration::from_millis(30_000)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}
