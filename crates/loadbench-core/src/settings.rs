use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{CoreError, CoreErrorKind};

const DEFAULT_RAW_RESULT_CHUNK_SIZE: usize = 1000;
const DEFAULT_ABORT_POLL_INTERVAL_MS: u64 = 2000;
const DEFAULT_RUNNER_CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSettings {
    /// Raw iteration results persisted per chunk.
    #[serde(default = "default_raw_result_chunk_size")]
    pub raw_result_chunk_size: usize,

    #[serde(default)]
    pub abort_on_sla_failure: bool,

    #[serde(default = "default_abort_poll_interval_ms")]
    pub abort_poll_interval_ms: u64,

    /// Bound of the result and event queues between a runner and its consumer.
    #[serde(default = "default_runner_channel_capacity")]
    pub runner_channel_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            raw_result_chunk_size: DEFAULT_RAW_RESULT_CHUNK_SIZE,
            abort_on_sla_failure: false,
            abort_poll_interval_ms: DEFAULT_ABORT_POLL_INTERVAL_MS,
            runner_channel_capacity: DEFAULT_RUNNER_CHANNEL_CAPACITY,
        }
    }
}

impl EngineSettings {
    pub fn with_raw_result_chunk_size(mut self, size: usize) -> Self {
        self.raw_result_chunk_size = size;
        self
    }

    pub fn with_abort_on_sla_failure(mut self, enabled: bool) -> Self {
        self.abort_on_sla_failure = enabled;
        self
    }

    pub fn with_abort_poll_interval(mut self, interval: Duration) -> Self {
        self.abort_poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_runner_channel_capacity(mut self, capacity: usize) -> Self {
        self.runner_channel_capacity = capacity;
        self
    }

    pub fn abort_poll_interval(&self) -> Duration {
        Duration::from_millis(self.abort_poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.raw_result_chunk_size == 0 {
            return Err(invalid("raw_result_chunk_size must be at least 1"));
        }
        if self.abort_poll_interval_ms == 0 {
            return Err(invalid("abort_poll_interval_ms must be positive"));
        }
        if self.runner_channel_capacity == 0 {
            return Err(invalid("runner_channel_capacity must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> CoreError {
    CoreError::new(CoreErrorKind::InvalidConfig, message)
}

fn default_raw_result_chunk_size() -> usize {
    DEFAULT_RAW_RESULT_CHUNK_SIZE
}

fn default_abort_poll_interval_ms() -> u64 {
    DEFAULT_ABORT_POLL_INTERVAL_MS
}

fn default_runner_channel_capacity() -> usize {
    DEFAULT_RUNNER_CHANNEL_CAPACITY
}
