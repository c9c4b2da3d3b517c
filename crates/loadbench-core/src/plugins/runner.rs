use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::models::{CoreError, CoreErrorKind, IterationResult, RunnerEvent};
use crate::plugins::ContextEnvironment;

/// A workload runner. `run` blocks until every scheduled iteration has
/// reported; `abort` may be called from any thread, any number of times, and
/// only stops new iterations from being scheduled.
pub trait Runner: Send + Sync {
    fn run(
        &self,
        scenario: &str,
        context: &ContextEnvironment,
        args: &Map<String, Value>,
    ) -> Result<(), CoreError>;

    fn abort(&self);

    fn run_duration(&self) -> Duration;
}

/// Producer half handed to a runner when it is created.
#[derive(Clone, Debug)]
pub struct RunnerSink {
    results: mpsc::Sender<Vec<IterationResult>>,
    events: mpsc::Sender<RunnerEvent>,
}

/// Consumer half drained by `ResultConsumer`.
#[derive(Debug)]
pub struct RunnerStreams {
    pub(crate) results: mpsc::Receiver<Vec<IterationResult>>,
    pub(crate) events: mpsc::Receiver<RunnerEvent>,
}

pub fn runner_channels(capacity: usize) -> (RunnerSink, RunnerStreams) {
    let capacity = capacity.max(1);
    let (results_tx, results_rx) = mpsc::channel(capacity);
    let (events_tx, events_rx) = mpsc::channel(capacity);

    (
        RunnerSink {
            results: results_tx,
            events: events_tx,
        },
        RunnerStreams {
            results: results_rx,
            events: events_rx,
        },
    )
}

impl RunnerSink {
    /// Publishes one batch of iterations, waiting for buffer space.
    ///
    /// Must be called from a blocking thread, never from inside an async task.
    pub fn send_results(&self, batch: Vec<IterationResult>) -> Result<(), CoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.results
            .blocking_send(batch)
            .map_err(|_| consumer_gone("iteration results"))
    }

    /// Publishes one runner event. Same threading rule as `send_results`.
    pub fn send_event(&self, event: RunnerEvent) -> Result<(), CoreError> {
        self.events
            .blocking_send(event)
            .map_err(|_| consumer_gone("runner events"))
    }
}

fn consumer_gone(what: &str) -> CoreError {
    CoreError::new(
        CoreErrorKind::Cancelled,
        format!("result consumer stopped accepting {what}"),
    )
}
