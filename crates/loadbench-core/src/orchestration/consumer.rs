use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::models::{
    CoreError, IterationResult, RunnerEvent, TaskId, TaskStatus, WorkloadId, WorkloadResults,
};
use crate::orchestration::with_store;
use crate::persistence::BenchmarkStore;
use crate::plugins::{HookExecutor, Runner, RunnerStreams, SlaChecker};
use crate::settings::EngineSettings;

/// Everything a consumer needs to watch one running workload.
pub struct WorkloadRun {
    pub task: TaskId,
    pub workload: WorkloadId,
    pub runner: Arc<dyn Runner>,
    pub streams: RunnerStreams,
    pub sla: SlaChecker,
    pub hooks: Option<HookExecutor>,
}

/// One-way latch that reports `true` to exactly one caller of `fire`.
#[derive(Debug, Default)]
pub struct AbortLatch(AtomicBool);

impl AbortLatch {
    pub fn fire(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct ResultDrain {
    task: TaskId,
    workload: WorkloadId,
    store: Arc<dyn BenchmarkStore>,
    runner: Arc<dyn Runner>,
    sla: SlaChecker,
    sla_abort: AbortLatch,
    abort_on_sla_failure: bool,
    chunk_size: usize,
    buffer: Vec<IterationResult>,
    first_start: f64,
    last_end: f64,
    chunk_index: usize,
}

impl ResultDrain {
    async fn consume(&mut self, batch: Vec<IterationResult>) {
        for iteration in &batch {
            self.first_start = self.first_start.min(iteration.timestamp);
            self.last_end = self.last_end.max(iteration.finished_at());

            let success = self.sla.add_iteration(iteration);
            if self.abort_on_sla_failure && !success && self.sla_abort.fire() {
                self.abort_on_sla().await;
            }
        }

        self.buffer.extend(batch);
        while self.buffer.len() >= self.chunk_size {
            let remainder = self.buffer.split_off(self.chunk_size);
            let chunk = std::mem::replace(&mut self.buffer, remainder);
            self.persist_chunk(chunk).await;
        }
    }

    async fn abort_on_sla(&mut self) {
        tracing::info!(
            task_id = self.task.0,
            workload = self.workload.0,
            "SLA failure detected, soft-aborting the task"
        );
        self.sla.mark_aborted_by_sla();
        self.runner.abort();

        let task = self.task;
        let outcome = with_store(&self.store, move |store| {
            store.update_task_status(task, TaskStatus::SoftAborting)
        })
        .await;
        if let Err(error) = outcome {
            tracing::error!(
                task_id = task.0,
                kind = ?error.kind,
                message = %error.message,
                "failed to mark task as soft-aborting"
            );
        }
    }

    async fn persist_chunk(&mut self, mut chunk: Vec<IterationResult>) {
        chunk.sort_by(|left, right| left.timestamp.total_cmp(&right.timestamp));
        let index = self.chunk_index;
        self.chunk_index += 1;

        let workload = self.workload;
        let outcome = with_store(&self.store, move |store| {
            store.add_workload_chunk(workload, index, &chunk)
        })
        .await;
        if let Err(error) = outcome {
            tracing::error!(
                task_id = self.task.0,
                workload = workload.0,
                chunk = index,
                kind = ?error.kind,
                message = %error.message,
                "failed to persist result chunk"
            );
        }
    }

    fn load_duration(&self) -> f64 {
        (self.last_end - self.first_start).max(0.0)
    }

    fn start_time(&self) -> Option<f64> {
        self.first_start.is_finite().then_some(self.first_start)
    }
}

/// Drains a running workload's results and events, checks SLA, dispatches
/// hooks and watches for a hard abort. `finish` must be awaited once the
/// runner returns, whatever it returned.
pub struct ResultConsumer {
    task: TaskId,
    workload: WorkloadId,
    store: Arc<dyn BenchmarkStore>,
    runner: Arc<dyn Runner>,
    started_at: Instant,
    done: CancellationToken,
    drain: Arc<AsyncMutex<ResultDrain>>,
    hooks: Option<Arc<Mutex<HookExecutor>>>,
    abort_watch: JoinHandle<()>,
    result_drain: JoinHandle<()>,
    event_drain: JoinHandle<Vec<String>>,
}

impl ResultConsumer {
    /// Spawns the workers on the current tokio runtime.
    pub fn start(
        run: WorkloadRun,
        store: Arc<dyn BenchmarkStore>,
        settings: &EngineSettings,
    ) -> Self {
        let done = CancellationToken::new();
        let RunnerStreams { results, events } = run.streams;

        let drain = Arc::new(AsyncMutex::new(ResultDrain {
            task: run.task,
            workload: run.workload,
            store: store.clone(),
            runner: run.runner.clone(),
            sla: run.sla,
            sla_abort: AbortLatch::default(),
            abort_on_sla_failure: settings.abort_on_sla_failure,
            chunk_size: settings.raw_result_chunk_size.max(1),
            buffer: Vec::new(),
            first_start: f64::INFINITY,
            last_end: 0.0,
            chunk_index: 0,
        }));
        let hooks = run.hooks.map(|executor| Arc::new(Mutex::new(executor)));

        let result_drain = tokio::spawn(drain_results(results, drain.clone(), done.clone()));
        let abort_watch = tokio::spawn(watch_abort(
            run.task,
            store.clone(),
            run.runner.clone(),
            settings.abort_poll_interval(),
            done.clone(),
        ));
        // Spawned with or without hooks: runners may always emit events.
        let event_drain = tokio::spawn(drain_events(events, hooks.clone(), done.clone()));

        Self {
            task: run.task,
            workload: run.workload,
            store,
            runner: run.runner,
            started_at: Instant::now(),
            done,
            drain,
            hooks,
            abort_watch,
            result_drain,
            event_drain,
        }
    }

    /// Stops the workers in order, then persists the remaining results and
    /// the workload summary. `body_error` is the runner's failure, if any.
    /// A worker that died is reported as an unexpected failure; whatever it
    /// aggregated before dying is still persisted.
    pub async fn finish(
        self,
        body_error: Option<&CoreError>,
    ) -> Result<WorkloadResults, CoreError> {
        self.done.cancel();

        let abort_watch = self.abort_watch.await;
        let result_drain = self.result_drain.await;
        let event_drain = self.event_drain.await;

        let mut worker_failures = Vec::new();
        if let Err(error) = abort_watch {
            worker_failures.push(format!("abort watcher failed: {error}"));
        }
        if let Err(error) = result_drain {
            worker_failures.push(format!("result drain worker failed: {error}"));
        }
        match event_drain {
            Ok(hook_failures) => worker_failures.extend(hook_failures),
            Err(error) => worker_failures.push(format!("event drain worker failed: {error}")),
        }
        for failure in &worker_failures {
            tracing::error!(
                task_id = self.task.0,
                workload = self.workload.0,
                message = %failure,
                "result consumer worker terminated abnormally"
            );
        }

        let mut drain = self.drain.lock().await;
        let failures: Vec<String> = body_error
            .map(ToString::to_string)
            .into_iter()
            .chain(worker_failures)
            .collect();
        if !failures.is_empty() {
            drain.sla.mark_unexpected_failure(failures.join("; "));
        }

        let task = self.task;
        match with_store(&self.store, move |store| store.task_status(task)).await {
            Ok(TaskStatus::Aborted) => drain.sla.mark_aborted_manually(),
            Ok(_) => {}
            Err(error) => tracing::error!(
                task_id = task.0,
                kind = ?error.kind,
                message = %error.message,
                "failed to read task status"
            ),
        }

        let load_duration = drain.load_duration();
        let full_duration = self.started_at.elapsed().as_secs_f64();
        tracing::info!(
            task_id = self.task.0,
            workload = self.workload.0,
            load_duration,
            runner_duration = self.runner.run_duration().as_secs_f64(),
            full_duration,
            "workload finished"
        );

        if !drain.buffer.is_empty() {
            let remainder = std::mem::take(&mut drain.buffer);
            drain.persist_chunk(remainder).await;
        }

        let results = WorkloadResults {
            load_duration,
            full_duration,
            sla_results: drain.sla.results(),
            hooks_results: self.hooks.as_deref().map(|hooks| lock_hooks(hooks).results()),
            start_time: drain.start_time(),
        };
        let workload = self.workload;
        let persisted = results.clone();
        with_store(&self.store, move |store| {
            store.set_workload_results(workload, &persisted)
        })
        .await?;

        Ok(results)
    }
}

async fn drain_results(
    mut receiver: mpsc::Receiver<Vec<IterationResult>>,
    drain: Arc<AsyncMutex<ResultDrain>>,
    done: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            batch = receiver.recv() => match batch {
                Some(batch) => drain.lock().await.consume(batch).await,
                None => break,
            },
            _ = done.cancelled() => break,
        }
    }

    receiver.close();
    while let Ok(batch) = receiver.try_recv() {
        drain.lock().await.consume(batch).await;
    }
}

/// Returns the hook dispatches that terminated abnormally.
async fn drain_events(
    mut receiver: mpsc::Receiver<RunnerEvent>,
    hooks: Option<Arc<Mutex<HookExecutor>>>,
    done: CancellationToken,
) -> Vec<String> {
    let mut failures = Vec::new();
    loop {
        tokio::select! {
            biased;
            event = receiver.recv() => match event {
                Some(event) => dispatch_event(hooks.as_ref(), event, &mut failures).await,
                None => break,
            },
            _ = done.cancelled() => break,
        }
    }

    // Trailing events sent right before the runner returned.
    receiver.close();
    while let Ok(event) = receiver.try_recv() {
        dispatch_event(hooks.as_ref(), event, &mut failures).await;
    }
    failures
}

async fn dispatch_event(
    hooks: Option<&Arc<Mutex<HookExecutor>>>,
    event: RunnerEvent,
    failures: &mut Vec<String>,
) {
    // No hooks configured: the event is drained and dropped.
    let Some(hooks) = hooks.cloned() else {
        return;
    };

    let event_type = event.event_type.clone();
    let outcome = tokio::task::spawn_blocking(move || lock_hooks(&hooks).on_event(&event)).await;
    if let Err(error) = outcome {
        failures.push(format!("hook dispatch for '{event_type}' failed: {error}"));
    }
}

/// A hook that panicked leaves the executor's recorded runs intact.
fn lock_hooks(hooks: &Mutex<HookExecutor>) -> MutexGuard<'_, HookExecutor> {
    hooks.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn watch_abort(
    task: TaskId,
    store: Arc<dyn BenchmarkStore>,
    runner: Arc<dyn Runner>,
    interval: Duration,
    done: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = done.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match with_store(&store, move |store| store.task_status(task)).await {
            Ok(status) if status.is_abort_requested(false) => {
                tracing::info!(task_id = task.0, "abort requested, stopping runner");
                runner.abort();
                let outcome = with_store(&store, move |store| {
                    store.update_task_status(task, TaskStatus::Aborted)
                })
                .await;
                if let Err(error) = outcome {
                    tracing::error!(
                        task_id = task.0,
                        kind = ?error.kind,
                        message = %error.message,
                        "failed to mark task as aborted"
                    );
                }
                break;
            }
            Ok(_) => {}
            Err(error) => tracing::error!(
                task_id = task.0,
                kind = ?error.kind,
                message = %error.message,
                "failed to poll task status"
            ),
        }
    }
}
