#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use loadbench_core::deployment::{Credential, DEFAULT_PLATFORM};
use loadbench_core::models::{
    CoreError, CoreErrorKind, IterationResult, RunnerEvent, SlaOutcome, TaskId,
};
use loadbench_core::plugins::{
    Context, ContextEnvironment, ContextPlugin, Hook, HookPlugin, Plugin, PluginRegistry, Runner,
    RunnerPlugin, RunnerSink, ScenarioPlugin, Sla, SlaPlugin, Trigger, TriggerPlugin,
    ValidationContext, ValidationLevel,
};
use serde_json::{Map, Value, json};

pub fn iteration(timestamp: f64, duration: f64) -> IterationResult {
    IterationResult::new(timestamp, duration)
}

#[derive(Debug)]
pub struct FakeCredential {
    pub platform: String,
    pub reachable: bool,
}

impl FakeCredential {
    pub fn reachable(platform: &str) -> Arc<dyn Credential> {
        Arc::new(Self {
            platform: platform.to_string(),
            reachable: true,
        })
    }

    pub fn unreachable(platform: &str) -> Arc<dyn Credential> {
        Arc::new(Self {
            platform: platform.to_string(),
            reachable: false,
        })
    }
}

impl Credential for FakeCredential {
    fn platform(&self) -> &str {
        &self.platform
    }

    fn verify_connection(&self) -> Result<(), CoreError> {
        if self.reachable {
            Ok(())
        } else {
            Err(CoreError::new(
                CoreErrorKind::Connection,
                format!("platform '{}' is unreachable", self.platform),
            ))
        }
    }
}

/// Scenario that rejects `{"args": {"invalid": true}}` at `reject_at`.
pub struct FakeScenario {
    pub name: String,
    pub platform: String,
    pub title: Option<String>,
    pub default_context: Map<String, Value>,
    pub reject_at: Option<ValidationLevel>,
    pub seen_levels: Mutex<Vec<(ValidationLevel, usize)>>,
}

impl FakeScenario {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            platform: DEFAULT_PLATFORM.to_string(),
            title: None,
            default_context: Map::new(),
            reject_at: None,
            seen_levels: Mutex::new(Vec::new()),
        }
    }

    pub fn on_platform(mut self, platform: &str) -> Self {
        self.platform = platform.to_string();
        self
    }

    pub fn titled(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn rejecting_at(mut self, level: ValidationLevel) -> Self {
        self.reject_at = Some(level);
        self
    }

    pub fn with_default_context(mut self, name: &str, config: Value) -> Self {
        self.default_context.insert(name.to_string(), config);
        self
    }

    /// Validation levels seen, with the number of user credentials present.
    pub fn seen_levels(&self) -> Vec<(ValidationLevel, usize)> {
        self.seen_levels
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }
}

impl Plugin for FakeScenario {
    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> &str {
        &self.platform
    }

    fn validate(&self, context: &ValidationContext<'_>, config: &Value) -> Vec<String> {
        let users = context
            .credentials
            .and_then(|credentials| credentials.get(&self.platform))
            .map(|credentials| credentials.users.len())
            .unwrap_or(0);
        if let Ok(mut seen) = self.seen_levels.lock() {
            seen.push((context.level, users));
        }

        let invalid = config["args"]["invalid"].as_bool().unwrap_or(false);
        if invalid && self.reject_at == Some(context.level) {
            vec![format!("scenario {} rejected its arguments", self.name)]
        } else {
            Vec::new()
        }
    }
}

impl ScenarioPlugin for FakeScenario {
    fn title(&self) -> Option<String> {
        self.title.clone()
    }

    fn default_context(&self) -> Map<String, Value> {
        self.default_context.clone()
    }
}

pub type RunHook = Arc<dyn Fn(&ContextEnvironment) + Send + Sync>;

/// What every runner created by a `ScriptedRunnerPlugin` does when run.
#[derive(Default)]
pub struct RunnerScript {
    pub batches: Vec<Vec<IterationResult>>,
    pub events: Vec<RunnerEvent>,
    pub fail_with: Option<String>,
    pub on_run: Option<RunHook>,
}

#[derive(Default)]
pub struct RunnerProbe {
    pub runs: AtomicUsize,
    pub aborts: AtomicUsize,
    pub environments: Mutex<Vec<ContextEnvironment>>,
}

impl RunnerProbe {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    pub fn environments(&self) -> Vec<ContextEnvironment> {
        self.environments
            .lock()
            .map(|environments| environments.clone())
            .unwrap_or_default()
    }
}

pub struct ScriptedRunnerPlugin {
    pub name: String,
    pub script: Arc<RunnerScript>,
    pub probe: Arc<RunnerProbe>,
}

impl ScriptedRunnerPlugin {
    pub fn new(name: &str, script: RunnerScript) -> Self {
        Self {
            name: name.to_string(),
            script: Arc::new(script),
            probe: Arc::new(RunnerProbe::default()),
        }
    }
}

impl Plugin for ScriptedRunnerPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, _context: &ValidationContext<'_>, config: &Value) -> Vec<String> {
        match config.get("times") {
            Some(times) if !times.is_u64() => vec!["times must be a non-negative integer".into()],
            _ => Vec::new(),
        }
    }
}

impl RunnerPlugin for ScriptedRunnerPlugin {
    fn create(
        &self,
        _task: TaskId,
        _config: &Map<String, Value>,
        sink: RunnerSink,
    ) -> Result<Arc<dyn Runner>, CoreError> {
        Ok(Arc::new(ScriptedRunner::new(
            self.script.clone(),
            self.probe.clone(),
            sink,
        )))
    }
}

/// Runner that replays a fixed script through its sink.
pub struct ScriptedRunner {
    script: Arc<RunnerScript>,
    probe: Arc<RunnerProbe>,
    sink: RunnerSink,
    aborted: AtomicBool,
}

impl ScriptedRunner {
    pub fn new(script: Arc<RunnerScript>, probe: Arc<RunnerProbe>, sink: RunnerSink) -> Self {
        Self {
            script,
            probe,
            sink,
            aborted: AtomicBool::new(false),
        }
    }
}

impl Runner for ScriptedRunner {
    fn run(
        &self,
        _scenario: &str,
        context: &ContextEnvironment,
        _args: &Map<String, Value>,
    ) -> Result<(), CoreError> {
        self.probe.runs.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut environments) = self.probe.environments.lock() {
            environments.push(context.clone());
        }
        if let Some(on_run) = &self.script.on_run {
            on_run(context);
        }

        for batch in &self.script.batches {
            if self.aborted.load(Ordering::SeqCst) {
                break;
            }
            self.sink.send_results(batch.clone())?;
        }
        for event in &self.script.events {
            self.sink.send_event(event.clone())?;
        }

        match &self.script.fail_with {
            Some(message) => Err(CoreError::runner_failure(message.clone())),
            None => Ok(()),
        }
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.probe.aborts.fetch_add(1, Ordering::SeqCst);
    }

    fn run_duration(&self) -> Duration {
        Duration::from_millis(5)
    }
}

#[derive(Default)]
pub struct ContextProbe {
    pub setups: AtomicUsize,
    pub cleanups: AtomicUsize,
}

impl ContextProbe {
    pub fn setups(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

/// Provisions `count` transient user credentials.
pub struct UsersContextPlugin {
    pub platform: String,
    pub count: usize,
    pub probe: Arc<ContextProbe>,
}

impl UsersContextPlugin {
    pub fn new(platform: &str, count: usize) -> Self {
        Self {
            platform: platform.to_string(),
            count,
            probe: Arc::new(ContextProbe::default()),
        }
    }
}

impl Plugin for UsersContextPlugin {
    fn name(&self) -> &str {
        "users"
    }

    fn platform(&self) -> &str {
        &self.platform
    }
}

impl ContextPlugin for UsersContextPlugin {
    fn create(&self, _config: &Value) -> Result<Box<dyn Context>, CoreError> {
        Ok(Box::new(UsersContext {
            platform: self.platform.clone(),
            count: self.count,
            probe: self.probe.clone(),
        }))
    }
}

struct UsersContext {
    platform: String,
    count: usize,
    probe: Arc<ContextProbe>,
}

impl Context for UsersContext {
    fn setup(&mut self, environment: &mut ContextEnvironment) -> Result<(), CoreError> {
        self.probe.setups.fetch_add(1, Ordering::SeqCst);
        environment.users = (0..self.count)
            .map(|_| FakeCredential::reachable(&self.platform))
            .collect();
        Ok(())
    }

    fn cleanup(&mut self, environment: &mut ContextEnvironment) -> Result<(), CoreError> {
        self.probe.cleanups.fetch_add(1, Ordering::SeqCst);
        environment.users.clear();
        Ok(())
    }
}

/// SLA `max_seconds_per_iteration`: fails once any iteration is slower.
pub struct MaxDurationSlaPlugin;

impl Plugin for MaxDurationSlaPlugin {
    fn name(&self) -> &str {
        "max_seconds_per_iteration"
    }

    fn validate(&self, _context: &ValidationContext<'_>, config: &Value) -> Vec<String> {
        if config.is_number() {
            Vec::new()
        } else {
            vec!["max_seconds_per_iteration must be a number".to_string()]
        }
    }
}

impl SlaPlugin for MaxDurationSlaPlugin {
    fn create(&self, config: &Value) -> Result<Box<dyn Sla>, CoreError> {
        let max = config
            .as_f64()
            .ok_or_else(|| CoreError::invalid_input("max_seconds_per_iteration must be a number"))?;
        Ok(Box::new(MaxDurationSla {
            max,
            worst: 0.0,
            success: true,
        }))
    }
}

struct MaxDurationSla {
    max: f64,
    worst: f64,
    success: bool,
}

impl Sla for MaxDurationSla {
    fn add_iteration(&mut self, iteration: &IterationResult) -> bool {
        self.worst = self.worst.max(iteration.duration);
        self.success = self.worst <= self.max;
        self.success
    }

    fn result(&self) -> SlaOutcome {
        SlaOutcome::new(
            "max_seconds_per_iteration",
            self.success,
            format!("Maximum seconds per iteration {:.2}s <= {:.2}s", self.worst, self.max),
        )
    }
}

/// Hook `record`: stores every event it runs for; `{"fail": true}` makes it fail.
pub struct RecordingHookPlugin {
    pub events: Arc<Mutex<Vec<RunnerEvent>>>,
}

impl RecordingHookPlugin {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Vec<RunnerEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl Plugin for RecordingHookPlugin {
    fn name(&self) -> &str {
        "record"
    }
}

impl HookPlugin for RecordingHookPlugin {
    fn create(&self, args: &Value) -> Result<Box<dyn Hook>, CoreError> {
        Ok(Box::new(RecordingHook {
            fail: args["fail"].as_bool().unwrap_or(false),
            events: self.events.clone(),
        }))
    }
}

struct RecordingHook {
    fail: bool,
    events: Arc<Mutex<Vec<RunnerEvent>>>,
}

impl Hook for RecordingHook {
    fn run(&mut self, event: &RunnerEvent) -> Result<Value, CoreError> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        if self.fail {
            Err(CoreError::runner_failure("hook failed on purpose"))
        } else {
            Ok(json!({"seen": event.value}))
        }
    }
}

/// Trigger `event`: fires for events whose type equals `args.type`.
pub struct EventTypeTriggerPlugin;

impl Plugin for EventTypeTriggerPlugin {
    fn name(&self) -> &str {
        "event"
    }

    fn validate(&self, _context: &ValidationContext<'_>, config: &Value) -> Vec<String> {
        if config["type"].is_string() {
            Vec::new()
        } else {
            vec!["trigger args require a string 'type'".to_string()]
        }
    }
}

impl TriggerPlugin for EventTypeTriggerPlugin {
    fn create(&self, args: &Value) -> Result<Box<dyn Trigger>, CoreError> {
        let event_type = args["type"]
            .as_str()
            .ok_or_else(|| CoreError::invalid_input("trigger args require a string 'type'"))?;
        Ok(Box::new(EventTypeTrigger {
            event_type: event_type.to_string(),
        }))
    }
}

struct EventTypeTrigger {
    event_type: String,
}

impl Trigger for EventTypeTrigger {
    fn on_event(&mut self, event: &RunnerEvent) -> bool {
        event.event_type == self.event_type
    }
}

/// Registry with the scenario `Dummy.run` and the stock fakes.
pub fn registry_with(runner: ScriptedRunnerPlugin) -> PluginRegistry {
    PluginRegistry::new()
        .with_scenario(Arc::new(FakeScenario::new("Dummy.run").titled("Dummy scenario")))
        .with_runner(Arc::new(runner))
        .with_sla(Arc::new(MaxDurationSlaPlugin))
        .with_hook(Arc::new(RecordingHookPlugin::new()))
        .with_trigger(Arc::new(EventTypeTriggerPlugin))
}
