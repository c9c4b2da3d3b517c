mod support;

use std::sync::Arc;

use loadbench_core::deployment::{Deployment, PlatformCredentials, StaticDeployment};
use loadbench_core::models::{CoreErrorKind, RunnerEvent, SubtaskStatus, TaskId, TaskStatus};
use loadbench_core::orchestration::{EngineError, TaskEngine};
use loadbench_core::persistence::{
    BenchmarkStore, InMemoryBenchmarkStore, SubtaskStore, TaskStore, WorkloadStore,
};
use loadbench_core::plugins::{ContextEnvironment, PluginRegistry, ValidationLevel};
use loadbench_core::settings::EngineSettings;
use serde_json::{Value, json};
use support::{
    EventTypeTriggerPlugin, FakeCredential, FakeScenario, MaxDurationSlaPlugin,
    RecordingHookPlugin, RunnerScript, ScriptedRunnerPlugin, UsersContextPlugin, iteration,
    registry_with,
};

fn deployment() -> Arc<dyn Deployment> {
    Arc::new(StaticDeployment::new().with_platform(
        "default",
        PlatformCredentials::admin(FakeCredential::reachable("default")),
    ))
}

fn document(subtasks: usize, workload: Value) -> Value {
    let subtasks: Vec<Value> = (0..subtasks)
        .map(|index| json!({"title": format!("subtask-{index}"), "workloads": [workload.clone()]}))
        .collect();
    json!({"version": 2, "title": "engine", "subtasks": subtasks})
}

fn serial_workload() -> Value {
    json!({"name": "Dummy.run", "runner": {"type": "serial"}})
}

fn new_task(store: &InMemoryBenchmarkStore) -> TaskId {
    store.create_task("engine").expect("task").id
}

fn engine(
    document: &Value,
    store: &Arc<InMemoryBenchmarkStore>,
    task: TaskId,
    registry: PluginRegistry,
    settings: EngineSettings,
) -> Result<TaskEngine, EngineError> {
    let store: Arc<dyn BenchmarkStore> = store.clone();
    TaskEngine::new(document, task, store, deployment(), Arc::new(registry), settings)
}

fn one_batch() -> RunnerScript {
    RunnerScript {
        batches: vec![vec![iteration(0.0, 0.2), iteration(0.1, 0.3)]],
        ..RunnerScript::default()
    }
}

#[test]
fn unsupported_version_marks_task_failed() {
    let store = Arc::new(InMemoryBenchmarkStore::new());
    let task = new_task(&store);
    let registry = registry_with(ScriptedRunnerPlugin::new("serial", one_batch()));

    let error = engine(
        &json!({"version": 99, "title": "t", "subtasks": []}),
        &store,
        task,
        registry,
        EngineSettings::default(),
    )
    .err()
    .expect("construction must fail");

    match error {
        EngineError::InvalidTask(message) => {
            assert!(message.contains("Supported versions: 1, 2"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let record = store.task(task).expect("task");
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(
        record.failure.expect("failure").error_type,
        "UnsupportedTaskVersion"
    );
}

#[test]
fn invalid_settings_are_rejected() {
    let store = Arc::new(InMemoryBenchmarkStore::new());
    let task = new_task(&store);
    let registry = registry_with(ScriptedRunnerPlugin::new("serial", one_batch()));

    let error = engine(
        &document(1, serial_workload()),
        &store,
        task,
        registry,
        EngineSettings::default().with_raw_result_chunk_size(0),
    )
    .err()
    .expect("zero chunk size must be rejected");

    match error {
        EngineError::Core(error) => assert_eq!(error.kind, CoreErrorKind::InvalidConfig),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn syntax_errors_from_every_workload_are_collected() {
    let store = Arc::new(InMemoryBenchmarkStore::new());
    let task = new_task(&store);
    let registry = PluginRegistry::new()
        .with_scenario(Arc::new(
            FakeScenario::new("Dummy.run").rejecting_at(ValidationLevel::Syntax),
        ))
        .with_runner(Arc::new(ScriptedRunnerPlugin::new("serial", one_batch())));
    let invalid = json!({"name": "Dummy.run", "runner": {"type": "serial"}, "args": {"invalid": true}});
    let document = json!({
        "version": 2,
        "title": "t",
        "subtasks": [{"title": "s", "workloads": [invalid.clone(), invalid]}]
    });

    let engine = engine(&document, &store, task, registry, EngineSettings::default())
        .expect("engine");
    let error = engine.validate(false).expect_err("validation must fail");

    let EngineError::InvalidTask(message) = error else {
        panic!("expected invalid task error");
    };
    assert!(message.contains("Subtask Dummy.run[0] has wrong configuration"));
    assert!(message.contains("Subtask Dummy.run[1] has wrong configuration"));
    assert!(message.contains("scenario Dummy.run rejected its arguments"));

    let record = store.task(task).expect("task");
    assert_eq!(record.status, TaskStatus::Failed);
    let failure = record.failure.expect("failure");
    assert_eq!(failure.error_type, "InvalidTaskConfig");
    assert!(failure.message.starts_with("Validation: Input task is invalid!"));
}

#[test]
fn unknown_plugins_are_reported_as_validation_errors() {
    let store = Arc::new(InMemoryBenchmarkStore::new());
    let task = new_task(&store);
    let registry = registry_with(ScriptedRunnerPlugin::new("serial", one_batch()));
    let workload = json!({
        "name": "Dummy.run",
        "runner": {"type": "serial"},
        "sla": {"no_such_sla": 1}
    });

    let engine = engine(&document(1, workload), &store, task, registry, EngineSettings::default())
        .expect("engine");
    let error = engine.validate(true).expect_err("validation must fail");

    assert!(
        error
            .to_string()
            .contains("there is no sla plugin with name 'no_such_sla'"),
        "{error}"
    );
}

#[test]
fn syntax_only_validation_skips_platform_and_semantic_phases() {
    let store = Arc::new(InMemoryBenchmarkStore::new());
    let task = new_task(&store);
    let scenario = Arc::new(FakeScenario::new("Dummy.run").rejecting_at(ValidationLevel::Semantic));
    let registry = PluginRegistry::new()
        .with_scenario(scenario.clone())
        .with_runner(Arc::new(ScriptedRunnerPlugin::new("serial", one_batch())));
    let workload = json!({"name": "Dummy.run", "runner": {"type": "serial"}, "args": {"invalid": true}});

    let engine = engine(&document(1, workload), &store, task, registry, EngineSettings::default())
        .expect("engine");
    engine.validate(true).expect("syntax validation passes");

    assert_eq!(scenario.seen_levels(), vec![(ValidationLevel::Syntax, 0)]);
    assert_eq!(
        store.task_status(task).expect("status"),
        TaskStatus::Validating
    );
}

#[test]
fn semantic_validation_sees_transient_users_and_cleans_them_up() {
    let store = Arc::new(InMemoryBenchmarkStore::new());
    let task = new_task(&store);
    let scenario = Arc::new(FakeScenario::new("Dummy.run"));
    let users = Arc::new(UsersContextPlugin::new("default", 2));
    let registry = PluginRegistry::new()
        .with_scenario(scenario.clone())
        .with_runner(Arc::new(ScriptedRunnerPlugin::new("serial", one_batch())))
        .with_context(users.clone());

    let engine = engine(&document(2, serial_workload()), &store, task, registry, EngineSettings::default())
        .expect("engine");
    engine.validate(false).expect("validation passes");

    let levels = scenario.seen_levels();
    assert_eq!(
        levels,
        vec![
            (ValidationLevel::Syntax, 0),
            (ValidationLevel::Syntax, 0),
            (ValidationLevel::Platform, 0),
            (ValidationLevel::Platform, 0),
            (ValidationLevel::Semantic, 2),
            (ValidationLevel::Semantic, 2),
        ]
    );
    assert_eq!(users.probe.setups(), 1);
    assert_eq!(users.probe.cleanups(), 1);
}

#[test]
fn users_context_is_torn_down_when_semantic_validation_fails() {
    let store = Arc::new(InMemoryBenchmarkStore::new());
    let task = new_task(&store);
    let users = Arc::new(UsersContextPlugin::new("default", 1));
    let registry = PluginRegistry::new()
        .with_scenario(Arc::new(
            FakeScenario::new("Dummy.run").rejecting_at(ValidationLevel::Semantic),
        ))
        .with_runner(Arc::new(ScriptedRunnerPlugin::new("serial", one_batch())))
        .with_context(users.clone());
    let workload = json!({"name": "Dummy.run", "runner": {"type": "serial"}, "args": {"invalid": true}});

    let engine = engine(&document(1, workload), &store, task, registry, EngineSettings::default())
        .expect("engine");
    engine.validate(false).expect_err("semantic validation fails");

    assert_eq!(users.probe.setups(), 1);
    assert_eq!(users.probe.cleanups(), 1);
    assert_eq!(store.task_status(task).expect("status"), TaskStatus::Failed);
}

#[test]
fn unreachable_admin_fails_semantic_validation() {
    let store = Arc::new(InMemoryBenchmarkStore::new());
    let task = new_task(&store);
    let registry = registry_with(ScriptedRunnerPlugin::new("serial", one_batch()));
    let store_dyn: Arc<dyn BenchmarkStore> = store.clone();
    let deployment: Arc<dyn Deployment> = Arc::new(StaticDeployment::new().with_platform(
        "default",
        PlatformCredentials::admin(FakeCredential::unreachable("default")),
    ));

    let engine = TaskEngine::new(
        &document(1, serial_workload()),
        task,
        store_dyn,
        deployment,
        Arc::new(registry),
        EngineSettings::default(),
    )
    .expect("engine");
    engine.validate(false).expect_err("unreachable platform");

    let record = store.task(task).expect("task");
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.failure.expect("failure").error_type, "Connection");
}

#[tokio::test]
async fn run_executes_every_workload_and_finishes() {
    let store = Arc::new(InMemoryBenchmarkStore::new());
    let task = new_task(&store);
    let runner = ScriptedRunnerPlugin::new("serial", one_batch());
    let probe = runner.probe.clone();
    let users = Arc::new(UsersContextPlugin::new("default", 3));
    let registry = registry_with(runner).with_context(users.clone());

    let engine = engine(&document(2, serial_workload()), &store, task, registry, EngineSettings::default())
        .expect("engine");
    engine.validate(false).expect("valid");
    engine.run().await.expect("run");

    assert_eq!(store.task_status(task).expect("status"), TaskStatus::Finished);
    assert_eq!(probe.runs(), 2);

    let environments = probe.environments();
    assert_eq!(environments[0].users.len(), 3);
    assert!(environments[0].config.contains_key("users"));
    assert!(environments[0].owner.is_some());
    assert!(environments[0].admin.is_some());

    // One validation round plus one per workload.
    assert_eq!(users.probe.setups(), 3);
    assert_eq!(users.probe.cleanups(), 3);

    let subtasks = store.list_subtasks(task).expect("subtasks");
    assert_eq!(subtasks.len(), 2);
    for subtask in subtasks {
        assert_eq!(subtask.status, SubtaskStatus::Finished);
        let workloads = store.list_workloads(subtask.id).expect("workloads");
        assert_eq!(workloads.len(), 1);
        let results = workloads[0].results.clone().expect("results");
        assert_eq!(results.start_time, Some(0.0));
        assert!(results.passed_sla());
        assert_eq!(
            store.workload_chunks(workloads[0].id).expect("chunks").len(),
            1
        );
    }
}

#[tokio::test]
async fn hard_abort_before_next_workload_skips_remaining_subtasks() {
    let store = Arc::new(InMemoryBenchmarkStore::new());
    let task = new_task(&store);
    let abort_store = store.clone();
    let runner = ScriptedRunnerPlugin::new(
        "serial",
        RunnerScript {
            batches: vec![vec![iteration(0.0, 0.1)]],
            on_run: Some(Arc::new(move |environment: &ContextEnvironment| {
                abort_store
                    .update_task_status(environment.task, TaskStatus::Aborting)
                    .expect("aborting");
            })),
            ..RunnerScript::default()
        },
    );
    let probe = runner.probe.clone();

    let engine = engine(
        &document(3, serial_workload()),
        &store,
        task,
        registry_with(runner),
        EngineSettings::default(),
    )
    .expect("engine");
    let error = engine.run().await.expect_err("run must be aborted");

    assert!(matches!(error, EngineError::Aborted));
    assert_eq!(probe.runs(), 1);
    assert_eq!(store.task_status(task).expect("status"), TaskStatus::Aborted);

    let statuses: Vec<SubtaskStatus> = store
        .list_subtasks(task)
        .expect("subtasks")
        .into_iter()
        .map(|subtask| subtask.status)
        .collect();
    assert_eq!(statuses, vec![SubtaskStatus::Finished, SubtaskStatus::Aborted]);
}

#[tokio::test]
async fn sla_breach_soft_aborts_and_task_ends_aborted() {
    let store = Arc::new(InMemoryBenchmarkStore::new());
    let task = new_task(&store);
    let runner = ScriptedRunnerPlugin::new(
        "serial",
        RunnerScript {
            batches: vec![vec![iteration(0.0, 9.0)]],
            ..RunnerScript::default()
        },
    );
    let probe = runner.probe.clone();
    let workload = json!({
        "name": "Dummy.run",
        "runner": {"type": "serial"},
        "sla": {"max_seconds_per_iteration": 1.0}
    });

    let engine = engine(
        &document(2, workload),
        &store,
        task,
        registry_with(runner),
        EngineSettings::default().with_abort_on_sla_failure(true),
    )
    .expect("engine");
    let error = engine.run().await.expect_err("soft abort stops the task");

    assert!(matches!(error, EngineError::Aborted));
    assert_eq!(probe.runs(), 1);
    assert_eq!(probe.aborts(), 1);
    assert_eq!(store.task_status(task).expect("status"), TaskStatus::Aborted);
}

#[tokio::test]
async fn single_workload_sla_breach_finalizes_as_aborted() {
    let store = Arc::new(InMemoryBenchmarkStore::new());
    let task = new_task(&store);
    let runner = ScriptedRunnerPlugin::new(
        "serial",
        RunnerScript {
            batches: vec![vec![iteration(0.0, 9.0)]],
            ..RunnerScript::default()
        },
    );
    let workload = json!({
        "name": "Dummy.run",
        "runner": {"type": "serial"},
        "sla": {"max_seconds_per_iteration": 1.0}
    });

    let engine = engine(
        &document(1, workload),
        &store,
        task,
        registry_with(runner),
        EngineSettings::default().with_abort_on_sla_failure(true),
    )
    .expect("engine");
    engine.run().await.expect("every workload ran");

    assert_eq!(store.task_status(task).expect("status"), TaskStatus::Aborted);
}

#[tokio::test]
async fn orchestration_failure_crashes_subtask_and_task() {
    let store = Arc::new(InMemoryBenchmarkStore::new());
    let task = new_task(&store);
    let runner = ScriptedRunnerPlugin::new("serial", one_batch());
    let probe = runner.probe.clone();
    let workload = json!({"name": "Dummy.run", "runner": {"type": "constant"}});

    let engine = engine(
        &document(2, workload),
        &store,
        task,
        registry_with(runner),
        EngineSettings::default(),
    )
    .expect("engine");
    let error = engine.run().await.expect_err("missing runner crashes the task");

    match error {
        EngineError::Core(error) => assert_eq!(error.kind, CoreErrorKind::PluginNotFound),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(probe.runs(), 0);
    assert_eq!(store.task_status(task).expect("status"), TaskStatus::Crashed);

    let subtasks = store.list_subtasks(task).expect("subtasks");
    assert_eq!(subtasks.len(), 1);
    assert_eq!(subtasks[0].status, SubtaskStatus::Crashed);
}

#[tokio::test]
async fn runner_error_is_logged_and_swallowed() {
    let store = Arc::new(InMemoryBenchmarkStore::new());
    let task = new_task(&store);
    let runner = ScriptedRunnerPlugin::new(
        "serial",
        RunnerScript {
            batches: vec![vec![iteration(0.0, 0.1)]],
            fail_with: Some("target refused connection".to_string()),
            ..RunnerScript::default()
        },
    );
    let probe = runner.probe.clone();

    let engine = engine(
        &document(2, serial_workload()),
        &store,
        task,
        registry_with(runner),
        EngineSettings::default(),
    )
    .expect("engine");
    engine.run().await.expect("runner errors do not fail the task");

    assert_eq!(probe.runs(), 2);
    assert_eq!(store.task_status(task).expect("status"), TaskStatus::Finished);

    let subtask = store.list_subtasks(task).expect("subtasks")[0].id;
    let workload = store.list_workloads(subtask).expect("workloads")[0].clone();
    let results = workload.results.expect("results");
    assert!(
        results
            .sla_results
            .iter()
            .any(|outcome| outcome.criterion == "something_went_wrong"
                && outcome.detail.contains("target refused connection"))
    );
}

#[tokio::test]
async fn hooks_declared_on_a_workload_are_reported() {
    let store = Arc::new(InMemoryBenchmarkStore::new());
    let task = new_task(&store);
    let recorder = Arc::new(RecordingHookPlugin::new());
    let runner = ScriptedRunnerPlugin::new(
        "serial",
        RunnerScript {
            batches: vec![vec![iteration(0.0, 0.1)]],
            events: vec![RunnerEvent::new("iteration", 1)],
            ..RunnerScript::default()
        },
    );
    let registry = PluginRegistry::new()
        .with_scenario(Arc::new(FakeScenario::new("Dummy.run")))
        .with_runner(Arc::new(runner))
        .with_sla(Arc::new(MaxDurationSlaPlugin))
        .with_hook(recorder.clone())
        .with_trigger(Arc::new(EventTypeTriggerPlugin));
    let workload = json!({
        "name": "Dummy.run",
        "runner": {"type": "serial"},
        "hooks": [{"name": "record", "args": {}, "trigger": {"name": "event", "args": {"type": "iteration"}}}]
    });

    let engine = engine(&document(1, workload), &store, task, registry, EngineSettings::default())
        .expect("engine");
    engine.validate(false).expect("valid");
    engine.run().await.expect("run");

    assert_eq!(recorder.events().len(), 1);
    let subtask = store.list_subtasks(task).expect("subtasks")[0].id;
    let workload = store.list_workloads(subtask).expect("workloads")[0].clone();
    let reports = workload
        .results
        .and_then(|results| results.hooks_results)
        .expect("hook reports");
    assert_eq!(reports[0].summary.get("success"), Some(&1));
}

#[tokio::test]
async fn hookless_workload_tolerates_runner_events() {
    let store = Arc::new(InMemoryBenchmarkStore::new());
    let task = new_task(&store);
    let runner = ScriptedRunnerPlugin::new(
        "serial",
        RunnerScript {
            batches: vec![vec![iteration(0.0, 0.1)]],
            events: vec![RunnerEvent::new("iteration", 1)],
            ..RunnerScript::default()
        },
    );

    let engine = engine(
        &document(1, serial_workload()),
        &store,
        task,
        registry_with(runner),
        EngineSettings::default(),
    )
    .expect("engine");
    engine.run().await.expect("run");

    assert_eq!(store.task_status(task).expect("status"), TaskStatus::Finished);
    let subtask = store.list_subtasks(task).expect("subtasks")[0].id;
    let workload = store.list_workloads(subtask).expect("workloads")[0].clone();
    let results = workload.results.expect("results");
    assert!(results.sla_results.is_empty(), "{:?}", results.sla_results);
    assert!(results.hooks_results.is_none());
}
