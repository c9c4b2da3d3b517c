use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Write as _};
use std::sync::Arc;

use serde_json::{Value, json};

use crate::config::{SubTask, TaskConfig, Workload};
use crate::deployment::{Credentials, DEFAULT_PLATFORM, Deployment, PlatformCredentials};
use crate::models::{
    CoreError, CoreErrorKind, SubtaskId, SubtaskStatus, TaskFailure, TaskId, TaskStatus,
    WorkloadId,
};
use crate::orchestration::consumer::{ResultConsumer, WorkloadRun};
use crate::orchestration::with_store;
use crate::persistence::BenchmarkStore;
use crate::plugins::{
    ContextEnvironment, ContextManager, HookExecutor, PluginKind, PluginRegistry, SlaChecker,
    ValidationContext, ValidationLevel, runner_channels,
};
use crate::settings::EngineSettings;

const USERS_CONTEXT: &str = "users";
const INVALID_TASK_CONFIG: &str = "InvalidTaskConfig";

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Task config is invalid: {0}")]
    InvalidTask(String),
    #[error("task execution was aborted")]
    Aborted,
    #[error(transparent)]
    Core(#[from] CoreError),
}

pub struct TaskEngine {
    config: TaskConfig,
    task: TaskId,
    store: Arc<dyn BenchmarkStore>,
    deployment: Arc<dyn Deployment>,
    registry: Arc<PluginRegistry>,
    settings: EngineSettings,
}

impl TaskEngine {
    /// Parses `document`; a malformed document marks the task FAILED.
    pub fn new(
        document: &Value,
        task: TaskId,
        store: Arc<dyn BenchmarkStore>,
        deployment: Arc<dyn Deployment>,
        registry: Arc<PluginRegistry>,
        settings: EngineSettings,
    ) -> Result<Self, EngineError> {
        settings.validate()?;

        let config = match TaskConfig::new(document, &registry) {
            Ok(config) => config,
            Err(error) => {
                mark_failed(store.as_ref(), task, capture_failure(error.type_name(), &error));
                return Err(EngineError::InvalidTask(error.to_string()));
            }
        };

        Ok(Self {
            config,
            task,
            store,
            deployment,
            registry,
            settings,
        })
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn validate(&self, only_syntax: bool) -> Result<(), EngineError> {
        self.log_phase("Task validation.", || {
            self.store
                .update_task_status(self.task, TaskStatus::Validating)?;

            let outcome = self.validate_phases(only_syntax);
            if let Err(error) = &outcome {
                let error_type = match error.kind {
                    CoreErrorKind::Validation => INVALID_TASK_CONFIG.to_string(),
                    kind => format!("{kind:?}"),
                };
                mark_failed(
                    self.store.as_ref(),
                    self.task,
                    capture_failure(&error_type, error),
                );
            }
            outcome.map_err(|error| EngineError::InvalidTask(error.message))
        })
    }

    fn validate_phases(&self, only_syntax: bool) -> Result<(), CoreError> {
        self.log_phase("Task validation of syntax.", || self.validate_syntax())?;
        if only_syntax {
            return Ok(());
        }
        self.log_phase("Task validation of required platforms.", || {
            self.validate_platforms()
        })?;
        self.log_phase("Task validation of semantic.", || self.validate_semantic())
    }

    fn validate_syntax(&self) -> Result<(), CoreError> {
        let workloads: Vec<&Workload> = self.config.workloads().collect();
        self.validate_workloads(&workloads, &ValidationContext::syntax())
    }

    fn validate_platforms(&self) -> Result<(), CoreError> {
        let credentials: Credentials = self
            .deployment
            .all_credentials()
            .into_iter()
            .filter_map(|(platform, entries)| {
                entries.into_iter().next().map(|first| (platform, first))
            })
            .collect();

        let workloads: Vec<&Workload> = self.config.workloads().collect();
        self.validate_workloads(
            &workloads,
            &ValidationContext::with_credentials(ValidationLevel::Platform, &credentials),
        )
    }

    fn validate_semantic(&self) -> Result<(), CoreError> {
        let mut platforms: BTreeMap<String, Vec<&Workload>> = BTreeMap::new();
        for workload in self.config.workloads() {
            platforms
                .entry(self.platform_of(&workload.name))
                .or_default()
                .push(workload);
        }

        for (platform, workloads) in platforms {
            let credentials = self.deployment.credentials_for(&platform)?;
            if let Some(admin) = &credentials.admin {
                admin.verify_connection()?;
            }

            if !self.registry.has_context(USERS_CONTEXT, &platform) {
                let credentials = Credentials::from([(platform, credentials)]);
                self.validate_workloads(
                    &workloads,
                    &ValidationContext::with_credentials(ValidationLevel::Semantic, &credentials),
                )?;
                continue;
            }

            let users = self
                .registry
                .context(USERS_CONTEXT, &platform)?
                .create(&json!({}))?;
            let mut environment = ContextEnvironment::new(self.task, "", platform.as_str());
            environment.admin = credentials.admin.clone();

            ContextManager::single(USERS_CONTEXT, users).run(&mut environment, |environment| {
                let credentials = Credentials::from([(
                    platform.clone(),
                    PlatformCredentials {
                        admin: credentials.admin.clone(),
                        users: environment.users.clone(),
                    },
                )]);
                self.validate_workloads(
                    &workloads,
                    &ValidationContext::with_credentials(ValidationLevel::Semantic, &credentials),
                )
            })?;
        }

        Ok(())
    }

    /// Validates every workload before failing, so one error lists them all.
    fn validate_workloads(
        &self,
        workloads: &[&Workload],
        context: &ValidationContext<'_>,
    ) -> Result<(), CoreError> {
        let failures: Vec<String> = workloads
            .iter()
            .filter_map(|workload| {
                let reasons = self.validate_workload(workload, context);
                (!reasons.is_empty()).then(|| workload.invalid_config_message(&reasons))
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CoreError::new(
                CoreErrorKind::Validation,
                failures.join("\n\n"),
            ))
        }
    }

    fn validate_workload(
        &self,
        workload: &Workload,
        context: &ValidationContext<'_>,
    ) -> Vec<String> {
        let platform = self.platform_of(&workload.name);
        let registry = &self.registry;
        let mut errors = registry.validate(
            PluginKind::Scenario,
            &workload.name,
            &platform,
            context,
            &workload.to_config(),
        );

        errors.extend(registry.validate(
            PluginKind::Runner,
            workload.runner_type(),
            &platform,
            context,
            &Value::Object(workload.runner.clone()),
        ));

        let scenario_context = registry
            .scenario(&workload.name)
            .map(|scenario| scenario.default_context())
            .unwrap_or_default();
        for (name, config) in workload.context.iter().chain(scenario_context.iter()) {
            errors.extend(registry.validate(PluginKind::Context, name, &platform, context, config));
        }

        for (name, config) in &workload.sla {
            errors.extend(registry.validate(PluginKind::Sla, name, &platform, context, config));
        }

        for hook in &workload.hooks {
            errors.extend(registry.validate(
                PluginKind::Hook,
                &hook.name,
                &platform,
                context,
                &hook.args,
            ));
            errors.extend(registry.validate(
                PluginKind::Trigger,
                &hook.trigger.name,
                &platform,
                context,
                &hook.trigger.args,
            ));
        }

        errors.iter().map(ToString::to_string).collect()
    }

    /// Runs every subtask in order. Returns `EngineError::Aborted` when the
    /// task was aborted before all workloads ran.
    pub async fn run(&self) -> Result<(), EngineError> {
        tracing::info!("Task {} | Starting: Benchmarking.", self.task.0);
        let task = self.task;
        with_store(&self.store, move |store| {
            store.update_task_status(task, TaskStatus::Running)
        })
        .await?;

        let mut outcome = Ok(());
        for subtask in &self.config.subtasks {
            outcome = self.run_subtask(subtask).await;
            if outcome.is_err() {
                break;
            }
        }

        match outcome {
            Ok(()) => {
                with_store(&self.store, move |store| {
                    let final_status = if store.task_status(task)?.is_abort_requested(true) {
                        TaskStatus::Aborted
                    } else {
                        TaskStatus::Finished
                    };
                    store.update_task_status(task, final_status)
                })
                .await?;
                tracing::info!("Task {} | Completed: Benchmarking.", self.task.0);
                Ok(())
            }
            Err(EngineError::Aborted) => {
                tracing::info!(task_id = task.0, "Received aborting signal.");
                with_store(&self.store, move |store| {
                    store.update_task_status(task, TaskStatus::Aborted)
                })
                .await?;
                tracing::info!("Task {} | Completed: Benchmarking.", self.task.0);
                Err(EngineError::Aborted)
            }
            Err(error) => {
                self.mark_crashed().await;
                tracing::info!("Task {} | Failed: Benchmarking.", self.task.0);
                Err(error)
            }
        }
    }

    async fn run_subtask(&self, subtask: &SubTask) -> Result<(), EngineError> {
        let task = self.task;
        let record = subtask.to_record();
        let subtask_id =
            with_store(&self.store, move |store| store.create_subtask(task, &record)).await?;

        for workload in &subtask.workloads {
            match self.run_workload(subtask_id, workload).await {
                Ok(()) => {}
                Err(EngineError::Aborted) => {
                    self.mark_subtask(subtask_id, SubtaskStatus::Aborted).await;
                    return Err(EngineError::Aborted);
                }
                Err(error) => {
                    tracing::error!(
                        task_id = self.task.0,
                        subtask = subtask_id.0,
                        workload = %workload.name,
                        pos = workload.pos,
                        message = %error,
                        "subtask crashed"
                    );
                    self.mark_subtask(subtask_id, SubtaskStatus::Crashed).await;
                    return Err(error);
                }
            }
        }

        with_store(&self.store, move |store| {
            store.update_subtask_status(subtask_id, SubtaskStatus::Finished)
        })
        .await?;
        Ok(())
    }

    async fn run_workload(
        &self,
        subtask: SubtaskId,
        workload: &Workload,
    ) -> Result<(), EngineError> {
        let task = self.task;
        let status = with_store(&self.store, move |store| store.task_status(task)).await?;
        if status.is_abort_requested(true) {
            return Err(EngineError::Aborted);
        }

        let key = workload.key();
        let record = workload.to_record();
        let workload_id =
            with_store(&self.store, move |store| store.create_workload(subtask, &record)).await?;
        tracing::info!(
            task_id = self.task.0,
            workload = workload_id.0,
            "Running benchmark with key: \n{}",
            serde_json::to_string_pretty(&key).unwrap_or_default()
        );

        let (sink, streams) = runner_channels(self.settings.runner_channel_capacity);
        let runner = self
            .registry
            .runner(workload.runner_type())?
            .create(self.task, &workload.runner, sink)?;
        let mut environment = self.prepare_environment(workload, workload_id)?;
        let sla = SlaChecker::from_config(&self.registry, &workload.sla)?;
        let hooks = if workload.has_hooks() {
            Some(HookExecutor::from_specs(&self.registry, &workload.hooks)?)
        } else {
            None
        };

        let consumer = ResultConsumer::start(
            WorkloadRun {
                task: self.task,
                workload: workload_id,
                runner: runner.clone(),
                streams,
                sla,
                hooks,
            },
            self.store.clone(),
            &self.settings,
        );

        let registry = self.registry.clone();
        let scenario = workload.name.clone();
        let args = workload.args.clone();
        let body = tokio::task::spawn_blocking(move || {
            let contexts = ContextManager::new(&registry, &environment)?;
            contexts.run(&mut environment, |environment| {
                runner.run(&scenario, environment, &args)
            })
        })
        .await
        .unwrap_or_else(|error| {
            Err(CoreError::runner_failure(format!(
                "workload body terminated abnormally: {error}"
            )))
        });

        let body_error = body.err();
        consumer.finish(body_error.as_ref()).await?;

        if let Some(error) = body_error {
            tracing::error!(
                task_id = self.task.0,
                workload = workload_id.0,
                kind = ?error.kind,
                message = %error.message,
                "workload execution failed"
            );
        }
        Ok(())
    }

    fn prepare_environment(
        &self,
        workload: &Workload,
        owner: WorkloadId,
    ) -> Result<ContextEnvironment, CoreError> {
        let scenario = self.registry.scenario(&workload.name)?;
        let platform = scenario.platform().to_string();
        let credentials = self.deployment.credentials_for(&platform)?;

        let mut config = scenario.default_context();
        let declares_users = workload
            .context
            .keys()
            .any(|name| name.split('@').next() == Some(USERS_CONTEXT));
        if !declares_users && self.registry.has_context(USERS_CONTEXT, &platform) {
            config
                .entry(USERS_CONTEXT.to_string())
                .or_insert_with(|| json!({}));
        }
        config.extend(workload.context.clone());

        let mut environment = ContextEnvironment::new(self.task, &workload.name, platform);
        environment.owner = Some(owner);
        environment.config = config;
        environment.admin = credentials.admin;
        Ok(environment)
    }

    fn platform_of(&self, scenario: &str) -> String {
        self.registry
            .scenario(scenario)
            .map(|plugin| plugin.platform().to_string())
            .unwrap_or_else(|_| DEFAULT_PLATFORM.to_string())
    }

    async fn mark_subtask(&self, subtask: SubtaskId, status: SubtaskStatus) {
        let outcome = with_store(&self.store, move |store| {
            store.update_subtask_status(subtask, status)
        })
        .await;
        if let Err(error) = outcome {
            tracing::error!(
                task_id = self.task.0,
                subtask = subtask.0,
                kind = ?error.kind,
                message = %error.message,
                "failed to update subtask status"
            );
        }
    }

    async fn mark_crashed(&self) {
        let task = self.task;
        let status = match with_store(&self.store, move |store| store.task_status(task)).await {
            Ok(current) if current.is_abort_requested(true) => {
                tracing::warn!(
                    task_id = self.task.0,
                    status = current.as_str(),
                    "task crashed while aborting, finalizing as aborted"
                );
                TaskStatus::Aborted
            }
            _ => TaskStatus::Crashed,
        };

        let outcome = with_store(&self.store, move |store| {
            store.update_task_status(task, status)
        })
        .await;
        if let Err(error) = outcome {
            tracing::error!(
                task_id = task.0,
                kind = ?error.kind,
                message = %error.message,
                "failed to mark task as crashed"
            );
        }
    }

    fn log_phase<T, E: Display>(
        &self,
        phase: &str,
        operation: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        tracing::info!("Task {} | Starting: {phase}", self.task.0);
        let outcome = operation();
        match &outcome {
            Ok(_) => tracing::info!("Task {} | Completed: {phase}", self.task.0),
            Err(_) => tracing::info!("Task {} | Failed: {phase}", self.task.0),
        }
        outcome
    }
}

fn mark_failed(store: &dyn BenchmarkStore, task: TaskId, failure: TaskFailure) {
    if let Err(error) = store.set_task_failed(task, failure) {
        tracing::error!(
            task_id = task.0,
            kind = ?error.kind,
            message = %error.message,
            "failed to mark task as failed"
        );
    }
}

fn capture_failure(error_type: &str, error: &(dyn Error + 'static)) -> TaskFailure {
    let mut trace = String::new();
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = writeln!(trace, "caused by: {cause}");
        source = cause.source();
    }

    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        let _ = write!(trace, "{backtrace}");
    }

    TaskFailure {
        error_type: error_type.to_string(),
        message: error.to_string(),
        trace,
    }
}
