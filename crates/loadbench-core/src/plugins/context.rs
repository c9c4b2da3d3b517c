use std::sync::Arc;

use serde_json::{Map, Value};

use crate::deployment::Credential;
use crate::models::{CoreError, TaskId, WorkloadId};
use crate::plugins::PluginRegistry;

/// Everything a runner and its contexts see while a workload executes.
/// Contexts publish what they provision (users, resources) into it.
#[derive(Clone, Debug)]
pub struct ContextEnvironment {
    pub task: TaskId,
    pub owner: Option<WorkloadId>,
    pub scenario_name: String,
    pub platform: String,
    pub config: Map<String, Value>,
    pub admin: Option<Arc<dyn Credential>>,
    pub users: Vec<Arc<dyn Credential>>,
    pub extra: Map<String, Value>,
}

impl ContextEnvironment {
    pub fn new(
        task: TaskId,
        scenario_name: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            task,
            owner: None,
            scenario_name: scenario_name.into(),
            platform: platform.into(),
            config: Map::new(),
            admin: None,
            users: Vec::new(),
            extra: Map::new(),
        }
    }
}

pub trait Context: Send {
    fn setup(&mut self, environment: &mut ContextEnvironment) -> Result<(), CoreError>;

    fn cleanup(&mut self, environment: &mut ContextEnvironment) -> Result<(), CoreError>;
}

/// Scoped acquisition of a set of contexts: every context whose setup was
/// attempted is cleaned up, in reverse order, however the scope ends.
pub struct ContextManager {
    contexts: Vec<(String, Box<dyn Context>)>,
}

impl ContextManager {
    pub fn new(
        registry: &PluginRegistry,
        environment: &ContextEnvironment,
    ) -> Result<Self, CoreError> {
        let mut plugins = environment
            .config
            .iter()
            .map(|(name, config)| {
                registry
                    .context(name, &environment.platform)
                    .map(|plugin| (name, config, plugin))
            })
            .collect::<Result<Vec<_>, _>>()?;
        plugins.sort_by_key(|(_, _, plugin)| plugin.order());

        let contexts = plugins
            .into_iter()
            .map(|(name, config, plugin)| Ok((name.clone(), plugin.create(config)?)))
            .collect::<Result<Vec<_>, CoreError>>()?;

        Ok(Self { contexts })
    }

    pub fn single(name: impl Into<String>, context: Box<dyn Context>) -> Self {
        Self {
            contexts: vec![(name.into(), context)],
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn run<T>(
        mut self,
        environment: &mut ContextEnvironment,
        body: impl FnOnce(&ContextEnvironment) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut attempted = 0;
        let mut setup_error = None;

        for (name, context) in &mut self.contexts {
            attempted += 1;
            tracing::debug!(context = %name, task_id = environment.task.0, "setting up context");
            if let Err(error) = context.setup(environment) {
                tracing::error!(
                    context = %name,
                    kind = ?error.kind,
                    message = %error.message,
                    "context setup failed"
                );
                setup_error = Some(error);
                break;
            }
        }

        let outcome = match setup_error {
            Some(error) => Err(error),
            None => body(&*environment),
        };

        for (name, context) in self.contexts[..attempted].iter_mut().rev() {
            tracing::debug!(context = %name, task_id = environment.task.0, "cleaning up context");
            if let Err(error) = context.cleanup(environment) {
                tracing::warn!(
                    context = %name,
                    kind = ?error.kind,
                    message = %error.message,
                    "context cleanup failed"
                );
            }
        }

        outcome
    }
}
