pub mod context;
pub mod hook;
pub mod registry;
pub mod runner;
pub mod sla;

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use serde_json::{Map, Value};

pub use context::{Context, ContextEnvironment, ContextManager};
pub use hook::{Hook, HookExecutor, Trigger};
pub use registry::PluginRegistry;
pub use runner::{Runner, RunnerSink, RunnerStreams, runner_channels};
pub use sla::{Sla, SlaChecker};

use crate::deployment::{Credentials, DEFAULT_PLATFORM};
use crate::models::{CoreError, TaskId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PluginKind {
    Scenario,
    Runner,
    Context,
    Sla,
    Hook,
    Trigger,
}

impl PluginKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PluginKind::Scenario => "scenario",
            PluginKind::Runner => "runner",
            PluginKind::Context => "context",
            PluginKind::Sla => "sla",
            PluginKind::Hook => "hook",
            PluginKind::Trigger => "trigger",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ValidationLevel {
    Syntax,
    Platform,
    Semantic,
}

#[derive(Clone, Copy, Debug)]
pub struct ValidationContext<'a> {
    pub level: ValidationLevel,
    pub credentials: Option<&'a Credentials>,
}

impl<'a> ValidationContext<'a> {
    pub fn syntax() -> Self {
        Self {
            level: ValidationLevel::Syntax,
            credentials: None,
        }
    }

    pub fn with_credentials(level: ValidationLevel, credentials: &'a Credentials) -> Self {
        Self {
            level,
            credentials: Some(credentials),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationError {
    pub kind: PluginKind,
    pub plugin: String,
    pub message: String,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} plugin '{}': {}",
            self.kind.as_str(),
            self.plugin,
            self.message
        )
    }
}

/// Operations shared by every plugin kind.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn platform(&self) -> &str {
        DEFAULT_PLATFORM
    }

    /// Returns the reasons `config` is unacceptable at the given level.
    fn validate(&self, _context: &ValidationContext<'_>, _config: &Value) -> Vec<String> {
        Vec::new()
    }
}

pub trait ScenarioPlugin: Plugin {
    fn title(&self) -> Option<String> {
        None
    }

    fn default_context(&self) -> Map<String, Value> {
        Map::new()
    }
}

pub trait RunnerPlugin: Plugin {
    fn create(
        &self,
        task: TaskId,
        config: &Map<String, Value>,
        sink: RunnerSink,
    ) -> Result<Arc<dyn Runner>, CoreError>;
}

pub trait ContextPlugin: Plugin {
    /// Contexts are set up in ascending order and cleaned up in reverse.
    fn order(&self) -> i32 {
        0
    }

    fn create(&self, config: &Value) -> Result<Box<dyn Context>, CoreError>;
}

pub trait SlaPlugin: Plugin {
    fn create(&self, config: &Value) -> Result<Box<dyn Sla>, CoreError>;
}

pub trait HookPlugin: Plugin {
    fn create(&self, args: &Value) -> Result<Box<dyn Hook>, CoreError>;
}

pub trait TriggerPlugin: Plugin {
    fn create(&self, args: &Value) -> Result<Box<dyn Trigger>, CoreError>;
}
