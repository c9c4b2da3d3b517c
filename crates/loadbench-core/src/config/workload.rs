use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{HookSpec, NewSubtaskRecord, NewWorkloadRecord};
use crate::plugins::PluginRegistry;

pub const DEFAULT_RUNNER_TYPE: &str = "serial";

#[derive(Debug, Deserialize)]
pub(crate) struct SubTaskDocument {
    pub title: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub run_in_parallel: bool,
    #[serde(default)]
    pub context: Map<String, Value>,
    pub workloads: Vec<WorkloadDocument>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WorkloadDocument {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default)]
    pub runner: Option<Map<String, Value>>,
    #[serde(default)]
    pub sla: Map<String, Value>,
    #[serde(default)]
    pub hooks: Vec<HookSpec>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubTask {
    pub title: String,
    pub group: Option<String>,
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub run_in_parallel: bool,
    pub context: Map<String, Value>,
    pub workloads: Vec<Workload>,
}

impl SubTask {
    pub(crate) fn from_document(document: SubTaskDocument, registry: &PluginRegistry) -> Self {
        let workloads = document
            .workloads
            .into_iter()
            .enumerate()
            .map(|(pos, workload)| Workload::from_document(workload, pos, registry))
            .collect();

        Self {
            title: document.title,
            group: document.group,
            tags: document.tags,
            description: document.description,
            run_in_parallel: document.run_in_parallel,
            context: document.context,
            workloads,
        }
    }

    pub fn to_record(&self) -> NewSubtaskRecord {
        NewSubtaskRecord {
            title: self.title.clone(),
            description: self.description.clone(),
            context: self.context.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Workload {
    pub name: String,
    pub description: String,
    pub runner: Map<String, Value>,
    pub sla: Map<String, Value>,
    pub hooks: Vec<HookSpec>,
    pub context: Map<String, Value>,
    pub args: Map<String, Value>,
    pub pos: usize,
}

/// Identity of a running workload, used to label persisted results and
/// validation diagnostics.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WorkloadKey {
    pub name: String,
    pub description: String,
    pub pos: usize,
    pub config: Value,
}

impl Workload {
    pub(crate) fn from_document(
        document: WorkloadDocument,
        pos: usize,
        registry: &PluginRegistry,
    ) -> Self {
        let description = document
            .description
            .filter(|description| !description.is_empty())
            .or_else(|| registry.scenario_title(&document.name))
            .unwrap_or_default();

        let runner = document.runner.unwrap_or_else(default_runner);

        Self {
            name: document.name,
            description,
            runner,
            sla: document.sla,
            hooks: document.hooks,
            context: document.context,
            args: document.args,
            pos,
        }
    }

    pub fn runner_type(&self) -> &str {
        self.runner
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_RUNNER_TYPE)
    }

    pub fn has_hooks(&self) -> bool {
        !self.hooks.is_empty()
    }

    /// Workload configuration as declared, omitting empty sections.
    pub fn to_config(&self) -> Value {
        let mut config = Map::new();
        config.insert("runner".to_string(), Value::Object(self.runner.clone()));

        if !self.sla.is_empty() {
            config.insert("sla".to_string(), Value::Object(self.sla.clone()));
        }
        if !self.args.is_empty() {
            config.insert("args".to_string(), Value::Object(self.args.clone()));
        }
        if !self.context.is_empty() {
            config.insert("context".to_string(), Value::Object(self.context.clone()));
        }
        if !self.hooks.is_empty() {
            config.insert(
                "hooks".to_string(),
                serde_json::to_value(&self.hooks).unwrap_or_default(),
            );
        }

        Value::Object(config)
    }

    pub fn key(&self) -> WorkloadKey {
        WorkloadKey {
            name: self.name.clone(),
            description: self.description.clone(),
            pos: self.pos,
            config: self.to_config(),
        }
    }

    pub fn invalid_config_message(&self, reasons: &[String]) -> String {
        let config = serde_json::to_string(&self.to_config()).unwrap_or_default();
        format!(
            "Input task is invalid!\n\nSubtask {}[{}] has wrong configuration\n\
             Subtask configuration:\n{config}\n\nReason(s):\n {}",
            self.name,
            self.pos,
            reasons.join("\n ")
        )
    }

    pub fn to_record(&self) -> NewWorkloadRecord {
        NewWorkloadRecord {
            name: self.name.clone(),
            description: self.description.clone(),
            position: self.pos,
            runner: self.runner.clone(),
            sla: self.sla.clone(),
            hooks: self.hooks.clone(),
            context: self.context.clone(),
            args: self.args.clone(),
        }
    }
}

fn default_runner() -> Map<String, Value> {
    let mut runner = Map::new();
    runner.insert(
        "type".to_string(),
        Value::String(DEFAULT_RUNNER_TYPE.to_string()),
    );
    runner
}
