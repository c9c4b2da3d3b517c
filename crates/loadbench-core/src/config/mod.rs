pub mod schema;
pub mod workload;

use serde_json::Value;
use thiserror::Error;

pub use schema::SUPPORTED_VERSIONS;
pub use workload::{DEFAULT_RUNNER_TYPE, SubTask, Workload, WorkloadKey};

use crate::plugins::PluginRegistry;
use workload::SubTaskDocument;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskConfigError {
    #[error("Input task is empty")]
    Empty,
    #[error("Task configuration version {version} is not supported. Supported versions: {}", join_versions(.supported))]
    UnsupportedVersion { version: String, supported: Vec<u64> },
    #[error("{message}")]
    Schema { message: String },
    #[error("failed to parse task document: {message}")]
    Parse { message: String },
}

impl TaskConfigError {
    pub(crate) fn unsupported(version: String) -> Self {
        TaskConfigError::UnsupportedVersion {
            version,
            supported: SUPPORTED_VERSIONS.to_vec(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            TaskConfigError::Empty => "EmptyTask",
            TaskConfigError::UnsupportedVersion { .. } => "UnsupportedTaskVersion",
            TaskConfigError::Schema { .. } => "TaskSchemaViolation",
            TaskConfigError::Parse { .. } => "TaskParseError",
        }
    }
}

fn join_versions(versions: &[u64]) -> String {
    versions
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A validated task document normalized into subtasks and workloads.
///
/// The document version only selects the schema and the translator; every
/// version produces the same `SubTask`/`Workload` shapes.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskConfig {
    pub version: u64,
    pub title: String,
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub subtasks: Vec<SubTask>,
}

impl TaskConfig {
    pub fn new(document: &Value, registry: &PluginRegistry) -> Result<Self, TaskConfigError> {
        if document.is_null() {
            return Err(TaskConfigError::Empty);
        }

        let version = document_version(document)?;
        schema::validate_document(version, document)?;

        let subtasks = match version {
            1 => translate_v1(document),
            2 => translate_v2(document),
            other => return Err(TaskConfigError::unsupported(other.to_string())),
        }?
        .into_iter()
        .map(|subtask| SubTask::from_document(subtask, registry))
        .collect();

        Ok(Self {
            version,
            title: document
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("Task")
                .to_string(),
            tags: string_list(document.get("tags")),
            description: document
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            subtasks,
        })
    }

    /// Parses a YAML (or JSON) task file before validating it.
    pub fn from_yaml_str(raw: &str, registry: &PluginRegistry) -> Result<Self, TaskConfigError> {
        let document: Value = serde_yaml::from_str(raw).map_err(|error| TaskConfigError::Parse {
            message: error.to_string(),
        })?;
        Self::new(&document, registry)
    }

    pub fn workloads(&self) -> impl Iterator<Item = &Workload> {
        self.subtasks
            .iter()
            .flat_map(|subtask| subtask.workloads.iter())
    }
}

fn document_version(document: &Value) -> Result<u64, TaskConfigError> {
    let Some(raw) = document.get("version") else {
        return Ok(1);
    };

    let version = match raw {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|value| value.fract() == 0.0 && *value >= 0.0)
                .map(|value| value as u64)
        }),
        _ => None,
    };

    match version {
        Some(version) if SUPPORTED_VERSIONS.contains(&version) => Ok(version),
        _ => Err(TaskConfigError::unsupported(raw.to_string())),
    }
}

fn translate_v1(document: &Value) -> Result<Vec<SubTaskDocument>, TaskConfigError> {
    let Some(scenarios) = document.as_object() else {
        return Err(schema_error("v1 task document must be a mapping"));
    };

    let mut subtasks = Vec::new();
    for (name, workloads) in scenarios {
        for workload in workloads.as_array().into_iter().flatten() {
            let mut workload = workload.clone();
            if let Some(fields) = workload.as_object_mut() {
                fields.insert("name".to_string(), Value::String(name.clone()));
            }
            let subtask = serde_json::json!({"title": name, "workloads": [workload]});
            subtasks.push(decode_subtask(subtask)?);
        }
    }
    Ok(subtasks)
}

fn translate_v2(document: &Value) -> Result<Vec<SubTaskDocument>, TaskConfigError> {
    document
        .get("subtasks")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .cloned()
        .map(decode_subtask)
        .collect()
}

fn decode_subtask(raw: Value) -> Result<SubTaskDocument, TaskConfigError> {
    serde_json::from_value(raw).map_err(|error| schema_error(&error.to_string()))
}

fn schema_error(message: &str) -> TaskConfigError {
    TaskConfigError::Schema {
        message: message.to_string(),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
