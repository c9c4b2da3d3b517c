use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{SubtaskId, WorkloadId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerSpec {
    pub name: String,
    pub args: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub args: Value,
    pub trigger: TriggerSpec,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewWorkloadRecord {
    pub name: String,
    pub description: String,
    pub position: usize,
    pub runner: Map<String, Value>,
    pub sla: Map<String, Value>,
    pub hooks: Vec<HookSpec>,
    pub context: Map<String, Value>,
    pub args: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WorkloadRecord {
    pub id: WorkloadId,
    pub subtask: SubtaskId,
    pub name: String,
    pub description: String,
    pub position: usize,
    pub runner: Map<String, Value>,
    pub sla: Map<String, Value>,
    pub hooks: Vec<HookSpec>,
    pub context: Map<String, Value>,
    pub args: Map<String, Value>,
    pub results: Option<WorkloadResults>,
}

/// One iteration as reported by a runner. Fields beyond the timing data are
/// kept verbatim in `extra`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IterationResult {
    pub timestamp: f64,
    pub duration: f64,
    #[serde(default)]
    pub idle_duration: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IterationResult {
    pub fn new(timestamp: f64, duration: f64) -> Self {
        Self {
            timestamp,
            duration,
            idle_duration: 0.0,
            error: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error.push(error.into());
        self
    }

    pub fn finished_at(&self) -> f64 {
        self.timestamp + self.duration
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunnerEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub value: Value,
}

impl RunnerEvent {
    pub fn new(event_type: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            event_type: event_type.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultChunk {
    pub index: usize,
    pub raw: Vec<IterationResult>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SlaOutcome {
    pub criterion: String,
    pub success: bool,
    pub detail: String,
}

impl SlaOutcome {
    pub fn new(criterion: impl Into<String>, success: bool, detail: impl Into<String>) -> Self {
        Self {
            criterion: criterion.into(),
            success,
            detail: detail.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookRunStatus {
    Success,
    Failed,
}

impl HookRunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HookRunStatus::Success => "success",
            HookRunStatus::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HookRunResult {
    pub status: HookRunStatus,
    pub triggered_by: RunnerEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub output: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HookReport {
    pub config: HookSpec,
    pub results: Vec<HookRunResult>,
    pub summary: BTreeMap<String, usize>,
}

/// Aggregate persisted once per workload when its result consumer exits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadResults {
    pub load_duration: f64,
    pub full_duration: f64,
    pub sla_results: Vec<SlaOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks_results: Option<Vec<HookReport>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
}

impl WorkloadResults {
    pub fn passed_sla(&self) -> bool {
        self.sla_results.iter().all(|outcome| outcome.success)
    }
}
