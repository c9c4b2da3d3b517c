use std::collections::BTreeMap;

use serde_json::Value;

use crate::models::{CoreError, HookReport, HookRunResult, HookRunStatus, HookSpec, RunnerEvent};
use crate::plugins::PluginRegistry;

pub trait Hook: Send {
    fn run(&mut self, event: &RunnerEvent) -> Result<Value, CoreError>;
}

pub trait Trigger: Send {
    /// Whether the hook attached to this trigger should fire for `event`.
    fn on_event(&mut self, event: &RunnerEvent) -> bool;
}

struct ConfiguredHook {
    spec: HookSpec,
    hook: Box<dyn Hook>,
    trigger: Box<dyn Trigger>,
    results: Vec<HookRunResult>,
}

/// Dispatches runner events to triggers and records every hook execution.
pub struct HookExecutor {
    hooks: Vec<ConfiguredHook>,
}

impl HookExecutor {
    pub fn from_specs(registry: &PluginRegistry, specs: &[HookSpec]) -> Result<Self, CoreError> {
        let hooks = specs
            .iter()
            .map(|spec| {
                Ok(ConfiguredHook {
                    hook: registry.hook(&spec.name)?.create(&spec.args)?,
                    trigger: registry.trigger(&spec.trigger.name)?.create(&spec.trigger.args)?,
                    spec: spec.clone(),
                    results: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>, CoreError>>()?;

        Ok(Self { hooks })
    }

    pub fn on_event(&mut self, event: &RunnerEvent) {
        for configured in &mut self.hooks {
            if !configured.trigger.on_event(event) {
                continue;
            }

            let result = match configured.hook.run(event) {
                Ok(output) => HookRunResult {
                    status: HookRunStatus::Success,
                    triggered_by: event.clone(),
                    error: None,
                    output,
                },
                Err(error) => {
                    tracing::warn!(
                        hook = %configured.spec.name,
                        event_type = %event.event_type,
                        kind = ?error.kind,
                        message = %error.message,
                        "hook execution failed"
                    );
                    HookRunResult {
                        status: HookRunStatus::Failed,
                        triggered_by: event.clone(),
                        error: Some(error.message),
                        output: Value::Null,
                    }
                }
            };
            configured.results.push(result);
        }
    }

    pub fn results(&self) -> Vec<HookReport> {
        self.hooks
            .iter()
            .map(|configured| {
                let mut summary = BTreeMap::new();
                for result in &configured.results {
                    *summary
                        .entry(result.status.as_str().to_string())
                        .or_insert(0) += 1;
                }
                HookReport {
                    config: configured.spec.clone(),
                    results: configured.results.clone(),
                    summary,
                }
            })
            .collect()
    }
}
