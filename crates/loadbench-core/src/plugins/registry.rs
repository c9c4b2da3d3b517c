use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::deployment::DEFAULT_PLATFORM;
use crate::models::CoreError;
use crate::plugins::{
    ContextPlugin, HookPlugin, PluginKind, RunnerPlugin, ScenarioPlugin, SlaPlugin, TriggerPlugin,
    ValidationContext, ValidationError,
};

/// Explicit `(kind, name)` lookup for every plugin the engine can load.
///
/// Contexts are additionally keyed by platform: a platform-specific context
/// shadows a `default` one with the same name.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    scenarios: HashMap<String, Arc<dyn ScenarioPlugin>>,
    runners: HashMap<String, Arc<dyn RunnerPlugin>>,
    contexts: HashMap<String, Vec<Arc<dyn ContextPlugin>>>,
    slas: HashMap<String, Arc<dyn SlaPlugin>>,
    hooks: HashMap<String, Arc<dyn HookPlugin>>,
    triggers: HashMap<String, Arc<dyn TriggerPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scenario(mut self, plugin: Arc<dyn ScenarioPlugin>) -> Self {
        self.scenarios.insert(plugin.name().to_string(), plugin);
        self
    }

    pub fn with_runner(mut self, plugin: Arc<dyn RunnerPlugin>) -> Self {
        self.runners.insert(plugin.name().to_string(), plugin);
        self
    }

    pub fn with_context(mut self, plugin: Arc<dyn ContextPlugin>) -> Self {
        let entries = self.contexts.entry(plugin.name().to_string()).or_default();
        entries.retain(|existing| existing.platform() != plugin.platform());
        entries.push(plugin);
        self
    }

    pub fn with_sla(mut self, plugin: Arc<dyn SlaPlugin>) -> Self {
        self.slas.insert(plugin.name().to_string(), plugin);
        self
    }

    pub fn with_hook(mut self, plugin: Arc<dyn HookPlugin>) -> Self {
        self.hooks.insert(plugin.name().to_string(), plugin);
        self
    }

    pub fn with_trigger(mut self, plugin: Arc<dyn TriggerPlugin>) -> Self {
        self.triggers.insert(plugin.name().to_string(), plugin);
        self
    }

    pub fn scenario(&self, name: &str) -> Result<Arc<dyn ScenarioPlugin>, CoreError> {
        lookup(&self.scenarios, PluginKind::Scenario, name)
    }

    pub fn scenario_title(&self, name: &str) -> Option<String> {
        self.scenarios.get(name).and_then(|plugin| plugin.title())
    }

    pub fn runner(&self, name: &str) -> Result<Arc<dyn RunnerPlugin>, CoreError> {
        lookup(&self.runners, PluginKind::Runner, name)
    }

    pub fn context(&self, name: &str, platform: &str) -> Result<Arc<dyn ContextPlugin>, CoreError> {
        let entries = self.contexts.get(name).map(Vec::as_slice).unwrap_or(&[]);
        entries
            .iter()
            .find(|plugin| plugin.platform() == platform)
            .or_else(|| {
                entries
                    .iter()
                    .find(|plugin| plugin.platform() == DEFAULT_PLATFORM)
            })
            .cloned()
            .ok_or_else(|| CoreError::plugin_not_found(PluginKind::Context.as_str(), name))
    }

    pub fn has_context(&self, name: &str, platform: &str) -> bool {
        self.context(name, platform).is_ok()
    }

    pub fn sla(&self, name: &str) -> Result<Arc<dyn SlaPlugin>, CoreError> {
        lookup(&self.slas, PluginKind::Sla, name)
    }

    pub fn hook(&self, name: &str) -> Result<Arc<dyn HookPlugin>, CoreError> {
        lookup(&self.hooks, PluginKind::Hook, name)
    }

    pub fn trigger(&self, name: &str) -> Result<Arc<dyn TriggerPlugin>, CoreError> {
        lookup(&self.triggers, PluginKind::Trigger, name)
    }

    /// Runs the named plugin's own validator. A missing plugin is reported as
    /// a validation error rather than a lookup failure.
    pub fn validate(
        &self,
        kind: PluginKind,
        name: &str,
        platform: &str,
        context: &ValidationContext<'_>,
        config: &Value,
    ) -> Vec<ValidationError> {
        let reasons = match kind {
            PluginKind::Scenario => self
                .scenarios
                .get(name)
                .map(|plugin| plugin.validate(context, config)),
            PluginKind::Runner => self
                .runners
                .get(name)
                .map(|plugin| plugin.validate(context, config)),
            PluginKind::Context => self
                .context(name, platform)
                .ok()
                .map(|plugin| plugin.validate(context, config)),
            PluginKind::Sla => self
                .slas
                .get(name)
                .map(|plugin| plugin.validate(context, config)),
            PluginKind::Hook => self
                .hooks
                .get(name)
                .map(|plugin| plugin.validate(context, config)),
            PluginKind::Trigger => self
                .triggers
                .get(name)
                .map(|plugin| plugin.validate(context, config)),
        };

        let reasons = reasons.unwrap_or_else(|| {
            vec![format!(
                "there is no {} plugin with name '{name}'",
                kind.as_str()
            )]
        });

        reasons
            .into_iter()
            .map(|message| ValidationError {
                kind,
                plugin: name.to_string(),
                message,
            })
            .collect()
    }
}

fn lookup<P: ?Sized>(
    plugins: &HashMap<String, Arc<P>>,
    kind: PluginKind,
    name: &str,
) -> Result<Arc<P>, CoreError> {
    plugins
        .get(name)
        .cloned()
        .ok_or_else(|| CoreError::plugin_not_found(kind.as_str(), name))
}
