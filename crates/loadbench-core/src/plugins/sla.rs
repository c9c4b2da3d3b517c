use serde_json::{Map, Value};

use crate::models::{CoreError, IterationResult, SlaOutcome};
use crate::plugins::PluginRegistry;

/// One configured SLA criterion.
pub trait Sla: Send {
    /// Feeds one iteration; returns whether the criterion still holds.
    fn add_iteration(&mut self, iteration: &IterationResult) -> bool;

    fn result(&self) -> SlaOutcome;
}

/// Evaluates every configured criterion of a workload and carries the abort
/// and failure marks that end up in the final SLA report.
pub struct SlaChecker {
    criteria: Vec<Box<dyn Sla>>,
    aborted_on_sla: bool,
    aborted_manually: bool,
    unexpected_failure: Option<String>,
}

impl SlaChecker {
    pub fn new(criteria: Vec<Box<dyn Sla>>) -> Self {
        Self {
            criteria,
            aborted_on_sla: false,
            aborted_manually: false,
            unexpected_failure: None,
        }
    }

    pub fn from_config(
        registry: &PluginRegistry,
        config: &Map<String, Value>,
    ) -> Result<Self, CoreError> {
        let criteria = config
            .iter()
            .map(|(name, criterion)| registry.sla(name)?.create(criterion))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(criteria))
    }

    pub fn add_iteration(&mut self, iteration: &IterationResult) -> bool {
        // Every criterion sees every iteration, even after one has failed.
        self.criteria
            .iter_mut()
            .fold(true, |success, criterion| {
                criterion.add_iteration(iteration) && success
            })
    }

    pub fn mark_aborted_by_sla(&mut self) {
        self.aborted_on_sla = true;
    }

    pub fn mark_aborted_manually(&mut self) {
        self.aborted_manually = true;
    }

    pub fn mark_unexpected_failure(&mut self, error: impl Into<String>) {
        self.unexpected_failure = Some(error.into());
    }

    pub fn results(&self) -> Vec<SlaOutcome> {
        let mut results: Vec<SlaOutcome> = self
            .criteria
            .iter()
            .map(|criterion| criterion.result())
            .collect();

        if self.aborted_on_sla {
            results.push(SlaOutcome::new(
                "aborted_on_sla",
                false,
                "Task was aborted due to SLA failure(s).",
            ));
        }
        if self.aborted_manually {
            results.push(SlaOutcome::new(
                "aborted_manually",
                false,
                "Task was aborted due to abort signal.",
            ));
        }
        if let Some(error) = &self.unexpected_failure {
            results.push(SlaOutcome::new(
                "something_went_wrong",
                false,
                format!("Unexpected error: {error}"),
            ));
        }

        results
    }
}
