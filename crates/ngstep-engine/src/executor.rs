use anyhow::Result;
use ngstep_checkpoint::ProjectLayout;
use ngstep_core::{ManualIntervention, UpgradeError, UpgradeOptions, UpgradeStep, ValidationLevel};
use ngstep_resolver::EcosystemTable;
use tracing::{debug, info, warn};

/// What a migration capability may look at while applying one step.
#[derive(Debug, Clone, Copy)]
pub struct MigrationContext<'a> {
    pub layout: &'a ProjectLayout,
    pub options: &'a UpgradeOptions,
    pub table: &'a EcosystemTable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub applied_changes: Vec<String>,
    pub manual_interventions: Vec<ManualIntervention>,
}

impl MigrationOutcome {
    pub fn merge(&mut self, other: MigrationOutcome) {
        self.applied_changes.extend(other.applied_changes);
        self.manual_interventions.extend(other.manual_interventions);
    }

    pub fn required_interventions(&self) -> impl Iterator<Item = &ManualIntervention> {
        self.manual_interventions
            .iter()
            .filter(|intervention| intervention.required)
    }
}

/// One mechanism for moving a project across a version transition.
pub trait MigrationCapability {
    fn name(&self) -> &str;

    fn apply(&mut self, step: &UpgradeStep, context: &MigrationContext<'_>)
        -> Result<MigrationOutcome>;
}

/// Runs the configured capabilities, in order, for exactly one step.
pub struct StepExecutor {
    capabilities: Vec<Box<dyn MigrationCapability>>,
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("capabilities", &self.capability_names())
            .finish()
    }
}

impl Default for StepExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl StepExecutor {
    pub fn new() -> Self {
        Self {
            capabilities: Vec::new(),
        }
    }

    pub fn with_capability(mut self, capability: impl MigrationCapability + 'static) -> Self {
        self.capabilities.push(Box::new(capability));
        self
    }

    pub fn capability_names(&self) -> Vec<&str> {
        self.capabilities
            .iter()
            .map(|capability| capability.name())
            .collect()
    }

    /// Applies `step`. A capability error, or a required intervention under
    /// comprehensive validation, fails the step with `StepExecution`.
    pub fn execute(
        &mut self,
        step: &UpgradeStep,
        context: &MigrationContext<'_>,
    ) -> Result<MigrationOutcome, UpgradeError> {
        let mut outcome = MigrationOutcome::default();
        for capability in &mut self.capabilities {
            debug!(step = %step, capability = capability.name(), "applying migration");
            let applied = capability.apply(step, context).map_err(|err| {
                warn!(step = %step, capability = capability.name(), error = %format!("{err:#}"), "migration failed");
                UpgradeError::StepExecution {
                    step: *step,
                    cause: format!("{}: {err:#}", capability.name()),
                }
            })?;
            outcome.merge(applied);
        }

        if context.options.validation_level == ValidationLevel::Comprehensive {
            if let Some(unresolved) = outcome.required_interventions().next() {
                return Err(UpgradeError::StepExecution {
                    step: *step,
                    cause: format!("manual intervention required: {}", unresolved.change),
                });
            }
        }

        info!(
            step = %step,
            changes = outcome.applied_changes.len(),
            interventions = outcome.manual_interventions.len(),
            "step applied"
        );
        Ok(outcome)
    }
}
