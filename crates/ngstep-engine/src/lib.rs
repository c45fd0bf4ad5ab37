mod analyze;
mod cancel;
mod config;
mod events;
mod executor;
mod journal;
mod migrations;
mod orchestrator;

pub use analyze::{analyze_project, ReadinessReport};
pub use cancel::CancellationToken;
pub use config::{OptionOverrides, ProjectConfig, DEFAULT_CLEANUP_KEEP};
pub use events::{InterventionResolution, SilentObserver, UpgradeEvent, UpgradeObserver};
pub use executor::{MigrationCapability, MigrationContext, MigrationOutcome, StepExecutor};
pub use migrations::{InterventionRule, KnownInterventions, ManifestMigration, NgUpdateMigration};
pub use orchestrator::{PlanDescription, PlannedStep, UpgradeOrchestrator};

#[cfg(test)]
mod tests;
