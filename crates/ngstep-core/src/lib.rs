mod error;
mod manifest;
mod model;
mod options;
mod version;

pub use error::UpgradeError;
pub use manifest::{DeclaredDependency, DependencyKind, ProjectManifest, FRAMEWORK_CORE_PACKAGE};
pub use model::{
    Checkpoint, CompatibilityReport, CriticalDependency, DependencyUpdate, ManualIntervention,
    OrchestratorState, UpdateType, UpgradeResult, UpgradeStep,
};
pub use options::{
    CheckpointFrequency, RollbackPolicy, ThirdPartyHandling, UpgradeOptions, UpgradeStrategy,
    ValidationLevel,
};
pub use version::VersionId;
