use thiserror::Error;

use crate::model::UpgradeStep;
use crate::version::VersionId;

/// Failures the orchestration contract names explicitly.
///
/// Variants own plain strings so a result record can carry its error after the
/// underlying io or parse error has been rendered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpgradeError {
    #[error("invalid version range: cannot upgrade from {current} to {target}")]
    InvalidRange {
        current: VersionId,
        target: VersionId,
    },

    #[error("step {step} failed: {cause}")]
    StepExecution { step: UpgradeStep, cause: String },

    #[error("checkpoint not found: {id}")]
    CheckpointNotFound { id: String },

    #[error("checkpoint {id} failed integrity verification: {reason}")]
    CorruptSnapshot { id: String, reason: String },

    #[error("checkpoint capture before step {step} failed, no checkpoint was created: {cause}")]
    CheckpointCapture { step: UpgradeStep, cause: String },

    #[error("required dependency '{name}' has no compatible mapping to version {target}")]
    CriticalDependency { name: String, target: VersionId },

    #[error("another upgrade or rollback is in progress (run={run_id})")]
    RunInProgress { run_id: String },

    #[error("upgrade cancelled after {completed} completed step(s)")]
    Cancelled { completed: usize },

    #[error("project manifest could not be read: {cause}")]
    ManifestUnreadable { cause: String },

    #[error("rollback failed: {cause}")]
    Rollback { cause: String },

    #[error("project state storage failed: {cause}")]
    Storage { cause: String },
}
