use std::fmt;
use std::time::Duration;

use semver::Version;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::UpgradeError;
use crate::version::VersionId;

/// One planned version transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpgradeStep {
    pub from_version: VersionId,
    pub to_version: VersionId,
    pub ordinal: usize,
}

impl UpgradeStep {
    pub fn crosses_major_boundary(&self) -> bool {
        self.to_version.major() != self.from_version.major()
    }
}

impl fmt::Display for UpgradeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from_version, self.to_version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub version: VersionId,
    pub timestamp_unix_ms: u64,
    pub sequence: u64,
    pub description: String,
    /// Opaque handle of the stored snapshot, relative to the checkpoint root.
    pub snapshot_ref: String,
}

impl Checkpoint {
    pub fn order_key(&self) -> (u64, u64) {
        (self.timestamp_unix_ms, self.sequence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Major,
    Minor,
    Patch,
    Compatible,
    Deprecated,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Major => "major",
            Self::Minor => "minor",
            Self::Patch => "patch",
            Self::Compatible => "compatible",
            Self::Deprecated => "deprecated",
        }
    }

    pub fn is_actionable(&self) -> bool {
        !matches!(self, Self::Compatible)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyUpdate {
    pub name: String,
    pub current_version: Version,
    pub compatible_version: Option<Version>,
    /// Range to declare once updated, when it differs from `^compatible_version`.
    pub recommended_range: Option<String>,
    pub update_type: UpdateType,
    pub required: bool,
    pub dev: bool,
    /// Successor package when the dependency is replaced rather than bumped.
    pub replacement: Option<String>,
    pub notes: String,
}

impl DependencyUpdate {
    /// The range to declare after the update, if one can be written.
    pub fn target_range(&self) -> Option<String> {
        self.recommended_range.clone().or_else(|| {
            self.compatible_version
                .as_ref()
                .map(|version| format!("^{version}"))
        })
    }
}

/// A required dependency with nowhere to go on the target version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalDependency {
    pub name: String,
    pub target: VersionId,
}

impl CriticalDependency {
    pub fn to_error(&self) -> UpgradeError {
        UpgradeError::CriticalDependency {
            name: self.name.clone(),
            target: self.target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub target_version: VersionId,
    pub updates: Vec<DependencyUpdate>,
    pub deprecated: Vec<String>,
    pub warnings: Vec<String>,
    pub blockers: Vec<CriticalDependency>,
    pub total_updates: usize,
    pub critical_updates: usize,
}

impl CompatibilityReport {
    pub fn new(
        target_version: VersionId,
        mut updates: Vec<DependencyUpdate>,
        mut deprecated: Vec<String>,
        warnings: Vec<String>,
        blockers: Vec<CriticalDependency>,
    ) -> Self {
        updates.sort_by(|a, b| a.name.cmp(&b.name));
        deprecated.sort();
        deprecated.dedup();
        let total_updates = updates
            .iter()
            .filter(|update| update.update_type.is_actionable())
            .count();
        let critical_updates = updates
            .iter()
            .filter(|update| update.required && update.update_type.is_actionable())
            .count();

        Self {
            target_version,
            updates,
            deprecated,
            warnings,
            blockers,
            total_updates,
            critical_updates,
        }
    }

    pub fn actionable_updates(&self) -> impl Iterator<Item = &DependencyUpdate> {
        self.updates
            .iter()
            .filter(|update| update.update_type.is_actionable())
    }

    pub fn find(&self, name: &str) -> Option<&DependencyUpdate> {
        self.updates.iter().find(|update| update.name == name)
    }
}

/// A change the executor could not apply mechanically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualIntervention {
    pub change: String,
    pub instructions: String,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrchestratorState {
    Idle,
    Planning,
    CheckpointPending,
    Executing,
    Validating,
    Completed,
    Failed,
    RollingBack,
    RolledBack,
    Cancelled,
}

impl OrchestratorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::CheckpointPending => "checkpoint-pending",
            Self::Executing => "executing",
            Self::Validating => "validating",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RollingBack => "rolling-back",
            Self::RolledBack => "rolled-back",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::RolledBack | Self::Cancelled
        )
    }
}

/// Terminal record of one orchestrated run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeResult {
    pub run_id: String,
    pub success: bool,
    pub from_version: VersionId,
    pub to_version: VersionId,
    pub duration: Duration,
    pub completed_steps: Vec<UpgradeStep>,
    pub checkpoints: Vec<Checkpoint>,
    pub warnings: Vec<String>,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<UpgradeError>,
    pub rollback_available: bool,
    pub final_state: OrchestratorState,
}

impl UpgradeResult {
    pub fn was_cancelled(&self) -> bool {
        matches!(self.error, Some(UpgradeError::Cancelled { .. }))
    }
}

fn serialize_error<S>(error: &Option<UpgradeError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match error {
        Some(error) => serializer.serialize_some(&error.to_string()),
        None => serializer.serialize_none(),
    }
}
