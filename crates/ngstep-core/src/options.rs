use std::path::PathBuf;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::model::UpgradeStep;
use crate::version::VersionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpgradeStrategy {
    Conservative,
    #[default]
    Balanced,
    Progressive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckpointFrequency {
    EveryStep,
    MajorVersions,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationLevel {
    Basic,
    Comprehensive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThirdPartyHandling {
    Auto,
    Prompt,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackPolicy {
    AutoOnFailure,
    Manual,
    Never,
}

/// Settings for one orchestrated run. Not modified once the run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeOptions {
    pub target_version: VersionId,
    pub strategy: UpgradeStrategy,
    pub checkpoint_frequency: CheckpointFrequency,
    pub validation_level: ValidationLevel,
    pub third_party_handling: ThirdPartyHandling,
    pub rollback_policy: RollbackPolicy,
    pub parallel_processing: bool,
    pub backup_path: Option<PathBuf>,
}

impl UpgradeOptions {
    pub fn for_strategy(target_version: VersionId, strategy: UpgradeStrategy) -> Self {
        let (checkpoint_frequency, validation_level, third_party_handling, rollback_policy) =
            match strategy {
                UpgradeStrategy::Conservative => (
                    CheckpointFrequency::EveryStep,
                    ValidationLevel::Comprehensive,
                    ThirdPartyHandling::Prompt,
                    RollbackPolicy::AutoOnFailure,
                ),
                UpgradeStrategy::Balanced => (
                    CheckpointFrequency::MajorVersions,
                    ValidationLevel::Basic,
                    ThirdPartyHandling::Auto,
                    RollbackPolicy::AutoOnFailure,
                ),
                UpgradeStrategy::Progressive => (
                    CheckpointFrequency::None,
                    ValidationLevel::Basic,
                    ThirdPartyHandling::Skip,
                    RollbackPolicy::Manual,
                ),
            };

        Self {
            target_version,
            strategy,
            checkpoint_frequency,
            validation_level,
            third_party_handling,
            rollback_policy,
            parallel_processing: false,
            backup_path: None,
        }
    }
}

impl UpgradeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Balanced => "balanced",
            Self::Progressive => "progressive",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "conservative" => Ok(Self::Conservative),
            "balanced" => Ok(Self::Balanced),
            "progressive" => Ok(Self::Progressive),
            _ => Err(anyhow!("invalid upgrade strategy: {value}")),
        }
    }
}

impl CheckpointFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EveryStep => "every-step",
            Self::MajorVersions => "major-versions",
            Self::None => "none",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "every-step" => Ok(Self::EveryStep),
            "major-versions" => Ok(Self::MajorVersions),
            "none" => Ok(Self::None),
            _ => Err(anyhow!("invalid checkpoint frequency: {value}")),
        }
    }

    /// Whether a checkpoint must be captured before `step` runs.
    ///
    /// `MajorVersions` checkpoints before any step whose target crosses a
    /// major boundary. Planned steps are one major apart, so today this is
    /// every step; the distinction only matters for finer-grained plans.
    pub fn applies_to(&self, step: &UpgradeStep) -> bool {
        match self {
            Self::EveryStep => true,
            Self::MajorVersions => step.crosses_major_boundary(),
            Self::None => false,
        }
    }
}

impl ValidationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Comprehensive => "comprehensive",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "basic" => Ok(Self::Basic),
            "comprehensive" => Ok(Self::Comprehensive),
            _ => Err(anyhow!("invalid validation level: {value}")),
        }
    }
}

impl ThirdPartyHandling {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Prompt => "prompt",
            Self::Skip => "skip",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "auto" => Ok(Self::Auto),
            "prompt" => Ok(Self::Prompt),
            "skip" => Ok(Self::Skip),
            _ => Err(anyhow!("invalid third-party handling: {value}")),
        }
    }
}

impl RollbackPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoOnFailure => "auto-on-failure",
            Self::Manual => "manual",
            Self::Never => "never",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "auto-on-failure" => Ok(Self::AutoOnFailure),
            "manual" => Ok(Self::Manual),
            "never" => Ok(Self::Never),
            _ => Err(anyhow!("invalid rollback policy: {value}")),
        }
    }
}
