use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ngstep_checkpoint::ProjectLayout;
use ngstep_core::{
    CheckpointFrequency, RollbackPolicy, ThirdPartyHandling, UpgradeOptions, UpgradeStrategy,
    ValidationLevel, VersionId,
};
use ngstep_resolver::EcosystemTable;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CLEANUP_KEEP: usize = 5;

/// `.ng-upgrade/config.toml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    pub strategy: Option<UpgradeStrategy>,
    pub checkpoint_frequency: Option<CheckpointFrequency>,
    pub validation: Option<ValidationLevel>,
    pub third_party: Option<ThirdPartyHandling>,
    pub rollback_policy: Option<RollbackPolicy>,
    pub parallel: Option<bool>,
    pub backup_path: Option<PathBuf>,
    /// Prune to this many checkpoints after a successful run.
    pub retain_checkpoints: Option<usize>,
    pub cleanup_keep: Option<usize>,
    pub log_level: Option<String>,
    pub ecosystem_table: Option<PathBuf>,
}

/// Values given on the command line; each one beats the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionOverrides {
    pub strategy: Option<UpgradeStrategy>,
    pub checkpoint_frequency: Option<CheckpointFrequency>,
    pub validation: Option<ValidationLevel>,
    pub third_party: Option<ThirdPartyHandling>,
    pub rollback_policy: Option<RollbackPolicy>,
    pub parallel: Option<bool>,
    pub backup_path: Option<PathBuf>,
    pub no_backup: bool,
}

impl ProjectConfig {
    /// Reads the config at `path`; a missing file is the empty config.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read config: {}", path.display()));
            }
        };
        Self::from_toml_str(&raw)
            .with_context(|| format!("failed parsing config: {}", path.display()))
    }

    pub fn load_for(layout: &ProjectLayout) -> Result<Self> {
        Self::load(&layout.config_path())
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).context("invalid ngstep configuration")
    }

    pub fn cleanup_keep(&self) -> usize {
        self.cleanup_keep.unwrap_or(DEFAULT_CLEANUP_KEEP)
    }

    /// Strategy defaults, then this config, then `overrides`.
    pub fn upgrade_options(&self, target: VersionId, overrides: &OptionOverrides) -> UpgradeOptions {
        let strategy = overrides
            .strategy
            .or(self.strategy)
            .unwrap_or_default();
        let mut options = UpgradeOptions::for_strategy(target, strategy);

        if let Some(frequency) = overrides.checkpoint_frequency.or(self.checkpoint_frequency) {
            options.checkpoint_frequency = frequency;
        }
        if let Some(validation) = overrides.validation.or(self.validation) {
            options.validation_level = validation;
        }
        if let Some(third_party) = overrides.third_party.or(self.third_party) {
            options.third_party_handling = third_party;
        }
        if let Some(policy) = overrides.rollback_policy.or(self.rollback_policy) {
            options.rollback_policy = policy;
        }
        if let Some(parallel) = overrides.parallel.or(self.parallel) {
            options.parallel_processing = parallel;
        }
        options.backup_path = overrides
            .backup_path
            .clone()
            .or_else(|| self.backup_path.clone());
        if overrides.no_backup {
            options.checkpoint_frequency = CheckpointFrequency::None;
        }
        options
    }

    /// Layout with the configured checkpoint location applied.
    pub fn layout_for(&self, project_root: &Path) -> ProjectLayout {
        ProjectLayout::new(project_root).with_checkpoints_root(
            self.backup_path
                .as_ref()
                .map(|path| resolve_against(project_root, path)),
        )
    }

    /// The configured compatibility table, or the built-in one.
    pub fn ecosystem_table(&self, project_root: &Path) -> Result<EcosystemTable> {
        match &self.ecosystem_table {
            Some(path) => EcosystemTable::load(&resolve_against(project_root, path)),
            None => EcosystemTable::builtin(),
        }
    }
}

pub(crate) fn resolve_against(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
