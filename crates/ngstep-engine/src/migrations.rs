use std::path::PathBuf;
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use ngstep_core::{ManualIntervention, ProjectManifest, UpgradeStep};
use ngstep_resolver::{apply_updates, CompatibilityResolver, PackageCategory, ResolveOptions};
use serde::Deserialize;
use tracing::debug;

use crate::executor::{MigrationCapability, MigrationContext, MigrationOutcome};

const BUILTIN_INTERVENTIONS: &str = include_str!("../data/interventions.toml");

#[derive(Debug, Deserialize)]
struct InterventionFile {
    #[serde(default, rename = "intervention")]
    interventions: Vec<InterventionRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InterventionRule {
    pub version: u64,
    pub change: String,
    pub instructions: String,
    #[serde(default)]
    pub required: bool,
    pub when_dependency: Option<String>,
}

/// Reports the known breaking changes of each version that need a human.
#[derive(Debug, Clone)]
pub struct KnownInterventions {
    rules: Vec<InterventionRule>,
}

impl KnownInterventions {
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_INTERVENTIONS).context("built-in intervention table is invalid")
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        let file: InterventionFile =
            toml::from_str(input).context("failed to parse intervention table")?;
        Ok(Self {
            rules: file.interventions,
        })
    }

    pub fn rules(&self) -> &[InterventionRule] {
        &self.rules
    }
}

impl MigrationCapability for KnownInterventions {
    fn name(&self) -> &str {
        "known-interventions"
    }

    fn apply(
        &mut self,
        step: &UpgradeStep,
        context: &MigrationContext<'_>,
    ) -> Result<MigrationOutcome> {
        let manifest = ProjectManifest::read(&context.layout.manifest_path())?;
        let manual_interventions = self
            .rules
            .iter()
            .filter(|rule| rule.version == step.to_version.major())
            .filter(|rule| {
                rule.when_dependency
                    .as_deref()
                    .map_or(true, |name| manifest.dependency_range(name).is_some())
            })
            .map(|rule| ManualIntervention {
                change: rule.change.clone(),
                instructions: rule.instructions.clone(),
                required: rule.required,
            })
            .collect();

        Ok(MigrationOutcome {
            applied_changes: Vec::new(),
            manual_interventions,
        })
    }
}

/// Moves framework and tooling declarations in `package.json` to the step's
/// target version. Third-party packages are left to validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestMigration;

impl MigrationCapability for ManifestMigration {
    fn name(&self) -> &str {
        "manifest"
    }

    fn apply(
        &mut self,
        step: &UpgradeStep,
        context: &MigrationContext<'_>,
    ) -> Result<MigrationOutcome> {
        let manifest_path = context.layout.manifest_path();
        let mut manifest = ProjectManifest::read(&manifest_path)?;

        let resolver = CompatibilityResolver::new(context.table.clone());
        let mut report = resolver.resolve(
            &manifest,
            step.to_version,
            &ResolveOptions {
                include_dev_dependencies: true,
                only_framework_ecosystem: false,
                update_strategy: context.options.strategy,
                parallel: context.options.parallel_processing,
            },
        );
        let mut manual_interventions = report
            .blockers
            .iter()
            .map(|blocker| ManualIntervention {
                change: format!("{} has no release for version {}", blocker.name, blocker.target),
                instructions: format!("Remove or replace {} before continuing.", blocker.name),
                required: true,
            })
            .collect::<Vec<_>>();
        manual_interventions.extend(
            report
                .deprecated
                .iter()
                .filter(|name| !report.blockers.iter().any(|blocker| &blocker.name == *name))
                .map(|name| ManualIntervention {
                    change: format!("{name} is deprecated as of version {}", step.to_version),
                    instructions: report
                        .find(name)
                        .map(|update| update.notes.clone())
                        .unwrap_or_default(),
                    required: false,
                }),
        );

        report.updates.retain(|update| {
            context
                .table
                .rule_for(&update.name)
                .is_some_and(|rule| rule.category != PackageCategory::ThirdParty)
        });
        let applied_changes = apply_updates(&report, &mut manifest);
        if !applied_changes.is_empty() {
            manifest.write(&manifest_path)?;
        }
        debug!(step = %step, changes = applied_changes.len(), "rewrote manifest");

        Ok(MigrationOutcome {
            applied_changes,
            manual_interventions,
        })
    }
}

/// Delegates the step to `ng update` in the project root.
#[derive(Debug, Clone)]
pub struct NgUpdateMigration {
    program: PathBuf,
    extra_args: Vec<String>,
}

impl Default for NgUpdateMigration {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ng"),
            extra_args: Vec::new(),
        }
    }
}

impl NgUpdateMigration {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_extra_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.extra_args.extend(args);
        self
    }

    pub fn command_args(&self, step: &UpgradeStep) -> Vec<String> {
        let major = step.to_version.major();
        let mut args = vec![
            "update".to_string(),
            format!("@angular/core@{major}"),
            format!("@angular/cli@{major}"),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

impl MigrationCapability for NgUpdateMigration {
    fn name(&self) -> &str {
        "ng-update"
    }

    fn apply(
        &mut self,
        step: &UpgradeStep,
        context: &MigrationContext<'_>,
    ) -> Result<MigrationOutcome> {
        let args = self.command_args(step);
        let output = Command::new(&self.program)
            .args(&args)
            .current_dir(context.layout.project_root())
            .output()
            .with_context(|| format!("failed to run {}", self.program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = stderr.lines().rev().take(5).collect::<Vec<_>>();
            return Err(anyhow!(
                "{} {} exited with {}: {}",
                self.program.display(),
                args.join(" "),
                output.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            ));
        }

        Ok(MigrationOutcome {
            applied_changes: vec![format!("{} {}", self.program.display(), args.join(" "))],
            manual_interventions: Vec::new(),
        })
    }
}
