use ngstep_checkpoint::{read_active_run, CheckpointStore, ProjectLayout};
use ngstep_core::{
    Checkpoint, CompatibilityReport, ProjectManifest, UpgradeStep, UpgradeStrategy, VersionId,
};
use ngstep_resolver::{plan_within, CompatibilityResolver, ResolveOptions};
use serde::Serialize;
use tracing::debug;

/// Read-only view of how ready a project is to move to `target_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    pub project_name: Option<String>,
    pub current_version: Option<VersionId>,
    pub latest_supported: VersionId,
    pub target_version: VersionId,
    pub steps: Vec<UpgradeStep>,
    pub report: Option<CompatibilityReport>,
    pub checkpoints: Vec<Checkpoint>,
    pub active_run: Option<String>,
    pub ready: bool,
    pub issues: Vec<String>,
}

/// Builds a readiness report. Nothing under the project is written; problems
/// are collected into `issues` rather than returned as errors.
pub fn analyze_project(
    layout: &ProjectLayout,
    resolver: &CompatibilityResolver,
    target: Option<VersionId>,
) -> ReadinessReport {
    let latest_supported = resolver.table().max_version();
    let target_version = target.unwrap_or(latest_supported);
    let mut issues = Vec::new();

    let manifest = match ProjectManifest::read(&layout.manifest_path()) {
        Ok(manifest) => Some(manifest),
        Err(err) => {
            issues.push(format!("package.json could not be read: {err:#}"));
            None
        }
    };

    let current_version = manifest.as_ref().and_then(|manifest| {
        manifest
            .framework_version()
            .map_err(|err| issues.push(format!("{err:#}")))
            .ok()
    });

    // Already at the target is an empty plan, not a range error.
    let steps = current_version
        .filter(|current| *current != target_version)
        .and_then(|current| {
            plan_within(current, target_version, resolver.table())
                .map_err(|err| issues.push(err.to_string()))
                .ok()
        })
        .unwrap_or_default();

    let report = manifest.as_ref().map(|manifest| {
        for entry in manifest.malformed_entries(true) {
            issues.push(format!("dependency entry is not a version string: {entry}"));
        }
        resolver.resolve(
            manifest,
            target_version,
            &ResolveOptions {
                include_dev_dependencies: true,
                only_framework_ecosystem: false,
                update_strategy: UpgradeStrategy::default(),
                parallel: false,
            },
        )
    });
    if let Some(report) = &report {
        issues.extend(
            report
                .blockers
                .iter()
                .map(|blocker| blocker.to_error().to_string()),
        );
    }

    let checkpoints = layout
        .clone()
        .with_recorded_checkpoints_root()
        .and_then(|checkpoint_layout| CheckpointStore::new(checkpoint_layout).list())
        .unwrap_or_else(|err| {
            issues.push(format!("checkpoint index could not be read: {err:#}"));
            Vec::new()
        });

    let active_run = read_active_run(layout).unwrap_or_else(|err| {
        issues.push(format!("{err:#}"));
        None
    });
    if let Some(run_id) = &active_run {
        issues.push(format!("run {run_id} currently holds the project"));
    }

    let ready = issues.is_empty() && current_version.is_some();
    debug!(
        target = %target_version,
        steps = steps.len(),
        issues = issues.len(),
        ready,
        "analyzed project"
    );

    ReadinessReport {
        project_name: manifest
            .as_ref()
            .and_then(|manifest| manifest.name().map(str::to_string)),
        current_version,
        latest_supported,
        target_version,
        steps,
        report,
        checkpoints,
        active_run,
        ready,
        issues,
    }
}
