use super::*;

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::bail;
use ngstep_checkpoint::{
    claim_active_run, read_run_journal, read_run_metadata, CheckpointStore, ProjectLayout,
    RunStatus,
};
use ngstep_core::{
    CheckpointFrequency, CompatibilityReport, ManualIntervention, OrchestratorState,
    ProjectManifest, RollbackPolicy, ThirdPartyHandling, UpgradeError, UpgradeOptions,
    UpgradeStep, UpgradeStrategy, ValidationLevel, VersionId,
};
use ngstep_resolver::{CompatibilityResolver, EcosystemTable};
use tempfile::TempDir;

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent");
    }
    fs::write(path, content).expect("must write file");
}

fn read(root: &Path, relative: &str) -> Option<String> {
    fs::read_to_string(root.join(relative)).ok()
}

fn project_with(manifest: &str) -> (TempDir, ProjectLayout) {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "package.json", manifest);
    write(dir.path(), "angular.json", "{\"version\": 1}\n");
    write(dir.path(), "src/main.ts", "bootstrap();\n");
    let layout = ProjectLayout::new(dir.path());
    (dir, layout)
}

fn project(core_range: &str) -> (TempDir, ProjectLayout) {
    project_with(&format!(
        "{{\n  \"name\": \"storefront\",\n  \"dependencies\": {{\n    \"@angular/core\": \"{core_range}\"\n  }}\n}}\n"
    ))
}

fn resolver() -> CompatibilityResolver {
    CompatibilityResolver::new(EcosystemTable::builtin().expect("builtin table must load"))
}

fn options(target: u64, strategy: UpgradeStrategy) -> UpgradeOptions {
    UpgradeOptions::for_strategy(VersionId::new(target), strategy)
}

fn core_range(layout: &ProjectLayout) -> String {
    ProjectManifest::read(&layout.manifest_path())
        .expect("manifest must read")
        .dependency_range("@angular/core")
        .expect("core must be declared")
        .to_string()
}

/// Stands in for a real migration: bumps the core range and records the step.
#[derive(Clone, Default)]
struct ScriptedMigration {
    fail_at: Option<u64>,
    cancel_after: Option<(u64, CancellationToken)>,
    applied: Arc<Mutex<Vec<String>>>,
}

impl ScriptedMigration {
    fn failing_at(major: u64) -> Self {
        Self {
            fail_at: Some(major),
            ..Self::default()
        }
    }

    fn applied(&self) -> Vec<String> {
        self.applied.lock().expect("lock").clone()
    }
}

impl MigrationCapability for ScriptedMigration {
    fn name(&self) -> &str {
        "scripted"
    }

    fn apply(
        &mut self,
        step: &UpgradeStep,
        context: &MigrationContext<'_>,
    ) -> anyhow::Result<MigrationOutcome> {
        let root = context.layout.project_root();
        let major = step.to_version.major();
        if self.fail_at == Some(major) {
            write(root, "src/partial.txt", "half-migrated\n");
            bail!("schematic crashed at {major}");
        }

        let manifest_path = context.layout.manifest_path();
        let mut manifest = ProjectManifest::read(&manifest_path)?;
        manifest.set_dependency_range("@angular/core", &format!("^{major}.0.0"));
        manifest.write(&manifest_path)?;
        write(root, "src/version.txt", &format!("{major}\n"));
        self.applied.lock().expect("lock").push(step.to_string());

        if let Some((after, token)) = &self.cancel_after {
            if *after == major {
                token.cancel();
            }
        }
        Ok(MigrationOutcome {
            applied_changes: vec![format!("@angular/core@^{major}.0.0")],
            manual_interventions: Vec::new(),
        })
    }
}

/// Changes nothing, so validation sees the previous version's dependencies.
struct Noop;

impl MigrationCapability for Noop {
    fn name(&self) -> &str {
        "noop"
    }

    fn apply(
        &mut self,
        _step: &UpgradeStep,
        _context: &MigrationContext<'_>,
    ) -> anyhow::Result<MigrationOutcome> {
        Ok(MigrationOutcome::default())
    }
}

struct RecordingObserver {
    events: Vec<UpgradeEvent>,
    resolution: InterventionResolution,
    prompts: usize,
}

impl RecordingObserver {
    fn new() -> Self {
        Self::resolving(InterventionResolution::Continue)
    }

    fn resolving(resolution: InterventionResolution) -> Self {
        Self {
            events: Vec::new(),
            resolution,
            prompts: 0,
        }
    }

    fn step_kinds(&self) -> Vec<&'static str> {
        self.events
            .iter()
            .map(UpgradeEvent::kind)
            .filter(|kind| *kind != "state-changed" && *kind != "progress")
            .collect()
    }

    fn states(&self) -> Vec<OrchestratorState> {
        self.events
            .iter()
            .filter_map(|event| match event {
                UpgradeEvent::StateChanged { state } => Some(*state),
                _ => None,
            })
            .collect()
    }

    fn interventions(&self) -> Vec<(&ManualIntervention, bool)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                UpgradeEvent::ManualIntervention {
                    intervention,
                    blocking,
                    ..
                } => Some((intervention, *blocking)),
                _ => None,
            })
            .collect()
    }
}

impl UpgradeObserver for RecordingObserver {
    fn on_event(&mut self, event: &UpgradeEvent) {
        self.events.push(event.clone());
    }

    fn resolve_intervention(
        &mut self,
        _step: &UpgradeStep,
        _intervention: &ManualIntervention,
        _report: &CompatibilityReport,
    ) -> InterventionResolution {
        self.prompts += 1;
        self.resolution
    }
}

fn orchestrator(layout: &ProjectLayout, migration: impl MigrationCapability + 'static) -> UpgradeOrchestrator {
    UpgradeOrchestrator::new(
        layout.clone(),
        resolver(),
        StepExecutor::new().with_capability(migration),
    )
}

#[test]
fn balanced_run_checkpoints_before_every_major_step() {
    let (_dir, layout) = project("^12.2.0");
    let migration = ScriptedMigration::default();
    let mut orchestrator = orchestrator(&layout, migration.clone());
    let mut observer = RecordingObserver::new();

    let result =
        orchestrator.orchestrate_upgrade(&options(15, UpgradeStrategy::Balanced), &mut observer);

    assert!(result.success, "unexpected failure: {:?}", result.error);
    assert_eq!(result.final_state, OrchestratorState::Completed);
    assert_eq!(result.from_version, VersionId::new(12));
    assert_eq!(result.to_version, VersionId::new(15));
    assert_eq!(result.completed_steps.len(), 3);
    assert_eq!(
        migration.applied(),
        vec!["12 -> 13", "13 -> 14", "14 -> 15"]
    );
    let versions = result
        .checkpoints
        .iter()
        .map(|checkpoint| checkpoint.version.major())
        .collect::<Vec<_>>();
    assert_eq!(versions, vec![12, 13, 14]);
    assert!(result.rollback_available);
    assert!(result.error.is_none());

    assert_eq!(core_range(&layout), "^15.0.0");
    assert_eq!(
        CheckpointStore::new(layout.clone())
            .list()
            .expect("must list")
            .len(),
        3
    );
    assert!(!layout.active_run_path().exists());
}

#[test]
fn events_follow_step_order() {
    let (_dir, layout) = project("^12.2.0");
    let mut orchestrator = orchestrator(&layout, ScriptedMigration::default());
    let mut observer = RecordingObserver::new();

    let result =
        orchestrator.orchestrate_upgrade(&options(14, UpgradeStrategy::Balanced), &mut observer);
    assert!(result.success);

    assert_eq!(
        observer.step_kinds(),
        vec!["step-start", "step-complete", "step-start", "step-complete"]
    );
    assert_eq!(
        observer.states(),
        vec![
            OrchestratorState::Planning,
            OrchestratorState::CheckpointPending,
            OrchestratorState::Executing,
            OrchestratorState::CheckpointPending,
            OrchestratorState::Executing,
            OrchestratorState::Completed,
        ]
    );
}

#[test]
fn failed_step_rolls_back_to_latest_checkpoint() {
    let (dir, layout) = project("^12.2.0");
    let mut orchestrator = orchestrator(&layout, ScriptedMigration::failing_at(14));
    let mut observer = RecordingObserver::new();

    let result =
        orchestrator.orchestrate_upgrade(&options(15, UpgradeStrategy::Balanced), &mut observer);

    assert!(!result.success);
    assert_eq!(result.final_state, OrchestratorState::RolledBack);
    assert_eq!(result.completed_steps.len(), 1);
    assert_eq!(result.checkpoints.len(), 2);
    assert!(result.rollback_available);
    match &result.error {
        Some(UpgradeError::StepExecution { step, cause }) => {
            assert_eq!(step.ordinal, 2);
            assert!(cause.starts_with("scripted: "), "cause: {cause}");
            assert!(cause.contains("schematic crashed at 14"));
        }
        other => panic!("expected a step failure, got {other:?}"),
    }

    // Project matches the checkpoint taken before 13 -> 14.
    assert_eq!(core_range(&layout), "^13.0.0");
    assert_eq!(read(dir.path(), "src/version.txt").as_deref(), Some("13\n"));
    assert!(read(dir.path(), "src/partial.txt").is_none());

    assert_eq!(
        observer.step_kinds(),
        vec!["step-start", "step-complete", "step-start", "step-failed"]
    );
    assert!(observer.states().ends_with(&[
        OrchestratorState::Executing,
        OrchestratorState::RollingBack,
        OrchestratorState::RolledBack,
    ]));
}

#[test]
fn manual_policy_leaves_failed_step_in_place() {
    let (dir, layout) = project("^12.2.0");
    let mut orchestrator = orchestrator(&layout, ScriptedMigration::failing_at(14));
    let mut options = options(15, UpgradeStrategy::Balanced);
    options.rollback_policy = RollbackPolicy::Manual;

    let result = orchestrator.orchestrate_upgrade(&options, &mut SilentObserver);

    assert_eq!(result.final_state, OrchestratorState::Failed);
    assert!(!result.success);
    assert!(result.rollback_available);
    assert_eq!(result.checkpoints.len(), 2);
    assert!(read(dir.path(), "src/partial.txt").is_some());
    assert!(result
        .warnings
        .iter()
        .any(|warning| warning == "checkpoints were kept for an explicit rollback"));
    assert!(result
        .warnings
        .iter()
        .all(|warning| !warning.contains("ngstep checkpoints")));
}

#[test]
fn never_policy_without_checkpoints_reports_no_rollback() {
    let (_dir, layout) = project("^12.2.0");
    let mut orchestrator = orchestrator(&layout, ScriptedMigration::failing_at(13));
    let mut options = options(14, UpgradeStrategy::Progressive);
    options.rollback_policy = RollbackPolicy::Never;

    let result = orchestrator.orchestrate_upgrade(&options, &mut SilentObserver);

    assert_eq!(result.final_state, OrchestratorState::Failed);
    assert!(result.completed_steps.is_empty());
    assert!(result.checkpoints.is_empty());
    assert!(!result.rollback_available);
}

#[test]
fn auto_rollback_without_checkpoint_fails_and_says_so() {
    let (_dir, layout) = project("^12.2.0");
    let mut orchestrator = orchestrator(&layout, ScriptedMigration::failing_at(13));
    let mut options = options(14, UpgradeStrategy::Balanced);
    options.checkpoint_frequency = CheckpointFrequency::None;

    let result = orchestrator.orchestrate_upgrade(&options, &mut SilentObserver);

    assert_eq!(result.final_state, OrchestratorState::Failed);
    assert!(!result.rollback_available);
    assert!(result
        .warnings
        .iter()
        .any(|warning| warning.contains("nothing was restored")));
}

#[test]
fn checkpoint_capture_failure_stops_before_the_step() {
    let (dir, layout) = project("^12.2.0");
    // A regular file where the checkpoint directory must go.
    write(dir.path(), "blocked", "not a directory\n");
    let migration = ScriptedMigration::default();
    let mut orchestrator = orchestrator(&layout, migration.clone());
    let mut options = options(14, UpgradeStrategy::Balanced);
    options.backup_path = Some("blocked".into());
    let mut observer = RecordingObserver::new();

    let result = orchestrator.orchestrate_upgrade(&options, &mut observer);

    assert_eq!(result.final_state, OrchestratorState::Failed);
    assert!(matches!(
        result.error,
        Some(UpgradeError::CheckpointCapture { step, .. }) if step.ordinal == 1
    ));
    assert!(migration.applied().is_empty());
    assert!(result.checkpoints.is_empty());
    assert!(observer.step_kinds().is_empty());
    assert_eq!(core_range(&layout), "^12.2.0");
    assert!(!layout.checkpoints_pointer_path().exists());
}

#[test]
fn cancellation_before_start_runs_nothing() {
    let (_dir, layout) = project("^12.2.0");
    let migration = ScriptedMigration::default();
    let token = CancellationToken::new();
    let mut orchestrator = orchestrator(&layout, migration.clone()).with_cancellation(token.clone());
    token.cancel();

    let result =
        orchestrator.orchestrate_upgrade(&options(15, UpgradeStrategy::Balanced), &mut SilentObserver);

    assert!(result.was_cancelled());
    assert_eq!(result.final_state, OrchestratorState::Cancelled);
    assert_eq!(result.error, Some(UpgradeError::Cancelled { completed: 0 }));
    assert!(migration.applied().is_empty());
}

#[test]
fn cancellation_takes_effect_at_the_next_step_boundary() {
    let (dir, layout) = project("^12.2.0");
    let token = CancellationToken::new();
    let migration = ScriptedMigration {
        cancel_after: Some((13, token.clone())),
        ..ScriptedMigration::default()
    };
    let mut orchestrator = orchestrator(&layout, migration.clone()).with_cancellation(token);

    let result =
        orchestrator.orchestrate_upgrade(&options(16, UpgradeStrategy::Balanced), &mut SilentObserver);

    assert_eq!(result.final_state, OrchestratorState::Cancelled);
    assert_eq!(result.completed_steps.len(), 1);
    assert_eq!(result.error, Some(UpgradeError::Cancelled { completed: 1 }));
    // Cancellation keeps the completed work.
    assert_eq!(read(dir.path(), "src/version.txt").as_deref(), Some("13\n"));
    assert_eq!(migration.applied(), vec!["12 -> 13"]);
}

#[test]
fn advisory_interventions_are_reported_without_blocking() {
    let (_dir, layout) = project("^12.2.0");
    let executor = StepExecutor::new()
        .with_capability(ScriptedMigration::default())
        .with_capability(KnownInterventions::builtin().expect("builtin interventions"));
    let mut orchestrator = UpgradeOrchestrator::new(layout.clone(), resolver(), executor);
    let mut observer = RecordingObserver::new();

    let result =
        orchestrator.orchestrate_upgrade(&options(13, UpgradeStrategy::Balanced), &mut observer);

    assert!(result.success);
    let interventions = observer.interventions();
    assert_eq!(interventions.len(), 1);
    assert!(interventions[0].0.change.contains("Internet Explorer 11"));
    assert!(!interventions[0].1);
    assert!(result
        .warnings
        .iter()
        .any(|warning| warning.contains("Internet Explorer 11")));
    assert_eq!(
        observer.step_kinds(),
        vec!["step-start", "step-complete", "manual-intervention"]
    );
}

#[test]
fn required_intervention_fails_step_under_comprehensive_validation() {
    let (_dir, layout) = project("^12.2.0");
    let interventions = KnownInterventions::from_toml_str(
        r#"
[[intervention]]
version = 13
change = "legacy renderer removed"
instructions = "port custom renderers"
required = true
"#,
    )
    .expect("table must parse");
    let executor = StepExecutor::new()
        .with_capability(ScriptedMigration::default())
        .with_capability(interventions);
    let mut orchestrator = UpgradeOrchestrator::new(layout.clone(), resolver(), executor);
    let mut options = options(14, UpgradeStrategy::Balanced);
    options.validation_level = ValidationLevel::Comprehensive;

    let result = orchestrator.orchestrate_upgrade(&options, &mut SilentObserver);

    assert_eq!(result.final_state, OrchestratorState::RolledBack);
    assert!(result.completed_steps.is_empty());
    match &result.error {
        Some(UpgradeError::StepExecution { cause, .. }) => {
            assert_eq!(cause, "manual intervention required: legacy renderer removed");
        }
        other => panic!("expected a step failure, got {other:?}"),
    }
    assert_eq!(core_range(&layout), "^12.2.0");
}

/// Leaves a manifest that validation cannot read.
struct CorruptManifest;

impl MigrationCapability for CorruptManifest {
    fn name(&self) -> &str {
        "corrupt-manifest"
    }

    fn apply(
        &mut self,
        _step: &UpgradeStep,
        context: &MigrationContext<'_>,
    ) -> anyhow::Result<MigrationOutcome> {
        write(context.layout.project_root(), "package.json", "{ not json");
        Ok(MigrationOutcome::default())
    }
}

#[test]
fn step_failing_validation_is_not_reported_complete() {
    let (_dir, layout) = project("^12.2.0");
    let mut orchestrator = orchestrator(&layout, CorruptManifest);
    let mut options = options(13, UpgradeStrategy::Balanced);
    options.validation_level = ValidationLevel::Comprehensive;
    let mut observer = RecordingObserver::new();

    let result = orchestrator.orchestrate_upgrade(&options, &mut observer);

    assert_eq!(result.final_state, OrchestratorState::RolledBack);
    assert!(result.completed_steps.is_empty());
    assert_eq!(observer.step_kinds(), vec!["step-start", "step-failed"]);
    match &result.error {
        Some(UpgradeError::StepExecution { cause, .. }) => {
            assert!(cause.starts_with("validation failed:"), "{cause}");
        }
        other => panic!("expected a validation failure, got {other:?}"),
    }
    assert_eq!(core_range(&layout), "^12.2.0");
}

fn validating_options(third_party: ThirdPartyHandling) -> UpgradeOptions {
    let mut options = options(13, UpgradeStrategy::Balanced);
    options.validation_level = ValidationLevel::Comprehensive;
    options.checkpoint_frequency = CheckpointFrequency::None;
    options.third_party_handling = third_party;
    options
}

#[test]
fn prompt_validation_waits_for_the_observer() {
    let (_dir, layout) = project("^12.2.0");
    let mut orchestrator = orchestrator(&layout, Noop);
    let mut observer = RecordingObserver::resolving(InterventionResolution::ApplyUpdates);

    let result = orchestrator
        .orchestrate_upgrade(&validating_options(ThirdPartyHandling::Prompt), &mut observer);

    assert!(result.success, "unexpected failure: {:?}", result.error);
    assert_eq!(observer.prompts, 1);
    let interventions = observer.interventions();
    assert_eq!(interventions.len(), 1);
    assert!(interventions[0].1);
    assert!(interventions[0].0.instructions.contains("@angular/core"));
    assert_eq!(core_range(&layout), "^13.0.0");
    assert!(observer.states().contains(&OrchestratorState::Validating));
}

#[test]
fn prompt_validation_continue_records_outstanding_updates() {
    let (_dir, layout) = project("^12.2.0");
    let mut orchestrator = orchestrator(&layout, Noop);
    let mut observer = RecordingObserver::resolving(InterventionResolution::Continue);

    let result = orchestrator
        .orchestrate_upgrade(&validating_options(ThirdPartyHandling::Prompt), &mut observer);

    assert!(result.success);
    assert_eq!(core_range(&layout), "^12.2.0");
    assert!(result
        .warnings
        .iter()
        .any(|warning| warning.contains("@angular/core")));
}

#[test]
fn prompt_validation_abort_cancels_without_rollback() {
    let (_dir, layout) = project("^12.2.0");
    let mut orchestrator = orchestrator(&layout, Noop);
    let mut observer = RecordingObserver::resolving(InterventionResolution::Abort);

    let result = orchestrator
        .orchestrate_upgrade(&validating_options(ThirdPartyHandling::Prompt), &mut observer);

    assert_eq!(result.final_state, OrchestratorState::Cancelled);
    assert_eq!(result.error, Some(UpgradeError::Cancelled { completed: 1 }));
    assert!(!observer.states().contains(&OrchestratorState::RollingBack));
}

#[test]
fn auto_validation_applies_updates_without_prompting() {
    let (_dir, layout) = project("^12.2.0");
    let mut orchestrator = orchestrator(&layout, Noop);
    let mut observer = RecordingObserver::resolving(InterventionResolution::Abort);

    let result =
        orchestrator.orchestrate_upgrade(&validating_options(ThirdPartyHandling::Auto), &mut observer);

    assert!(result.success);
    assert_eq!(observer.prompts, 0);
    assert!(observer.interventions().is_empty());
    assert_eq!(core_range(&layout), "^13.0.0");
}

#[test]
fn skip_validation_only_warns() {
    let (_dir, layout) = project("^12.2.0");
    let mut orchestrator = orchestrator(&layout, Noop);
    let mut observer = RecordingObserver::resolving(InterventionResolution::Abort);

    let result =
        orchestrator.orchestrate_upgrade(&validating_options(ThirdPartyHandling::Skip), &mut observer);

    assert!(result.success);
    assert_eq!(observer.prompts, 0);
    assert_eq!(core_range(&layout), "^12.2.0");
    assert!(!result.warnings.is_empty());
}

#[test]
fn describe_plan_reads_without_side_effects() {
    let (dir, layout) = project("^12.2.0");
    let migration = ScriptedMigration::default();
    let orchestrator = orchestrator(&layout, migration.clone());

    let plan = orchestrator
        .describe_plan(&options(15, UpgradeStrategy::Balanced))
        .expect("must describe");

    assert_eq!(plan.current_version, VersionId::new(12));
    assert_eq!(plan.steps.len(), 3);
    assert!(plan.steps.iter().all(|planned| planned.checkpoint));
    assert_eq!(
        plan.steps
            .iter()
            .map(|planned| planned.report.target_version.major())
            .collect::<Vec<_>>(),
        vec![13, 14, 15]
    );
    assert!(migration.applied().is_empty());
    assert!(!dir.path().join(".ng-upgrade").exists());
    assert_eq!(core_range(&layout), "^12.2.0");

    let progressive = orchestrator
        .describe_plan(&options(15, UpgradeStrategy::Progressive))
        .expect("must describe");
    assert!(progressive.steps.iter().all(|planned| !planned.checkpoint));
}

#[test]
fn describe_plan_rejects_unsupported_targets() {
    let (_dir, layout) = project("^12.2.0");
    let orchestrator = orchestrator(&layout, Noop);

    let err = orchestrator
        .describe_plan(&options(21, UpgradeStrategy::Balanced))
        .expect_err("must reject");
    assert!(matches!(err, UpgradeError::InvalidRange { .. }));

    let err = orchestrator
        .describe_plan(&options(12, UpgradeStrategy::Balanced))
        .expect_err("must reject");
    assert_eq!(
        err,
        UpgradeError::InvalidRange {
            current: VersionId::new(12),
            target: VersionId::new(12),
        }
    );
}

#[test]
fn invalid_range_fails_the_run_and_releases_the_project() {
    let (_dir, layout) = project("^15.0.0");
    let mut orchestrator = orchestrator(&layout, Noop);

    let result =
        orchestrator.orchestrate_upgrade(&options(14, UpgradeStrategy::Balanced), &mut SilentObserver);

    assert_eq!(result.final_state, OrchestratorState::Failed);
    assert!(matches!(result.error, Some(UpgradeError::InvalidRange { .. })));
    assert!(!layout.active_run_path().exists());
}

#[test]
fn missing_manifest_is_reported_as_unreadable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = ProjectLayout::new(dir.path());
    let mut orchestrator = orchestrator(&layout, Noop);

    let result =
        orchestrator.orchestrate_upgrade(&options(14, UpgradeStrategy::Balanced), &mut SilentObserver);

    assert!(matches!(
        result.error,
        Some(UpgradeError::ManifestUnreadable { .. })
    ));
    assert!(matches!(
        orchestrator.current_version(),
        Err(UpgradeError::ManifestUnreadable { .. })
    ));
}

#[test]
fn concurrent_runs_are_refused() {
    let (_dir, layout) = project("^12.2.0");
    let _held = claim_active_run(&layout, "run-elsewhere").expect("must claim");
    let migration = ScriptedMigration::default();
    let mut orchestrator = orchestrator(&layout, migration.clone());

    let result =
        orchestrator.orchestrate_upgrade(&options(14, UpgradeStrategy::Balanced), &mut SilentObserver);

    assert_eq!(result.final_state, OrchestratorState::Failed);
    assert_eq!(
        result.error,
        Some(UpgradeError::RunInProgress {
            run_id: "run-elsewhere".to_string()
        })
    );
    assert!(migration.applied().is_empty());
    assert!(layout.active_run_path().exists());

    let err = orchestrator
        .rollback_to_checkpoint("cp-1-1")
        .expect_err("must refuse");
    assert!(matches!(
        err.downcast_ref::<UpgradeError>(),
        Some(UpgradeError::RunInProgress { .. })
    ));
}

#[test]
fn run_metadata_and_journal_record_the_run() {
    let (_dir, layout) = project("^12.2.0");
    let mut orchestrator = orchestrator(&layout, ScriptedMigration::default());

    let result =
        orchestrator.orchestrate_upgrade(&options(13, UpgradeStrategy::Balanced), &mut SilentObserver);

    let metadata = read_run_metadata(&layout, &result.run_id)
        .expect("must read")
        .expect("metadata must exist");
    assert_eq!(metadata.status, RunStatus::Completed);
    assert_eq!(metadata.operation, "upgrade");

    let states = read_run_journal(&layout, &result.run_id)
        .expect("must read journal")
        .into_iter()
        .map(|entry| entry.state)
        .collect::<Vec<_>>();
    assert_eq!(states.first().map(String::as_str), Some("planning"));
    assert_eq!(states.last().map(String::as_str), Some("completed"));
    assert!(states.iter().any(|state| state == "checkpoint-created"));
    assert!(states.iter().any(|state| state == "step-complete"));
}

#[test]
fn explicit_rollback_discards_newer_checkpoints() {
    let (dir, layout) = project("^12.2.0");
    let mut orchestrator = orchestrator(&layout, ScriptedMigration::default());
    let result =
        orchestrator.orchestrate_upgrade(&options(15, UpgradeStrategy::Balanced), &mut SilentObserver);
    assert!(result.success);

    let first = result.checkpoints[0].clone();
    let outcome = orchestrator
        .rollback_to_checkpoint(&first.id)
        .expect("must roll back");

    assert_eq!(outcome.restored, first);
    assert_eq!(outcome.discarded.len(), 2);
    assert_eq!(core_range(&layout), "^12.2.0");
    assert!(read(dir.path(), "src/version.txt").is_none());
    assert_eq!(
        orchestrator.store().expect("store").list().expect("must list"),
        vec![first]
    );
    assert!(!layout.active_run_path().exists());
}

#[test]
fn explicit_rollback_finds_checkpoints_under_a_run_backup_path() {
    let (dir, layout) = project("^12.2.0");
    let backups = tempfile::tempdir().expect("tempdir");
    let mut orchestrator = orchestrator(&layout, ScriptedMigration::default());
    let mut options = options(14, UpgradeStrategy::Balanced);
    options.backup_path = Some(backups.path().join("ngstep"));

    let result = orchestrator.orchestrate_upgrade(&options, &mut SilentObserver);
    assert!(result.success, "unexpected failure: {:?}", result.error);
    assert!(result.rollback_available);
    assert!(!layout.checkpoints_dir().exists());
    assert!(backups.path().join("ngstep").join("index.json").is_file());

    // A fresh orchestrator knows nothing about the run's options.
    let later = UpgradeOrchestrator::new(layout.clone(), resolver(), StepExecutor::new());
    assert_eq!(
        later.store().expect("store").list().expect("must list"),
        result.checkpoints
    );
    let outcome = later
        .rollback_to_checkpoint(&result.checkpoints[0].id)
        .expect("must roll back");
    assert_eq!(outcome.discarded.len(), 1);
    assert_eq!(core_range(&layout), "^12.2.0");
    assert!(read(dir.path(), "src/version.txt").is_none());

    let report = analyze_project(&layout, &resolver(), None);
    assert_eq!(report.checkpoints.len(), 1);
}

#[test]
fn explicit_rollback_of_unknown_checkpoint_is_not_found() {
    let (_dir, layout) = project("^12.2.0");
    let orchestrator = orchestrator(&layout, Noop);

    let err = orchestrator
        .rollback_to_checkpoint("cp-404-1")
        .expect_err("must fail");
    assert_eq!(
        err.downcast_ref::<UpgradeError>(),
        Some(&UpgradeError::CheckpointNotFound {
            id: "cp-404-1".to_string()
        })
    );
    assert!(!layout.active_run_path().exists());
}

#[test]
fn retention_prunes_after_a_successful_run() {
    let (_dir, layout) = project("^12.2.0");
    let mut orchestrator =
        orchestrator(&layout, ScriptedMigration::default()).with_retention(Some(1));

    let result =
        orchestrator.orchestrate_upgrade(&options(15, UpgradeStrategy::Balanced), &mut SilentObserver);

    assert!(result.success);
    let stored = orchestrator.store().expect("store").list().expect("must list");
    assert_eq!(stored.len(), 1);
    assert_eq!(result.checkpoints, stored);
    assert_eq!(stored[0].version, VersionId::new(14));
}

#[test]
fn manual_checkpoints_and_cleanup() {
    let (_dir, layout) = project("^14.1.0");
    let orchestrator = orchestrator(&layout, Noop);

    for label in ["one", "two", "three"] {
        let checkpoint = orchestrator.create_checkpoint(label).expect("must create");
        assert_eq!(checkpoint.version, VersionId::new(14));
        assert_eq!(checkpoint.description, label);
    }
    let removed = orchestrator.cleanup_checkpoints(1).expect("must prune");
    assert_eq!(
        removed
            .iter()
            .map(|checkpoint| checkpoint.description.as_str())
            .collect::<Vec<_>>(),
        vec!["one", "two"]
    );
    assert_eq!(orchestrator.store().expect("store").list().expect("must list").len(), 1);
}

#[test]
fn executor_names_the_failing_capability() {
    let (_dir, layout) = project("^12.2.0");
    let options = options(13, UpgradeStrategy::Balanced);
    let table = EcosystemTable::builtin().expect("builtin table");
    let context = MigrationContext {
        layout: &layout,
        options: &options,
        table: &table,
    };
    let step = UpgradeStep {
        from_version: VersionId::new(12),
        to_version: VersionId::new(13),
        ordinal: 1,
    };
    let mut executor = StepExecutor::new()
        .with_capability(Noop)
        .with_capability(ScriptedMigration::failing_at(13));
    assert_eq!(executor.capability_names(), vec!["noop", "scripted"]);

    let err = executor.execute(&step, &context).expect_err("must fail");
    assert_eq!(
        err,
        UpgradeError::StepExecution {
            step,
            cause: "scripted: schematic crashed at 13".to_string(),
        }
    );
}

#[test]
fn manifest_migration_moves_framework_and_tooling_only() {
    let (_dir, layout) = project_with(
        r#"{
  "name": "storefront",
  "dependencies": {
    "@angular/common": "^12.2.0",
    "@angular/core": "^12.2.0",
    "@ngrx/store": "^12.5.1",
    "rxjs": "~6.6.0"
  },
  "devDependencies": {
    "@angular/cli": "~12.2.3"
  }
}
"#,
    );
    let options = options(13, UpgradeStrategy::Balanced);
    let table = EcosystemTable::builtin().expect("builtin table");
    let context = MigrationContext {
        layout: &layout,
        options: &options,
        table: &table,
    };
    let step = UpgradeStep {
        from_version: VersionId::new(12),
        to_version: VersionId::new(13),
        ordinal: 1,
    };

    let outcome = ManifestMigration
        .apply(&step, &context)
        .expect("must migrate");

    let manifest = ProjectManifest::read(&layout.manifest_path()).expect("must read");
    assert_eq!(manifest.dependency_range("@angular/core"), Some("^13.0.0"));
    assert_eq!(manifest.dependency_range("@angular/common"), Some("^13.0.0"));
    assert_eq!(manifest.dependency_range("@angular/cli"), Some("^13.0.0"));
    assert_eq!(manifest.dependency_range("@ngrx/store"), Some("^12.5.1"));
    assert_eq!(manifest.dependency_range("rxjs"), Some("~6.6.0"));
    assert_eq!(outcome.applied_changes.len(), 3);
    assert!(outcome.manual_interventions.is_empty());
}

#[test]
fn manifest_migration_reports_deprecated_packages() {
    let (_dir, layout) = project_with(
        r#"{
  "dependencies": {
    "@angular/core": "^15.2.0",
    "@angular/flex-layout": "^15.0.0-beta.42"
  }
}
"#,
    );
    let options = options(16, UpgradeStrategy::Balanced);
    let table = EcosystemTable::builtin().expect("builtin table");
    let context = MigrationContext {
        layout: &layout,
        options: &options,
        table: &table,
    };
    let step = UpgradeStep {
        from_version: VersionId::new(15),
        to_version: VersionId::new(16),
        ordinal: 1,
    };

    let outcome = ManifestMigration
        .apply(&step, &context)
        .expect("must migrate");

    assert_eq!(outcome.manual_interventions.len(), 1);
    let advisory = &outcome.manual_interventions[0];
    assert!(!advisory.required);
    assert!(advisory.change.contains("@angular/flex-layout"));
    assert!(advisory.instructions.contains("flexbox"));
}

#[test]
fn known_interventions_filter_by_version_and_dependency() {
    let (_dir, layout) = project_with(
        r#"{
  "dependencies": { "@angular/core": "^12.2.0" },
  "devDependencies": { "tslint": "~6.1.0" }
}
"#,
    );
    let options = options(13, UpgradeStrategy::Balanced);
    let table = EcosystemTable::builtin().expect("builtin table");
    let context = MigrationContext {
        layout: &layout,
        options: &options,
        table: &table,
    };
    let mut interventions = KnownInterventions::builtin().expect("builtin interventions");
    let step = |from: u64| UpgradeStep {
        from_version: VersionId::new(from),
        to_version: VersionId::new(from + 1),
        ordinal: 1,
    };

    let at_13 = interventions.apply(&step(12), &context).expect("must apply");
    assert_eq!(at_13.manual_interventions.len(), 2);
    assert!(at_13.applied_changes.is_empty());

    // flex-layout is not declared, so only the unconditional 16 entry applies.
    let at_16 = interventions.apply(&step(15), &context).expect("must apply");
    assert_eq!(at_16.manual_interventions.len(), 1);
    assert!(!at_16.manual_interventions[0].required);

    for major in 13..=20 {
        assert!(
            interventions.rules().iter().any(|rule| rule.version == major),
            "no intervention entry for {major}"
        );
    }
}

#[test]
fn ng_update_arguments_target_the_step() {
    let migration =
        NgUpdateMigration::default().with_extra_args(["--force".to_string()]);
    let step = UpgradeStep {
        from_version: VersionId::new(13),
        to_version: VersionId::new(14),
        ordinal: 2,
    };
    assert_eq!(
        migration.command_args(&step),
        vec!["update", "@angular/core@14", "@angular/cli@14", "--force"]
    );
    assert_eq!(migration.name(), "ng-update");
}

#[test]
fn config_layers_over_strategy_defaults_and_flags_win() {
    let config = ProjectConfig::from_toml_str(
        r#"
strategy = "conservative"
validation = "basic"
third_party = "skip"
backup_path = "../backups"
retain_checkpoints = 4
"#,
    )
    .expect("config must parse");

    let options = config.upgrade_options(VersionId::new(16), &OptionOverrides::default());
    assert_eq!(options.strategy, UpgradeStrategy::Conservative);
    assert_eq!(options.checkpoint_frequency, CheckpointFrequency::EveryStep);
    assert_eq!(options.validation_level, ValidationLevel::Basic);
    assert_eq!(options.third_party_handling, ThirdPartyHandling::Skip);
    assert_eq!(options.rollback_policy, RollbackPolicy::AutoOnFailure);
    assert_eq!(options.backup_path, Some("../backups".into()));
    assert_eq!(config.cleanup_keep(), DEFAULT_CLEANUP_KEEP);

    let overrides = OptionOverrides {
        strategy: Some(UpgradeStrategy::Progressive),
        validation: Some(ValidationLevel::Comprehensive),
        no_backup: true,
        ..OptionOverrides::default()
    };
    let options = config.upgrade_options(VersionId::new(16), &overrides);
    assert_eq!(options.strategy, UpgradeStrategy::Progressive);
    assert_eq!(options.validation_level, ValidationLevel::Comprehensive);
    assert_eq!(options.checkpoint_frequency, CheckpointFrequency::None);
    // The config's rollback policy is unset, so the progressive default holds.
    assert_eq!(options.rollback_policy, RollbackPolicy::Manual);

    let layout = config.layout_for(Path::new("/work/app"));
    assert_eq!(
        layout.checkpoints_dir(),
        Path::new("/work/app").join("../backups")
    );
}

#[test]
fn config_rejects_unknown_keys_and_tolerates_absence() {
    let err = ProjectConfig::from_toml_str("stratgy = \"balanced\"\n").expect_err("must reject");
    assert!(format!("{err:#}").contains("stratgy"));

    let dir = tempfile::tempdir().expect("tempdir");
    let layout = ProjectLayout::new(dir.path());
    assert_eq!(
        ProjectConfig::load_for(&layout).expect("must load"),
        ProjectConfig::default()
    );

    write(dir.path(), ".ng-upgrade/config.toml", "cleanup_keep = 2\n");
    let config = ProjectConfig::load_for(&layout).expect("must load");
    assert_eq!(config.cleanup_keep(), 2);
    assert!(config.ecosystem_table(dir.path()).is_ok());
}

#[test]
fn analyze_reports_a_ready_project() {
    let (_dir, layout) = project("^12.2.0");

    let readiness = analyze_project(&layout, &resolver(), None);

    assert!(readiness.ready, "issues: {:?}", readiness.issues);
    assert_eq!(readiness.project_name.as_deref(), Some("storefront"));
    assert_eq!(readiness.current_version, Some(VersionId::new(12)));
    assert_eq!(readiness.latest_supported, VersionId::new(20));
    assert_eq!(readiness.target_version, VersionId::new(20));
    assert_eq!(readiness.steps.len(), 8);
    assert!(readiness.report.is_some());
    assert!(readiness.checkpoints.is_empty());
    assert!(!layout.state_dir().exists());
}

#[test]
fn analyze_flags_active_runs_and_missing_manifests() {
    let (_dir, layout) = project("^12.2.0");
    let _held = claim_active_run(&layout, "run-elsewhere").expect("must claim");

    let readiness = analyze_project(&layout, &resolver(), Some(VersionId::new(14)));
    assert!(!readiness.ready);
    assert_eq!(readiness.active_run.as_deref(), Some("run-elsewhere"));
    assert_eq!(readiness.steps.len(), 2);

    let empty = tempfile::tempdir().expect("tempdir");
    let readiness = analyze_project(&ProjectLayout::new(empty.path()), &resolver(), None);
    assert!(!readiness.ready);
    assert!(readiness.current_version.is_none());
    assert!(readiness.report.is_none());
    assert!(readiness.steps.is_empty());
}

#[test]
fn analyze_treats_the_target_version_as_up_to_date() {
    let (_dir, layout) = project("^20.0.0");

    let readiness = analyze_project(&layout, &resolver(), None);

    assert!(readiness.ready, "issues: {:?}", readiness.issues);
    assert!(readiness.steps.is_empty());
}
