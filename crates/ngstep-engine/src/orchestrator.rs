use std::time::Instant;

use anyhow::Result;
use ngstep_checkpoint::{
    claim_active_run, new_run_id, record_checkpoints_root, CheckpointStore, ProjectLayout,
    RestoreOutcome, RunMetadata, RunStatus,
};
use ngstep_core::{
    Checkpoint, CompatibilityReport, ManualIntervention, OrchestratorState, ProjectManifest,
    RollbackPolicy, ThirdPartyHandling, UpgradeError, UpgradeOptions, UpgradeResult, UpgradeStep,
    ValidationLevel, VersionId,
};
use ngstep_resolver::{apply_updates, plan_within, CompatibilityResolver, ResolveOptions};
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::config::resolve_against;
use crate::events::{InterventionResolution, UpgradeEvent, UpgradeObserver};
use crate::executor::{MigrationContext, StepExecutor};
use crate::journal::RunJournal;

/// A step as a dry run would execute it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    pub step: UpgradeStep,
    pub checkpoint: bool,
    pub report: CompatibilityReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanDescription {
    pub current_version: VersionId,
    pub target_version: VersionId,
    pub options: UpgradeOptions,
    pub steps: Vec<PlannedStep>,
    pub warnings: Vec<String>,
}

enum StepHalt {
    Capture(UpgradeError),
    Failed(UpgradeError),
    Aborted,
}

/// Mutable record of one run, threaded through every phase.
struct RunRecord {
    run_id: String,
    started: Instant,
    state: OrchestratorState,
    from_version: VersionId,
    to_version: VersionId,
    completed_steps: Vec<UpgradeStep>,
    checkpoints: Vec<Checkpoint>,
    warnings: Vec<String>,
}

impl RunRecord {
    fn new(run_id: String, from_version: VersionId, to_version: VersionId) -> Self {
        Self {
            run_id,
            started: Instant::now(),
            state: OrchestratorState::Idle,
            from_version,
            to_version,
            completed_steps: Vec::new(),
            checkpoints: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn enter(
        &mut self,
        state: OrchestratorState,
        step: Option<&UpgradeStep>,
        journal: Option<&mut RunJournal<'_>>,
        observer: &mut dyn UpgradeObserver,
    ) {
        debug!(
            run_id = %self.run_id,
            from = self.state.as_str(),
            to = state.as_str(),
            step = ?step,
            "state transition"
        );
        self.state = state;
        if let Some(journal) = journal {
            journal.record(state.as_str(), step, None);
        }
        observer.on_event(&UpgradeEvent::StateChanged { state });
    }

    fn into_result(self, error: Option<UpgradeError>) -> UpgradeResult {
        UpgradeResult {
            success: self.state == OrchestratorState::Completed,
            rollback_available: !self.checkpoints.is_empty(),
            run_id: self.run_id,
            from_version: self.from_version,
            to_version: self.to_version,
            duration: self.started.elapsed(),
            completed_steps: self.completed_steps,
            checkpoints: self.checkpoints,
            warnings: self.warnings,
            error,
            final_state: self.state,
        }
    }
}

/// Drives a project through a planned sequence of version steps.
///
/// Steps run strictly in order. Before each step the configured checkpoint is
/// captured; a failed capture ends the run before the step starts. A failed
/// step is handled by the run's rollback policy.
#[derive(Debug)]
pub struct UpgradeOrchestrator {
    layout: ProjectLayout,
    resolver: CompatibilityResolver,
    executor: StepExecutor,
    cancellation: CancellationToken,
    retain_checkpoints: Option<usize>,
}

impl UpgradeOrchestrator {
    pub fn new(
        layout: ProjectLayout,
        resolver: CompatibilityResolver,
        executor: StepExecutor,
    ) -> Self {
        Self {
            layout,
            resolver,
            executor,
            cancellation: CancellationToken::new(),
            retain_checkpoints: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Prune the store to `keep` checkpoints after every successful run.
    pub fn with_retention(mut self, keep: Option<usize>) -> Self {
        self.retain_checkpoints = keep;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn resolver(&self) -> &CompatibilityResolver {
        &self.resolver
    }

    /// The store holding the most recent run's checkpoints, which may live
    /// under a per-run `backup_path`.
    pub fn store(&self) -> Result<CheckpointStore> {
        Ok(CheckpointStore::new(
            self.layout.clone().with_recorded_checkpoints_root()?,
        ))
    }

    pub fn read_manifest(&self) -> Result<ProjectManifest, UpgradeError> {
        ProjectManifest::read(&self.layout.manifest_path()).map_err(|err| {
            UpgradeError::ManifestUnreadable {
                cause: format!("{err:#}"),
            }
        })
    }

    pub fn current_version(&self) -> Result<VersionId, UpgradeError> {
        framework_version(&self.read_manifest()?)
    }

    /// The plan and a per-step compatibility preview. Reads the manifest only.
    pub fn describe_plan(&self, options: &UpgradeOptions) -> Result<PlanDescription, UpgradeError> {
        let manifest = self.read_manifest()?;
        let current_version = framework_version(&manifest)?;
        let steps = plan_within(current_version, options.target_version, self.resolver.table())?;

        let resolve = resolve_options(options);
        let steps = steps
            .into_iter()
            .map(|step| PlannedStep {
                checkpoint: options.checkpoint_frequency.applies_to(&step),
                report: self.resolver.resolve(&manifest, step.to_version, &resolve),
                step,
            })
            .collect::<Vec<_>>();
        let warnings = steps
            .last()
            .map(|planned| blocking_warnings(&planned.report))
            .unwrap_or_default();

        Ok(PlanDescription {
            current_version,
            target_version: options.target_version,
            options: options.clone(),
            steps,
            warnings,
        })
    }

    pub fn orchestrate_upgrade(
        &mut self,
        options: &UpgradeOptions,
        observer: &mut dyn UpgradeObserver,
    ) -> UpgradeResult {
        let layout = self.run_layout(options);
        let current = self.current_version().ok();
        let mut run = RunRecord::new(
            new_run_id(),
            current.unwrap_or(options.target_version),
            options.target_version,
        );
        info!(
            run_id = %run.run_id,
            target = %options.target_version,
            strategy = options.strategy.as_str(),
            "starting upgrade run"
        );

        let active = match claim_active_run(&layout, &run.run_id) {
            Ok(active) => active,
            Err(err) => {
                let error = into_upgrade_error(err);
                warn!(run_id = %run.run_id, error = %error, "could not claim project");
                run.enter(OrchestratorState::Failed, None, None, observer);
                return run.into_result(Some(error));
            }
        };

        let mut metadata = RunMetadata::new(&run.run_id, "upgrade");
        metadata.from_version = current;
        metadata.to_version = Some(options.target_version);
        let mut journal = RunJournal::start(&layout, &metadata);
        run.enter(
            OrchestratorState::Planning,
            None,
            Some(&mut journal),
            observer,
        );

        let (final_state, error) = match self.prepare(options) {
            Ok((current, steps, warnings)) => {
                run.from_version = current;
                run.warnings.extend(warnings);
                observer.on_event(&UpgradeEvent::Progress {
                    message: format!(
                        "planned {} step(s) from {} to {}",
                        steps.len(),
                        current,
                        options.target_version
                    ),
                });
                journal.status(RunStatus::Applying);
                self.execute_plan(&layout, options, &steps, &mut run, &mut journal, observer)
            }
            Err(error) => (OrchestratorState::Failed, Some(error)),
        };

        if final_state == OrchestratorState::Completed {
            self.apply_retention(&layout, &mut run);
        }
        run.enter(final_state, None, None, observer);
        journal.status(match final_state {
            OrchestratorState::Completed => RunStatus::Completed,
            OrchestratorState::RolledBack => RunStatus::RolledBack,
            OrchestratorState::Cancelled => RunStatus::Cancelled,
            _ => RunStatus::Failed,
        });
        if let Err(err) = active.release() {
            warn!(run_id = %run.run_id, error = %format!("{err:#}"), "failed to release project");
        }

        info!(
            run_id = %run.run_id,
            state = final_state.as_str(),
            completed = run.completed_steps.len(),
            checkpoints = run.checkpoints.len(),
            "upgrade run finished"
        );
        run.into_result(error)
    }

    /// Restores checkpoint `id` and discards every newer checkpoint.
    /// Refused while a run holds the project.
    pub fn rollback_to_checkpoint(&self, id: &str) -> Result<RestoreOutcome> {
        let run_id = new_run_id();
        let active = claim_active_run(&self.layout, &run_id)?;
        let mut journal = RunJournal::start(&self.layout, &RunMetadata::new(&run_id, "rollback"));
        journal.record(
            OrchestratorState::RollingBack.as_str(),
            None,
            Some(id.to_string()),
        );

        let outcome = self
            .store()
            .and_then(|store| store.restore_and_discard_later(id));
        match &outcome {
            Ok(outcome) => {
                info!(
                    checkpoint = id,
                    discarded = outcome.discarded.len(),
                    "rolled back to checkpoint"
                );
                journal.status(RunStatus::RolledBack);
            }
            Err(err) => {
                warn!(checkpoint = id, error = %format!("{err:#}"), "rollback failed");
                journal.status(RunStatus::Failed);
            }
        }

        let released = active.release();
        let outcome = outcome?;
        released?;
        Ok(outcome)
    }

    /// Captures a checkpoint of the current project outside any run.
    pub fn create_checkpoint(&self, description: &str) -> Result<Checkpoint> {
        let active = claim_active_run(&self.layout, &new_run_id())?;
        let created = self
            .current_version()
            .map_err(anyhow::Error::from)
            .and_then(|version| self.store()?.create(version, description));
        active.release()?;
        created
    }

    pub fn cleanup_checkpoints(&self, keep: usize) -> Result<Vec<Checkpoint>> {
        let active = claim_active_run(&self.layout, &new_run_id())?;
        let pruned = self.store().and_then(|store| store.prune(keep));
        active.release()?;
        pruned
    }

    fn run_layout(&self, options: &UpgradeOptions) -> ProjectLayout {
        match &options.backup_path {
            Some(path) => self.layout.clone().with_checkpoints_root(Some(resolve_against(
                self.layout.project_root(),
                path,
            ))),
            None => self.layout.clone(),
        }
    }

    fn prepare(
        &self,
        options: &UpgradeOptions,
    ) -> Result<(VersionId, Vec<UpgradeStep>, Vec<String>), UpgradeError> {
        let manifest = self.read_manifest()?;
        let current = framework_version(&manifest)?;
        let steps = plan_within(current, options.target_version, self.resolver.table())?;
        let report = self.resolver.resolve(
            &manifest,
            options.target_version,
            &resolve_options(options),
        );
        Ok((current, steps, blocking_warnings(&report)))
    }

    fn execute_plan(
        &mut self,
        layout: &ProjectLayout,
        options: &UpgradeOptions,
        steps: &[UpgradeStep],
        run: &mut RunRecord,
        journal: &mut RunJournal<'_>,
        observer: &mut dyn UpgradeObserver,
    ) -> (OrchestratorState, Option<UpgradeError>) {
        let store = CheckpointStore::new(layout.clone());
        let table = self.resolver.table().clone();
        let context = MigrationContext {
            layout,
            options,
            table: &table,
        };

        for step in steps {
            if self.cancellation.is_cancelled() {
                info!(run_id = %run.run_id, completed = run.completed_steps.len(), "run cancelled");
                return (
                    OrchestratorState::Cancelled,
                    Some(UpgradeError::Cancelled {
                        completed: run.completed_steps.len(),
                    }),
                );
            }

            match self.run_step(step, &context, &store, run, journal, observer) {
                Ok(()) => {}
                Err(StepHalt::Capture(error)) => return (OrchestratorState::Failed, Some(error)),
                Err(StepHalt::Aborted) => {
                    info!(run_id = %run.run_id, step = %step, "run aborted at manual intervention");
                    return (
                        OrchestratorState::Cancelled,
                        Some(UpgradeError::Cancelled {
                            completed: run.completed_steps.len(),
                        }),
                    );
                }
                Err(StepHalt::Failed(error)) => {
                    return self.handle_failure(&store, options, error, run, journal, observer)
                }
            }
        }

        (OrchestratorState::Completed, None)
    }

    fn run_step(
        &mut self,
        step: &UpgradeStep,
        context: &MigrationContext<'_>,
        store: &CheckpointStore,
        run: &mut RunRecord,
        journal: &mut RunJournal<'_>,
        observer: &mut dyn UpgradeObserver,
    ) -> Result<(), StepHalt> {
        let options = context.options;
        if options.checkpoint_frequency.applies_to(step) {
            run.enter(
                OrchestratorState::CheckpointPending,
                Some(step),
                Some(&mut *journal),
                observer,
            );
            let version = run
                .completed_steps
                .last()
                .map_or(step.from_version, |last| last.to_version);
            let checkpoint = store
                .create(version, &format!("before {step}"))
                .map_err(|err| {
                    warn!(step = %step, error = %format!("{err:#}"), "checkpoint capture failed");
                    StepHalt::Capture(UpgradeError::CheckpointCapture {
                        step: *step,
                        cause: format!("{err:#}"),
                    })
                })?;
            if run.checkpoints.is_empty() {
                record_checkpoints_root(&self.layout, context.layout).map_err(|err| {
                    warn!(step = %step, error = %format!("{err:#}"), "checkpoint root not recorded");
                    StepHalt::Capture(UpgradeError::CheckpointCapture {
                        step: *step,
                        cause: format!("{err:#}"),
                    })
                })?;
            }
            observer.on_event(&UpgradeEvent::Progress {
                message: format!(
                    "checkpoint {} captured at version {}",
                    checkpoint.id, checkpoint.version
                ),
            });
            journal.record(
                "checkpoint-created",
                Some(step),
                Some(checkpoint.id.clone()),
            );
            run.checkpoints.push(checkpoint);
        }

        observer.on_event(&UpgradeEvent::StepStart { step: *step });
        run.enter(
            OrchestratorState::Executing,
            Some(step),
            Some(&mut *journal),
            observer,
        );
        let outcome = match self.executor.execute(step, context) {
            Ok(outcome) => outcome,
            Err(error) => {
                fail_step(step, &error, journal, observer);
                return Err(StepHalt::Failed(error));
            }
        };

        let validation = if options.validation_level == ValidationLevel::Comprehensive {
            run.enter(
                OrchestratorState::Validating,
                Some(step),
                Some(&mut *journal),
                observer,
            );
            self.validate_step(step, context, run, journal, observer)
        } else {
            Ok(())
        };
        // A step that failed validation is not complete; an aborted one keeps its changes.
        if matches!(validation, Err(StepHalt::Failed(_))) {
            return validation;
        }

        observer.on_event(&UpgradeEvent::StepComplete { step: *step });
        journal.record(
            "step-complete",
            Some(step),
            Some(format!("{} change(s)", outcome.applied_changes.len())),
        );
        run.completed_steps.push(*step);
        for intervention in outcome.manual_interventions {
            run.warnings.push(format!(
                "{}: {} ({})",
                step, intervention.change, intervention.instructions
            ));
            observer.on_event(&UpgradeEvent::ManualIntervention {
                step: *step,
                intervention,
                blocking: false,
            });
        }
        validation
    }

    fn validate_step(
        &self,
        step: &UpgradeStep,
        context: &MigrationContext<'_>,
        run: &mut RunRecord,
        journal: &mut RunJournal<'_>,
        observer: &mut dyn UpgradeObserver,
    ) -> Result<(), StepHalt> {
        let manifest_path = context.layout.manifest_path();
        let mut manifest = ProjectManifest::read(&manifest_path).map_err(|err| {
            validation_failure(step, format!("{err:#}"), journal, observer)
        })?;
        let report = self.resolver.resolve(
            &manifest,
            step.to_version,
            &resolve_options(context.options),
        );
        if report.critical_updates == 0 {
            return Ok(());
        }

        let outstanding = outstanding_updates(&report);
        let resolution = match context.options.third_party_handling {
            ThirdPartyHandling::Skip => InterventionResolution::Continue,
            ThirdPartyHandling::Auto => InterventionResolution::ApplyUpdates,
            ThirdPartyHandling::Prompt => {
                let intervention = ManualIntervention {
                    change: format!(
                        "{} critical dependency update(s) outstanding for version {}",
                        report.critical_updates, step.to_version
                    ),
                    instructions: outstanding.join("; "),
                    required: true,
                };
                observer.on_event(&UpgradeEvent::ManualIntervention {
                    step: *step,
                    intervention: intervention.clone(),
                    blocking: true,
                });
                journal.record("awaiting-intervention", Some(step), None);
                observer.resolve_intervention(step, &intervention, &report)
            }
        };

        match resolution {
            InterventionResolution::Continue => {
                run.warnings.extend(outstanding);
                Ok(())
            }
            InterventionResolution::Abort => Err(StepHalt::Aborted),
            InterventionResolution::ApplyUpdates => {
                let applied = apply_updates(&report, &mut manifest);
                if !applied.is_empty() {
                    manifest.write(&manifest_path).map_err(|err| {
                        validation_failure(step, format!("{err:#}"), journal, observer)
                    })?;
                }
                observer.on_event(&UpgradeEvent::Progress {
                    message: format!("applied {} dependency update(s)", applied.len()),
                });
                journal.record("dependencies-updated", Some(step), Some(applied.join(", ")));
                Ok(())
            }
        }
    }

    fn handle_failure(
        &self,
        store: &CheckpointStore,
        options: &UpgradeOptions,
        error: UpgradeError,
        run: &mut RunRecord,
        journal: &mut RunJournal<'_>,
        observer: &mut dyn UpgradeObserver,
    ) -> (OrchestratorState, Option<UpgradeError>) {
        if options.rollback_policy != RollbackPolicy::AutoOnFailure {
            if !run.checkpoints.is_empty() {
                run.warnings.push(
                    "checkpoints were kept for an explicit rollback".to_string(),
                );
            }
            return (OrchestratorState::Failed, Some(error));
        }

        let Some(latest) = run.checkpoints.last().cloned() else {
            run.warnings
                .push("no checkpoint was captured during this run; nothing was restored".to_string());
            return (OrchestratorState::Failed, Some(error));
        };

        run.enter(
            OrchestratorState::RollingBack,
            None,
            Some(&mut *journal),
            observer,
        );
        observer.on_event(&UpgradeEvent::Progress {
            message: format!("restoring checkpoint {}", latest.id),
        });
        match store.restore(&latest.id) {
            Ok(restored) => {
                info!(checkpoint = %restored.id, version = %restored.version, "rolled back after failure");
                (OrchestratorState::RolledBack, Some(error))
            }
            Err(err) => {
                warn!(checkpoint = %latest.id, error = %format!("{err:#}"), "automatic rollback failed");
                (
                    OrchestratorState::Failed,
                    Some(UpgradeError::Rollback {
                        cause: format!("{err:#}; original failure: {error}"),
                    }),
                )
            }
        }
    }

    fn apply_retention(&self, layout: &ProjectLayout, run: &mut RunRecord) {
        let Some(keep) = self.retain_checkpoints else {
            return;
        };
        match CheckpointStore::new(layout.clone()).prune(keep) {
            Ok(removed) => run
                .checkpoints
                .retain(|checkpoint| !removed.iter().any(|gone| gone.id == checkpoint.id)),
            Err(err) => run
                .warnings
                .push(format!("checkpoint retention failed: {err:#}")),
        }
    }
}

fn fail_step(
    step: &UpgradeStep,
    error: &UpgradeError,
    journal: &mut RunJournal<'_>,
    observer: &mut dyn UpgradeObserver,
) {
    warn!(step = %step, error = %error, "step failed");
    journal.record("step-failed", Some(step), Some(error.to_string()));
    observer.on_event(&UpgradeEvent::StepFailed {
        step: *step,
        error: error.clone(),
    });
}

fn validation_failure(
    step: &UpgradeStep,
    cause: String,
    journal: &mut RunJournal<'_>,
    observer: &mut dyn UpgradeObserver,
) -> StepHalt {
    let error = UpgradeError::StepExecution {
        step: *step,
        cause: format!("validation failed: {cause}"),
    };
    fail_step(step, &error, journal, observer);
    StepHalt::Failed(error)
}

fn framework_version(manifest: &ProjectManifest) -> Result<VersionId, UpgradeError> {
    manifest
        .framework_version()
        .map_err(|err| UpgradeError::ManifestUnreadable {
            cause: format!("{err:#}"),
        })
}

pub(crate) fn resolve_options(options: &UpgradeOptions) -> ResolveOptions {
    ResolveOptions {
        include_dev_dependencies: true,
        only_framework_ecosystem: false,
        update_strategy: options.strategy,
        parallel: options.parallel_processing,
    }
}

fn blocking_warnings(report: &CompatibilityReport) -> Vec<String> {
    report
        .blockers
        .iter()
        .map(|blocker| format!("blocking: {}", blocker.to_error()))
        .collect()
}

fn outstanding_updates(report: &CompatibilityReport) -> Vec<String> {
    report
        .actionable_updates()
        .filter(|update| update.required)
        .map(|update| match update.target_range() {
            Some(range) => format!(
                "{} {} needs {range} for version {}",
                update.name, update.current_version, report.target_version
            ),
            None => format!(
                "{} {} has no release for version {}",
                update.name, update.current_version, report.target_version
            ),
        })
        .collect()
}

pub(crate) fn into_upgrade_error(err: anyhow::Error) -> UpgradeError {
    match err.downcast_ref::<UpgradeError>() {
        Some(error) => error.clone(),
        None => UpgradeError::Storage {
            cause: format!("{err:#}"),
        },
    }
}
