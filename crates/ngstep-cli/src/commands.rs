use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use ngstep_checkpoint::ProjectLayout;
use ngstep_core::{UpgradeError, UpgradeResult, VersionId};
use ngstep_engine::{
    analyze_project, KnownInterventions, ManifestMigration, NgUpdateMigration, OptionOverrides,
    ProjectConfig, StepExecutor, UpgradeOrchestrator,
};
use ngstep_resolver::CompatibilityResolver;
use tracing::debug;

use crate::logging::init_logging;
use crate::prompt::confirm;
use crate::render::{
    format_checkpoint_lines, format_plan_lines, format_readiness_lines, format_result_lines,
    OutputStyle, TerminalObserver, TerminalRenderer,
};
use crate::{AnalyzeArgs, CheckpointArgs, ExecutorKind, UpgradeArgs};

/// A project directory with its configuration applied.
pub(crate) struct Project {
    pub(crate) root: PathBuf,
    pub(crate) layout: ProjectLayout,
    pub(crate) config: ProjectConfig,
}

impl Project {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let root = path
            .canonicalize()
            .with_context(|| format!("project directory not found: {}", path.display()))?;
        let config = ProjectConfig::load_for(&ProjectLayout::new(&root))?;
        let layout = config.layout_for(&root);
        Ok(Self {
            root,
            layout,
            config,
        })
    }

    pub(crate) fn resolver(&self) -> Result<CompatibilityResolver> {
        Ok(CompatibilityResolver::new(
            self.config.ecosystem_table(&self.root)?,
        ))
    }

    fn orchestrator(&self, executor: StepExecutor) -> Result<UpgradeOrchestrator> {
        Ok(
            UpgradeOrchestrator::new(self.layout.clone(), self.resolver()?, executor)
                .with_retention(self.config.retain_checkpoints),
        )
    }
}

pub(crate) fn build_executor(kind: ExecutorKind) -> Result<StepExecutor> {
    let executor = match kind {
        ExecutorKind::Manifest => StepExecutor::new().with_capability(ManifestMigration),
        ExecutorKind::NgUpdate => {
            StepExecutor::new().with_capability(NgUpdateMigration::default())
        }
    };
    Ok(executor.with_capability(KnownInterventions::builtin()?))
}

pub(crate) fn option_overrides(args: &UpgradeArgs) -> OptionOverrides {
    OptionOverrides {
        strategy: args.strategy,
        checkpoint_frequency: None,
        validation: args.validation,
        third_party: args.third_party,
        rollback_policy: args.rollback_policy,
        parallel: args.parallel.then_some(true),
        backup_path: args.backup_path.clone(),
        no_backup: args.no_backup,
    }
}

fn parse_target(raw: Option<&str>) -> Result<Option<VersionId>> {
    raw.map(|raw| VersionId::parse(raw).with_context(|| format!("invalid --target '{raw}'")))
        .transpose()
}

/// Success and user cancellation exit 0; everything else exits 1.
pub(crate) fn upgrade_exit_ok(result: &UpgradeResult) -> bool {
    result.success || result.was_cancelled()
}

pub(crate) fn run_upgrade_command(
    args: &UpgradeArgs,
    verbose: bool,
    style: OutputStyle,
) -> Result<ExitCode> {
    let project = Project::open(&args.path)?;
    init_logging(verbose, project.config.log_level.as_deref())?;
    let renderer = TerminalRenderer::from_style(style);

    let mut orchestrator = project.orchestrator(build_executor(args.executor)?)?;
    let target = parse_target(args.target.as_deref())?
        .unwrap_or_else(|| orchestrator.resolver().table().max_version());
    let options = project
        .config
        .upgrade_options(target, &option_overrides(args));
    debug!(?options, "resolved upgrade options");

    let plan = orchestrator.describe_plan(&options)?;
    renderer.print_section("plan");
    renderer.print_lines(&format_plan_lines(&plan, style));
    if args.dry_run {
        return Ok(ExitCode::SUCCESS);
    }

    let question = format!(
        "Upgrade {} from {} to {} in {} step(s)?",
        project.root.display(),
        plan.current_version,
        plan.target_version,
        plan.steps.len()
    );
    if !confirm(&question, args.yes)? {
        renderer.print_status("warn", "upgrade not started");
        return Ok(ExitCode::SUCCESS);
    }

    renderer.print_section("upgrade");
    let mut observer = TerminalObserver::new(renderer, plan.steps.len(), args.yes);
    let result = orchestrator.orchestrate_upgrade(&options, &mut observer);
    observer.finish(result.success);

    renderer.print_section("result");
    renderer.print_lines(&format_result_lines(&result, style));
    Ok(if upgrade_exit_ok(&result) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub(crate) fn run_analyze_command(
    args: &AnalyzeArgs,
    verbose: bool,
    style: OutputStyle,
) -> Result<ExitCode> {
    let project = Project::open(&args.path)?;
    init_logging(verbose, project.config.log_level.as_deref())?;

    let target = parse_target(args.target.as_deref())?;
    let report = analyze_project(&project.layout, &project.resolver()?, target);
    if args.json {
        let rendered = serde_json::to_string_pretty(&report)
            .context("failed to serialize readiness report")?;
        println!("{rendered}");
    } else {
        TerminalRenderer::from_style(style).print_lines(&format_readiness_lines(&report, style));
    }
    Ok(ExitCode::SUCCESS)
}

pub(crate) fn run_checkpoints_command(
    args: &CheckpointArgs,
    verbose: bool,
    style: OutputStyle,
) -> Result<ExitCode> {
    let project = Project::open(&args.path)?;
    init_logging(verbose, project.config.log_level.as_deref())?;
    let renderer = TerminalRenderer::from_style(style);
    let orchestrator = project.orchestrator(StepExecutor::new())?;
    let store = orchestrator.store()?;

    if let Some(id) = &args.rollback {
        let checkpoints = store.list()?;
        let position = checkpoints
            .iter()
            .position(|checkpoint| &checkpoint.id == id)
            .ok_or_else(|| UpgradeError::CheckpointNotFound { id: id.clone() })?;
        let newer = checkpoints.len() - position - 1;
        let question = format!(
            "Restore {} to checkpoint {id} and discard {newer} newer checkpoint(s)?",
            project.root.display()
        );
        if !confirm(&question, args.yes)? {
            renderer.print_status("warn", "rollback not started");
            return Ok(ExitCode::SUCCESS);
        }

        let outcome = orchestrator.rollback_to_checkpoint(id)?;
        renderer.print_status(
            "ok",
            &format!(
                "restored checkpoint {} (version {}); discarded {}",
                outcome.restored.id,
                outcome.restored.version,
                outcome.discarded.len()
            ),
        );
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(description) = &args.create {
        let checkpoint = orchestrator.create_checkpoint(description)?;
        renderer.print_status(
            "ok",
            &format!(
                "created checkpoint {} at version {}",
                checkpoint.id, checkpoint.version
            ),
        );
        return Ok(ExitCode::SUCCESS);
    }

    if args.cleanup {
        let keep = args.keep.unwrap_or_else(|| project.config.cleanup_keep());
        let existing = store.list()?.len();
        if existing <= keep {
            renderer.print_status("info", &format!("{existing} checkpoint(s); nothing to remove"));
            return Ok(ExitCode::SUCCESS);
        }
        let question = format!(
            "Remove {} of {existing} checkpoint(s), keeping the newest {keep}?",
            existing - keep
        );
        if !confirm(&question, args.yes)? {
            renderer.print_status("warn", "cleanup not started");
            return Ok(ExitCode::SUCCESS);
        }
        let removed = orchestrator.cleanup_checkpoints(keep)?;
        renderer.print_status("ok", &format!("removed {} checkpoint(s)", removed.len()));
        return Ok(ExitCode::SUCCESS);
    }

    renderer.print_lines(&format_checkpoint_lines(&store.list()?));
    Ok(ExitCode::SUCCESS)
}
