mod commands;
mod completion;
mod logging;
mod prompt;
mod render;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use ngstep_core::{RollbackPolicy, ThirdPartyHandling, UpgradeStrategy, ValidationLevel};

use crate::commands::{run_analyze_command, run_checkpoints_command, run_upgrade_command};
use crate::completion::{write_completions_script, CliCompletionShell};
use crate::logging::init_logging;
use crate::render::{current_output_style, render_status_line, OutputStyle};

#[derive(Parser, Debug)]
#[command(name = "ngstep")]
#[command(
    about = "Step-by-step Angular major upgrades with checkpoints and rollback",
    long_about = None
)]
struct Cli {
    /// Log debug output to stderr.
    #[arg(long, global = true)]
    verbose: bool,
    /// Disable colors, badges and progress bars.
    #[arg(long, global = true)]
    plain: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upgrade a project one major version at a time.
    Upgrade(UpgradeArgs),
    /// Report how ready a project is to upgrade. Never changes the project.
    Analyze(AnalyzeArgs),
    /// List, create, restore or clean up checkpoints.
    Checkpoints(CheckpointArgs),
    /// Print a shell completion script.
    Completions { shell: CliCompletionShell },
}

#[derive(Args, Debug)]
struct UpgradeArgs {
    /// Target major version; defaults to the newest supported one.
    #[arg(long)]
    target: Option<String>,
    #[arg(long, default_value = ".")]
    path: PathBuf,
    #[arg(long, value_parser = parse_strategy)]
    strategy: Option<UpgradeStrategy>,
    /// Print the plan and a compatibility preview, then stop.
    #[arg(long)]
    dry_run: bool,
    /// Skip checkpoints for this run.
    #[arg(long)]
    no_backup: bool,
    #[arg(long, value_parser = parse_validation)]
    validation: Option<ValidationLevel>,
    #[arg(long, value_parser = parse_third_party)]
    third_party: Option<ThirdPartyHandling>,
    #[arg(long, value_parser = parse_rollback_policy)]
    rollback_policy: Option<RollbackPolicy>,
    /// Store checkpoints here instead of under .ng-upgrade/.
    #[arg(long)]
    backup_path: Option<PathBuf>,
    /// Classify dependencies in parallel.
    #[arg(long)]
    parallel: bool,
    #[arg(long, value_enum, default_value_t = ExecutorKind::Manifest)]
    executor: ExecutorKind,
    /// Answer yes to confirmations and apply outstanding dependency updates.
    #[arg(long)]
    yes: bool,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    #[arg(long, default_value = ".")]
    path: PathBuf,
    #[arg(long)]
    target: Option<String>,
    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct CheckpointArgs {
    #[arg(long, default_value = ".")]
    path: PathBuf,
    #[arg(long, conflicts_with_all = ["rollback", "create", "cleanup"])]
    list: bool,
    /// Restore a checkpoint and discard every newer one.
    #[arg(long, value_name = "ID", conflicts_with_all = ["create", "cleanup"])]
    rollback: Option<String>,
    #[arg(long, value_name = "DESCRIPTION", conflicts_with = "cleanup")]
    create: Option<String>,
    /// Keep only the newest checkpoints.
    #[arg(long)]
    cleanup: bool,
    /// How many checkpoints --cleanup keeps; defaults to the configured value.
    #[arg(long, requires = "cleanup")]
    keep: Option<usize>,
    #[arg(long)]
    yes: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ExecutorKind {
    /// Rewrite package.json ranges in place.
    Manifest,
    /// Run `ng update` for each step.
    NgUpdate,
}

fn parse_strategy(value: &str) -> Result<UpgradeStrategy, String> {
    UpgradeStrategy::parse(value).map_err(|err| err.to_string())
}

fn parse_validation(value: &str) -> Result<ValidationLevel, String> {
    ValidationLevel::parse(value).map_err(|err| err.to_string())
}

fn parse_third_party(value: &str) -> Result<ThirdPartyHandling, String> {
    ThirdPartyHandling::parse(value).map_err(|err| err.to_string())
}

fn parse_rollback_policy(value: &str) -> Result<RollbackPolicy, String> {
    RollbackPolicy::parse(value).map_err(|err| err.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let style = if cli.plain {
        OutputStyle::Plain
    } else {
        current_output_style()
    };

    match run_cli(cli, style) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", render_status_line(style, "error", &format!("{err:#}")));
            ExitCode::FAILURE
        }
    }
}

fn run_cli(cli: Cli, style: OutputStyle) -> Result<ExitCode> {
    match cli.command {
        Commands::Upgrade(args) => run_upgrade_command(&args, cli.verbose, style),
        Commands::Analyze(args) => run_analyze_command(&args, cli.verbose, style),
        Commands::Checkpoints(args) => run_checkpoints_command(&args, cli.verbose, style),
        Commands::Completions { shell } => {
            init_logging(cli.verbose, None)?;
            let mut stdout = std::io::stdout().lock();
            write_completions_script(shell, &mut stdout)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
