use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use chrono::DateTime;
use indicatif::{HumanCount, ProgressBar, ProgressStyle};
use ngstep_core::{
    Checkpoint, CompatibilityReport, ManualIntervention, OrchestratorState, UpgradeResult,
    UpgradeStep,
};
use ngstep_engine::{
    InterventionResolution, PlanDescription, ReadinessReport, UpgradeEvent, UpgradeObserver,
};

use crate::prompt::ask_intervention;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

pub(crate) struct TerminalProgress {
    style: OutputStyle,
    label: String,
    total: u64,
    current: u64,
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

pub(crate) fn current_output_style() -> OutputStyle {
    resolve_output_style(
        std::io::stdout().is_terminal(),
        std::io::stderr().is_terminal(),
    )
}

pub(crate) fn resolve_output_style(stdout_is_tty: bool, _stderr_is_tty: bool) -> OutputStyle {
    if stdout_is_tty {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self { style }
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        println!("{}", self.status_line(status, message));
    }

    fn status_line(self, status: &str, message: &str) -> String {
        match (self.style, status_badge(status)) {
            (OutputStyle::Rich, Some(badge)) => {
                format!("{} {message}", colorize(badge_style(status), badge))
            }
            _ => render_status_line(self.style, status, message),
        }
    }

    pub(crate) fn print_section(self, title: &str) {
        if self.style == OutputStyle::Plain {
            return;
        }
        println!();
        println!("{}", colorize(section_style(), &format!("== {title} ==")));
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }

    pub(crate) fn start_progress(self, label: &str, total: u64) -> TerminalProgress {
        let progress_bar = if self.style == OutputStyle::Rich {
            let progress_bar = ProgressBar::new(total.max(1));
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.cyan.bold} {msg:<12} [{bar:20.cyan/blue}] {pos:>3}/{len:3} {elapsed_precise}",
            ) {
                progress_bar.set_style(style.tick_chars("-=~* ").progress_chars("=>-"));
            }
            progress_bar.set_message(label.to_string());
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            Some(progress_bar)
        } else {
            None
        };

        TerminalProgress {
            style: self.style,
            label: label.to_string(),
            total,
            current: 0,
            progress_bar,
            started_at: Instant::now(),
        }
    }
}

impl TerminalProgress {
    pub(crate) fn set(&mut self, current: u64) {
        self.current = current.min(self.total);

        let Some(progress_bar) = &self.progress_bar else {
            return;
        };
        let safe_total = self.total.max(1);
        progress_bar.set_length(safe_total);
        progress_bar.set_position(self.current.min(safe_total));
    }

    pub(crate) fn set_message(&self, message: &str) {
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.set_message(message.to_string());
        }
    }

    /// Prints above the bar so the line is not overwritten by the next tick.
    pub(crate) fn println(&self, line: &str) {
        match &self.progress_bar {
            Some(progress_bar) => progress_bar.println(line),
            None => println!("{line}"),
        }
    }

    pub(crate) fn suspend<T>(&self, f: impl FnOnce() -> T) -> T {
        match &self.progress_bar {
            Some(progress_bar) => progress_bar.suspend(f),
            None => f(),
        }
    }

    pub(crate) fn finish_success(mut self) {
        let Some(progress_bar) = self.progress_bar.take() else {
            return;
        };

        progress_bar.finish_and_clear();
        if let Some(line) = render_progress_line(
            self.style,
            &self.label,
            self.current,
            self.total,
            Some(self.started_at.elapsed()),
        ) {
            println!("{line}");
        }
    }

    pub(crate) fn finish_abandon(mut self) {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
    }
}

/// Renders run events as status lines under a step progress bar.
pub(crate) struct TerminalObserver {
    renderer: TerminalRenderer,
    progress: Option<TerminalProgress>,
    completed: u64,
    assume_yes: bool,
}

impl TerminalObserver {
    pub(crate) fn new(renderer: TerminalRenderer, total_steps: usize, assume_yes: bool) -> Self {
        Self {
            progress: Some(renderer.start_progress("upgrade", total_steps as u64)),
            renderer,
            completed: 0,
            assume_yes,
        }
    }

    pub(crate) fn finish(&mut self, success: bool) {
        if let Some(progress) = self.progress.take() {
            if success {
                progress.finish_success();
            } else {
                progress.finish_abandon();
            }
        }
    }

    fn status(&self, status: &str, message: &str) {
        let line = self.renderer.status_line(status, message);
        match &self.progress {
            Some(progress) => progress.println(&line),
            None => println!("{line}"),
        }
    }
}

impl UpgradeObserver for TerminalObserver {
    fn on_event(&mut self, event: &UpgradeEvent) {
        match event {
            UpgradeEvent::Progress { message } => self.status("info", message),
            UpgradeEvent::StateChanged { state } => {
                if *state == OrchestratorState::RollingBack {
                    self.status("warn", "rolling back to the last checkpoint");
                }
            }
            UpgradeEvent::StepStart { step } => {
                if let Some(progress) = &self.progress {
                    progress.set_message(&step.to_string());
                }
            }
            UpgradeEvent::StepComplete { step } => {
                self.completed += 1;
                if let Some(progress) = &mut self.progress {
                    progress.set(self.completed);
                }
                self.status("ok", &format!("upgraded {step}"));
            }
            UpgradeEvent::StepFailed { error, .. } => self.status("error", &error.to_string()),
            UpgradeEvent::ManualIntervention {
                step,
                intervention,
                blocking,
            } => {
                if !blocking {
                    self.status("warn", &format_intervention_line(step, intervention));
                }
            }
        }
    }

    fn resolve_intervention(
        &mut self,
        step: &UpgradeStep,
        intervention: &ManualIntervention,
        report: &CompatibilityReport,
    ) -> InterventionResolution {
        if self.assume_yes {
            return InterventionResolution::ApplyUpdates;
        }

        let mut lines = vec![format_intervention_line(step, intervention)];
        lines.extend(
            report
                .actionable_updates()
                .filter(|update| update.required)
                .map(|update| {
                    format!(
                        "  {} {} -> {}",
                        update.name,
                        update.current_version,
                        update.target_range().unwrap_or_else(|| "-".to_string())
                    )
                }),
        );
        let question = "Apply these updates (y), continue without them (n) or abort (a)?";
        let answer = match &self.progress {
            Some(progress) => progress.suspend(|| ask_intervention(&lines, question)),
            None => ask_intervention(&lines, question),
        };
        answer.unwrap_or_else(|err| {
            self.status("warn", &format!("{err:#}; stopping the run"));
            InterventionResolution::Abort
        })
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match (style, status_badge(status)) {
        (OutputStyle::Rich, Some(badge)) => format!("{badge} {message}"),
        _ => message.to_string(),
    }
}

fn status_badge(status: &str) -> Option<&'static str> {
    match status {
        "ok" => Some("[OK]"),
        "info" | "step" => Some("[..]"),
        "warn" => Some("[WARN]"),
        "error" => Some("[ERR]"),
        _ => None,
    }
}

fn badge_style(status: &str) -> Style {
    let color = match status {
        "ok" => AnsiColor::BrightGreen,
        "warn" => AnsiColor::BrightYellow,
        "error" => AnsiColor::BrightRed,
        _ => AnsiColor::BrightBlue,
    };
    Style::new()
        .fg_color(Some(color.into()))
        .effects(Effects::BOLD)
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn progress_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn progress_bar_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::BrightBlue.into()))
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub(crate) fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn render_progress_line(
    style: OutputStyle,
    label: &str,
    current: u64,
    total: u64,
    elapsed: Option<Duration>,
) -> Option<String> {
    if style == OutputStyle::Plain {
        return None;
    }

    let width = 18_usize;
    let safe_total = total.max(1);
    let bounded_current = current.min(safe_total);
    let filled = ((bounded_current as usize) * width) / (safe_total as usize);
    let bar = format!(
        "{}{}",
        "=".repeat(filled),
        "-".repeat(width.saturating_sub(filled))
    );
    let percent = (bounded_current * 100) / safe_total;
    let counts = format!("{}/{}", HumanCount(current), HumanCount(total));
    let suffix = elapsed
        .map(|value| format!(" complete in {}", format_elapsed(value)))
        .unwrap_or_default();

    Some(format!(
        "{} [{}] {:>3}% {}{}",
        colorize(progress_label_style(), label),
        colorize(progress_bar_style(), &bar),
        percent,
        counts,
        suffix
    ))
}

fn format_intervention_line(step: &UpgradeStep, intervention: &ManualIntervention) -> String {
    let marker = if intervention.required {
        "required"
    } else {
        "advisory"
    };
    format!(
        "{step}: {} ({marker}): {}",
        intervention.change, intervention.instructions
    )
}

pub(crate) fn format_plan_lines(plan: &PlanDescription, style: OutputStyle) -> Vec<String> {
    let mut lines = vec![render_status_line(
        style,
        "info",
        &format!(
            "plan: {} -> {} in {} step(s) (strategy={} checkpoints={} validation={})",
            plan.current_version,
            plan.target_version,
            plan.steps.len(),
            plan.options.strategy.as_str(),
            plan.options.checkpoint_frequency.as_str(),
            plan.options.validation_level.as_str(),
        ),
    )];
    for planned in &plan.steps {
        lines.push(format!(
            "step {}: {} checkpoint={} updates={} critical={}",
            planned.step.ordinal,
            planned.step,
            if planned.checkpoint { "yes" } else { "no" },
            planned.report.total_updates,
            planned.report.critical_updates,
        ));
    }
    if let Some(last) = plan.steps.last() {
        for update in last.report.actionable_updates() {
            lines.push(format!(
                "  {} {} -> {} ({}{})",
                update.name,
                update.current_version,
                update.target_range().unwrap_or_else(|| "-".to_string()),
                update.update_type.as_str(),
                if update.required { ", required" } else { "" },
            ));
        }
    }
    lines.extend(
        plan.warnings
            .iter()
            .map(|warning| render_status_line(style, "warn", warning)),
    );
    lines
}

pub(crate) fn format_result_lines(result: &UpgradeResult, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    let summary = match result.final_state {
        OrchestratorState::Completed => render_status_line(
            style,
            "ok",
            &format!(
                "upgraded {} -> {} in {} step(s) ({})",
                result.from_version,
                result.to_version,
                result.completed_steps.len(),
                format_elapsed(result.duration)
            ),
        ),
        OrchestratorState::Cancelled => render_status_line(
            style,
            "warn",
            &format!(
                "upgrade stopped after {} completed step(s)",
                result.completed_steps.len()
            ),
        ),
        OrchestratorState::RolledBack => render_status_line(
            style,
            "error",
            &format!(
                "upgrade failed and was rolled back: {}",
                format_error(result)
            ),
        ),
        _ => render_status_line(
            style,
            "error",
            &format!("upgrade failed: {}", format_error(result)),
        ),
    };
    lines.push(summary);

    lines.extend(
        result
            .warnings
            .iter()
            .map(|warning| render_status_line(style, "warn", warning)),
    );
    if result.rollback_available && result.final_state != OrchestratorState::RolledBack {
        if let Some(first) = result.checkpoints.first() {
            lines.push(format!(
                "restore the pre-upgrade state with: ngstep checkpoints --rollback {}",
                first.id
            ));
        }
    }
    lines.push(format!(
        "run={} state={} checkpoints={}",
        result.run_id,
        result.final_state.as_str(),
        result.checkpoints.len()
    ));
    lines
}

fn format_error(result: &UpgradeResult) -> String {
    result
        .error
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown error".to_string())
}

pub(crate) fn format_readiness_lines(report: &ReadinessReport, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(name) = &report.project_name {
        lines.push(format!("project: {name}"));
    }
    lines.push(format!(
        "current version: {}",
        report
            .current_version
            .map(|version| version.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    ));
    lines.push(format!("latest supported: {}", report.latest_supported));
    lines.push(format!(
        "target: {} ({} step(s))",
        report.target_version,
        report.steps.len()
    ));
    if let Some(compatibility) = &report.report {
        lines.push(format!(
            "dependency updates: total={} critical={} deprecated={}",
            compatibility.total_updates,
            compatibility.critical_updates,
            compatibility.deprecated.len()
        ));
        lines.extend(
            compatibility
                .warnings
                .iter()
                .map(|warning| render_status_line(style, "warn", warning)),
        );
    }
    lines.push(format!("checkpoints: {}", report.checkpoints.len()));
    if let Some(run_id) = &report.active_run {
        lines.push(format!("active run: {run_id}"));
    }
    lines.extend(
        report
            .issues
            .iter()
            .map(|issue| render_status_line(style, "error", issue)),
    );
    lines.push(if report.ready {
        render_status_line(style, "ok", "ready to upgrade")
    } else {
        render_status_line(style, "warn", "not ready to upgrade")
    });
    lines
}

pub(crate) fn format_checkpoint_lines(checkpoints: &[Checkpoint]) -> Vec<String> {
    if checkpoints.is_empty() {
        return vec!["no checkpoints".to_string()];
    }
    checkpoints
        .iter()
        .map(|checkpoint| {
            format!(
                "{} version={} created={} {}",
                checkpoint.id,
                checkpoint.version,
                format_timestamp(checkpoint.timestamp_unix_ms),
                checkpoint.description
            )
        })
        .collect()
}

/// UTC wall-clock time, or the raw milliseconds when out of range.
pub(crate) fn format_timestamp(unix_ms: u64) -> String {
    i64::try_from(unix_ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(|time| time.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| format!("{unix_ms}ms"))
}
