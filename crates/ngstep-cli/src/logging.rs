use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_ENV: &str = "NGSTEP_LOG";
const LOG_FORMAT_ENV: &str = "NGSTEP_LOG_FORMAT";
const DEFAULT_LEVEL: &str = "warn";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// `--verbose` beats `NGSTEP_LOG`, which beats the configured level.
pub(crate) fn resolve_log_directive(
    verbose: bool,
    env_directive: Option<&str>,
    configured: Option<&str>,
) -> String {
    if verbose {
        return "debug".to_string();
    }
    env_directive
        .filter(|value| !value.trim().is_empty())
        .or(configured)
        .unwrap_or(DEFAULT_LEVEL)
        .to_string()
}

pub(crate) fn resolve_log_format(value: Option<&str>) -> LogFormat {
    match value.map(str::trim) {
        Some(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
        _ => LogFormat::Text,
    }
}

/// Installs the stderr subscriber. Called once per process.
pub(crate) fn init_logging(verbose: bool, configured: Option<&str>) -> Result<()> {
    let env_directive = std::env::var(LOG_ENV).ok();
    let directive = resolve_log_directive(verbose, env_directive.as_deref(), configured);
    let env_filter = EnvFilter::try_new(&directive)
        .map_err(|err| anyhow!("invalid log filter '{directive}': {err}"))?;

    let format = resolve_log_format(std::env::var(LOG_FORMAT_ENV).ok().as_deref());
    let installed = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
    };
    installed.map_err(|err| anyhow!("failed to install log subscriber: {err}"))
}
