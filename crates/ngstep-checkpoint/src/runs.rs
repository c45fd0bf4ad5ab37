use anyhow::{anyhow, Context, Result};
use ngstep_core::{UpgradeError, VersionId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::fs_utils::{current_unix_timestamp_ms, remove_file_if_exists, write_atomic};
use crate::layout::ProjectLayout;

const RUN_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Planning,
    Applying,
    Completed,
    Failed,
    RolledBack,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Applying => "applying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled-back",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: u32,
    pub run_id: String,
    pub operation: String,
    pub status: RunStatus,
    pub started_at_unix_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_version: Option<VersionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_version: Option<VersionId>,
}

impl RunMetadata {
    pub fn new(run_id: &str, operation: &str) -> Self {
        Self {
            version: RUN_FORMAT_VERSION,
            run_id: run_id.to_string(),
            operation: operation.to_string(),
            status: RunStatus::Planning,
            started_at_unix_ms: current_unix_timestamp_ms(),
            from_version: None,
            to_version: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunJournalEntry {
    pub seq: u64,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Process-unique run id: `run-<unix_ms>-<pid>-<n>`.
pub fn new_run_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!(
        "run-{}-{}-{}",
        current_unix_timestamp_ms(),
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Exclusive claim on a project for one run or rollback.
///
/// Released by [`ActiveRun::release`]; dropping the guard releases it too.
#[derive(Debug)]
pub struct ActiveRun {
    path: PathBuf,
    run_id: String,
    released: bool,
}

impl ActiveRun {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        remove_file_if_exists(&self.path).with_context(|| {
            format!("failed to clear active run file: {}", self.path.display())
        })
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = remove_file_if_exists(&self.path) {
            warn!(path = %self.path.display(), error = %err, "failed to clear active run file");
        }
    }
}

/// Claims `.ng-upgrade/active-run` with create-new semantics.
///
/// A second claim fails with [`UpgradeError::RunInProgress`] naming the holder.
pub fn claim_active_run(layout: &ProjectLayout, run_id: &str) -> Result<ActiveRun> {
    let path = layout.active_run_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
    {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            let holder = read_active_run(layout)
                .ok()
                .flatten()
                .unwrap_or_else(|| "unknown".to_string());
            return Err(UpgradeError::RunInProgress { run_id: holder }.into());
        }
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to claim active run file: {}", path.display())
            });
        }
    };

    let guard = ActiveRun {
        path: path.clone(),
        run_id: run_id.to_string(),
        released: false,
    };
    file.write_all(format!("{run_id}\n").as_bytes())
        .with_context(|| format!("failed to write active run file: {}", path.display()))?;
    file.flush()
        .with_context(|| format!("failed to flush active run file: {}", path.display()))?;

    debug!(run_id, "claimed active run");
    Ok(guard)
}

pub fn read_active_run(layout: &ProjectLayout) -> Result<Option<String>> {
    let path = layout.active_run_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read active run file: {}", path.display()));
        }
    };

    let run_id = raw.trim();
    if run_id.is_empty() {
        return Ok(None);
    }
    Ok(Some(run_id.to_string()))
}

pub fn write_run_metadata(layout: &ProjectLayout, metadata: &RunMetadata) -> Result<PathBuf> {
    let path = layout.run_metadata_path(&metadata.run_id);
    let content = serde_json::to_string_pretty(metadata)
        .with_context(|| format!("failed to serialize run metadata: {}", path.display()))?;
    write_atomic(&path, content.as_bytes())?;
    Ok(path)
}

pub fn read_run_metadata(layout: &ProjectLayout, run_id: &str) -> Result<Option<RunMetadata>> {
    let path = layout.run_metadata_path(run_id);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read run metadata file: {}", path.display()));
        }
    };

    let metadata = serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing run metadata file: {}", path.display()))?;
    Ok(Some(metadata))
}

pub fn update_run_status(layout: &ProjectLayout, run_id: &str, status: RunStatus) -> Result<()> {
    let mut metadata = read_run_metadata(layout, run_id)?
        .ok_or_else(|| anyhow!("run metadata not found for '{run_id}'"))?;
    metadata.status = status;
    write_run_metadata(layout, &metadata)?;
    Ok(())
}

pub fn append_run_journal_entry(
    layout: &ProjectLayout,
    run_id: &str,
    entry: &RunJournalEntry,
) -> Result<PathBuf> {
    let path = layout.run_journal_path(run_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut line = serde_json::to_string(entry)
        .with_context(|| format!("failed to serialize run journal entry: {}", path.display()))?;
    line.push('\n');

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open run journal: {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("failed to append run journal: {}", path.display()))?;
    file.flush()
        .with_context(|| format!("failed to flush run journal: {}", path.display()))?;
    Ok(path)
}

pub fn read_run_journal(layout: &ProjectLayout, run_id: &str) -> Result<Vec<RunJournalEntry>> {
    let path = layout.run_journal_path(run_id);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read run journal: {}", path.display()));
        }
    };

    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| {
                format!(
                    "failed parsing run journal line {}: {}",
                    index + 1,
                    path.display()
                )
            })
        })
        .collect()
}
