use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::fs_utils::{remove_file_if_exists, write_atomic};

pub const STATE_DIR_NAME: &str = ".ng-upgrade";
pub const MANIFEST_FILE_NAME: &str = "package.json";

/// Directories never captured in a snapshot, wherever they appear.
pub const EXCLUDED_ANYWHERE: &[&str] = &["node_modules", ".git"];

/// Directories never captured in a snapshot when they sit at the project root.
pub const EXCLUDED_AT_ROOT: &[&str] = &[STATE_DIR_NAME, ".angular", "dist", "coverage", "tmp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    project_root: PathBuf,
    checkpoints_root: Option<PathBuf>,
}

impl ProjectLayout {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            checkpoints_root: None,
        }
    }

    /// Stores checkpoints under `root` instead of `.ng-upgrade/checkpoints`.
    pub fn with_checkpoints_root(mut self, root: Option<PathBuf>) -> Self {
        self.checkpoints_root = root;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.project_root.join(MANIFEST_FILE_NAME)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR_NAME)
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir().join("config.toml")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.checkpoints_root
            .clone()
            .unwrap_or_else(|| self.state_dir().join("checkpoints"))
    }

    /// Names the checkpoint root of the latest run that captured elsewhere.
    pub fn checkpoints_pointer_path(&self) -> PathBuf {
        self.state_dir().join("checkpoints-root")
    }

    /// Follows the pointer left by [`record_checkpoints_root`], if any.
    pub fn with_recorded_checkpoints_root(self) -> Result<Self> {
        let path = self.checkpoints_pointer_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(self),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed reading checkpoint pointer {}", path.display()));
            }
        };
        let root = raw.trim();
        if root.is_empty() {
            return Ok(self);
        }
        Ok(self.with_checkpoints_root(Some(PathBuf::from(root))))
    }

    pub fn checkpoint_index_path(&self) -> PathBuf {
        self.checkpoints_dir().join("index.json")
    }

    pub fn checkpoint_staging_dir(&self) -> PathBuf {
        self.checkpoints_dir().join(".staging")
    }

    pub fn checkpoint_dir(&self, id: &str) -> PathBuf {
        self.checkpoints_dir().join(id)
    }

    pub fn checkpoint_files_dir(&self, id: &str) -> PathBuf {
        self.checkpoint_dir(id).join("files")
    }

    pub fn checkpoint_snapshot_path(&self, id: &str) -> PathBuf {
        self.checkpoint_dir(id).join("snapshot.json")
    }

    pub fn checkpoint_staging_path(&self, id: &str) -> PathBuf {
        self.checkpoint_staging_dir().join(id)
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.state_dir().join("runs")
    }

    pub fn active_run_path(&self) -> PathBuf {
        self.state_dir().join("active-run")
    }

    pub fn run_metadata_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{run_id}.json"))
    }

    pub fn run_journal_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{run_id}.journal"))
    }

    /// Whether `dir` is one of the store's own directories and must not be tracked.
    pub fn is_state_path(&self, dir: &Path) -> bool {
        dir.starts_with(self.state_dir()) || dir.starts_with(self.checkpoints_dir())
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.state_dir(),
            self.checkpoints_dir(),
            self.checkpoint_staging_dir(),
            self.runs_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Records where `effective` keeps checkpoints so that later commands opened
/// with `configured` find them. Clears the pointer when both agree.
pub fn record_checkpoints_root(configured: &ProjectLayout, effective: &ProjectLayout) -> Result<()> {
    let pointer = configured.checkpoints_pointer_path();
    let root_dir = effective.checkpoints_dir();
    if root_dir == configured.checkpoints_dir() {
        return remove_file_if_exists(&pointer)
            .with_context(|| format!("failed removing {}", pointer.display()));
    }

    let root = root_dir
        .to_str()
        .ok_or_else(|| anyhow!("checkpoint root is not valid UTF-8: {}", root_dir.display()))?;
    write_atomic(&pointer, format!("{root}\n").as_bytes())
}
