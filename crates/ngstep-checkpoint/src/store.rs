use std::fs;
use std::io;

use anyhow::{Context, Result};
use ngstep_core::{Checkpoint, UpgradeError, VersionId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::fs_utils::{current_unix_timestamp_ms, remove_dir_if_exists, write_atomic};
use crate::layout::ProjectLayout;
use crate::snapshot::{
    apply_snapshot, capture_snapshot, read_snapshot_manifest, verify_snapshot, SnapshotManifest,
};

const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CheckpointIndexFile {
    version: u32,
    #[serde(default)]
    checkpoints: Vec<Checkpoint>,
}

/// Result of an explicit rollback: the restored checkpoint and the later
/// checkpoints that were discarded with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub restored: Checkpoint,
    pub discarded: Vec<Checkpoint>,
}

/// Durable snapshots of a project's tracked files.
///
/// The index is the source of truth: a checkpoint exists once its entry is in
/// `index.json`, and the entry is written only after the snapshot directory is
/// complete. Typed failures (`CheckpointNotFound`, `CorruptSnapshot`) are
/// returned as [`UpgradeError`] inside the `anyhow::Error`.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    layout: ProjectLayout,
}

impl CheckpointStore {
    pub fn new(layout: ProjectLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn create(&self, version: VersionId, description: &str) -> Result<Checkpoint> {
        self.layout.ensure_base_dirs()?;
        let mut checkpoints = self.list()?;

        let sequence = checkpoints
            .iter()
            .map(|checkpoint| checkpoint.sequence + 1)
            .max()
            .unwrap_or(1);
        // Never step backwards behind the newest checkpoint, even if the clock does.
        let timestamp_unix_ms = checkpoints
            .last()
            .map(|latest| latest.timestamp_unix_ms)
            .unwrap_or(0)
            .max(current_unix_timestamp_ms());
        let id = format!("cp-{timestamp_unix_ms}-{sequence}");

        let staging = self.layout.checkpoint_staging_path(&id);
        remove_dir_if_exists(&staging)
            .with_context(|| format!("failed clearing staging directory {}", staging.display()))?;
        let captured = capture_snapshot(&self.layout, &staging, &id, version, timestamp_unix_ms);
        if let Err(err) = captured {
            let _ = remove_dir_if_exists(&staging);
            return Err(err.context(format!("failed capturing checkpoint {id}")));
        }

        let destination = self.layout.checkpoint_dir(&id);
        remove_dir_if_exists(&destination).with_context(|| {
            format!("failed clearing checkpoint directory {}", destination.display())
        })?;
        fs::rename(&staging, &destination).with_context(|| {
            format!(
                "failed moving checkpoint {} into place at {}",
                staging.display(),
                destination.display()
            )
        })?;

        let checkpoint = Checkpoint {
            snapshot_ref: format!("{id}/snapshot.json"),
            id,
            version,
            timestamp_unix_ms,
            sequence,
            description: description.to_string(),
        };
        checkpoints.push(checkpoint.clone());
        self.write_index(&checkpoints)?;

        info!(
            checkpoint = %checkpoint.id,
            version = %version,
            description,
            "created checkpoint"
        );
        Ok(checkpoint)
    }

    /// Checkpoints oldest first.
    pub fn list(&self) -> Result<Vec<Checkpoint>> {
        let path = self.layout.checkpoint_index_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed reading checkpoint index {}", path.display()));
            }
        };

        let index: CheckpointIndexFile = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing checkpoint index {}", path.display()))?;
        let mut checkpoints = index.checkpoints;
        checkpoints.sort_by_key(Checkpoint::order_key);
        Ok(checkpoints)
    }

    pub fn get(&self, id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.list()?.into_iter().find(|checkpoint| checkpoint.id == id))
    }

    pub fn latest(&self) -> Result<Option<Checkpoint>> {
        Ok(self.list()?.pop())
    }

    pub fn snapshot_manifest(&self, id: &str) -> Result<SnapshotManifest> {
        self.require(id)?;
        read_snapshot_manifest(&self.layout.checkpoint_snapshot_path(id))
    }

    /// Verifies the whole snapshot, then makes the project match it.
    pub fn restore(&self, id: &str) -> Result<Checkpoint> {
        let checkpoint = self.require(id)?;
        let checkpoint_dir = self.layout.checkpoint_dir(id);
        let manifest = verify_snapshot(&checkpoint_dir, id).map_err(|reason| {
            warn!(checkpoint = id, %reason, "refusing to restore corrupt snapshot");
            UpgradeError::CorruptSnapshot {
                id: id.to_string(),
                reason,
            }
        })?;

        apply_snapshot(&self.layout, &checkpoint_dir, &manifest)
            .with_context(|| format!("failed applying checkpoint {id}"))?;
        info!(
            checkpoint = id,
            version = %checkpoint.version,
            files = manifest.files.len(),
            "restored checkpoint"
        );
        Ok(checkpoint)
    }

    /// Restores `id` and discards every checkpoint taken after it.
    pub fn restore_and_discard_later(&self, id: &str) -> Result<RestoreOutcome> {
        let restored = self.restore(id)?;
        let (kept, discarded): (Vec<_>, Vec<_>) = self
            .list()?
            .into_iter()
            .partition(|checkpoint| checkpoint.order_key() <= restored.order_key());
        self.remove_checkpoints(&kept, &discarded)?;
        Ok(RestoreOutcome {
            restored,
            discarded,
        })
    }

    /// Keeps the `keep` most recent checkpoints, removing older ones first.
    pub fn prune(&self, keep: usize) -> Result<Vec<Checkpoint>> {
        let mut checkpoints = self.list()?;
        if checkpoints.len() <= keep {
            return Ok(Vec::new());
        }
        let kept = checkpoints.split_off(checkpoints.len() - keep);
        let removed = checkpoints;
        self.remove_checkpoints(&kept, &removed)?;
        info!(kept = kept.len(), removed = removed.len(), "pruned checkpoints");
        Ok(removed)
    }

    fn require(&self, id: &str) -> Result<Checkpoint> {
        self.get(id)?.ok_or_else(|| {
            UpgradeError::CheckpointNotFound { id: id.to_string() }.into()
        })
    }

    /// Rewrites the index first, so a crash leaves orphan directories rather
    /// than index entries pointing at nothing.
    fn remove_checkpoints(&self, kept: &[Checkpoint], removed: &[Checkpoint]) -> Result<()> {
        if removed.is_empty() {
            return Ok(());
        }
        self.write_index(kept)?;
        for checkpoint in removed {
            let dir = self.layout.checkpoint_dir(&checkpoint.id);
            remove_dir_if_exists(&dir)
                .with_context(|| format!("failed removing checkpoint {}", dir.display()))?;
            debug!(checkpoint = %checkpoint.id, "removed checkpoint");
        }
        Ok(())
    }

    fn write_index(&self, checkpoints: &[Checkpoint]) -> Result<()> {
        let path = self.layout.checkpoint_index_path();
        let index = CheckpointIndexFile {
            version: INDEX_FORMAT_VERSION,
            checkpoints: checkpoints.to_vec(),
        };
        let content = serde_json::to_string_pretty(&index)
            .with_context(|| format!("failed serializing checkpoint index {}", path.display()))?;
        write_atomic(&path, content.as_bytes())
    }
}
