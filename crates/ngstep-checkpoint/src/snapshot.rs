use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use ngstep_core::VersionId;
use ngstep_security::{sha256_file_hex, sha256_hex, verify_sha256, verify_sha256_file};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fs_utils::{
    collect_relative_file_paths, collect_tracked_files, copy_file_creating_parents,
    normalize_path_for_snapshot, prune_empty_parents, snapshot_path_to_relative,
};
use crate::layout::ProjectLayout;

const SNAPSHOT_FORMAT_VERSION: u32 = 1;
const STATUS_READY: &str = "ready";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub path: String,
    pub sha256: String,
    pub size: u64,
}

/// Contents of `<checkpoint>/snapshot.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub version: u32,
    pub checkpoint_id: String,
    pub framework_version: VersionId,
    pub captured_at_unix_ms: u64,
    pub files: Vec<SnapshotEntry>,
    pub digest: String,
    pub status: String,
}

/// Copies every tracked project file into `<staging>/files` and writes the
/// snapshot manifest beside it.
pub(crate) fn capture_snapshot(
    layout: &ProjectLayout,
    staging_dir: &Path,
    checkpoint_id: &str,
    version: VersionId,
    captured_at_unix_ms: u64,
) -> Result<SnapshotManifest> {
    let files_dir = staging_dir.join("files");
    fs::create_dir_all(&files_dir)
        .with_context(|| format!("failed creating snapshot directory {}", files_dir.display()))?;

    let mut entries = Vec::new();
    for relative_path in collect_tracked_files(layout)? {
        let source = layout.project_root().join(&relative_path);
        let destination = files_dir.join(&relative_path);
        copy_file_creating_parents(&source, &destination)?;

        // Digest the copy, so a file changed mid-capture cannot disagree with its digest.
        let sha256 = sha256_file_hex(&destination)?;
        let size = fs::metadata(&destination)
            .with_context(|| format!("failed reading metadata {}", destination.display()))?
            .len();
        entries.push(SnapshotEntry {
            path: normalize_path_for_snapshot(&relative_path),
            sha256,
            size,
        });
    }

    let manifest = SnapshotManifest {
        version: SNAPSHOT_FORMAT_VERSION,
        checkpoint_id: checkpoint_id.to_string(),
        framework_version: version,
        captured_at_unix_ms,
        digest: compute_snapshot_digest(&entries),
        files: entries,
        status: STATUS_READY.to_string(),
    };

    let snapshot_path = staging_dir.join("snapshot.json");
    let content = serde_json::to_string_pretty(&manifest)
        .with_context(|| format!("failed serializing snapshot {}", snapshot_path.display()))?;
    fs::write(&snapshot_path, content)
        .with_context(|| format!("failed writing snapshot {}", snapshot_path.display()))?;

    debug!(
        checkpoint = checkpoint_id,
        files = manifest.files.len(),
        digest = %manifest.digest,
        "captured project snapshot"
    );
    Ok(manifest)
}

/// Checks a stored snapshot end to end. Any mismatch is returned as the reason
/// the snapshot cannot be applied.
pub(crate) fn verify_snapshot(
    checkpoint_dir: &Path,
    checkpoint_id: &str,
) -> std::result::Result<SnapshotManifest, String> {
    let snapshot_path = checkpoint_dir.join("snapshot.json");
    let content = fs::read_to_string(&snapshot_path)
        .map_err(|err| format!("snapshot manifest unreadable: {err}"))?;
    let manifest: SnapshotManifest = serde_json::from_str(&content)
        .map_err(|err| format!("snapshot manifest invalid: {err}"))?;

    if manifest.version != SNAPSHOT_FORMAT_VERSION {
        return Err(format!(
            "unsupported snapshot format version {}",
            manifest.version
        ));
    }
    if manifest.checkpoint_id != checkpoint_id {
        return Err(format!(
            "snapshot belongs to checkpoint '{}'",
            manifest.checkpoint_id
        ));
    }
    if manifest.status != STATUS_READY {
        return Err(format!("snapshot status is '{}'", manifest.status));
    }
    if !verify_sha256(&snapshot_digest_input(&manifest.files), &manifest.digest) {
        return Err("aggregate digest mismatch".to_string());
    }

    let files_dir = checkpoint_dir.join("files");
    let mut expected = BTreeSet::new();
    for entry in &manifest.files {
        let relative = snapshot_path_to_relative(&entry.path).map_err(|err| err.to_string())?;
        let stored = files_dir.join(&relative);
        let intact = verify_sha256_file(&stored, &entry.sha256)
            .map_err(|_| format!("stored file '{}' is missing or unreadable", entry.path))?;
        if !intact {
            return Err(format!("stored file '{}' digest mismatch", entry.path));
        }
        expected.insert(entry.path.clone());
    }

    let present = if files_dir.exists() {
        collect_relative_file_paths(&files_dir).map_err(|err| format!("{err:#}"))?
    } else {
        Vec::new()
    };
    if let Some(extra) = present
        .iter()
        .map(|path| normalize_path_for_snapshot(path))
        .find(|path| !expected.contains(path))
    {
        return Err(format!("stored file '{extra}' is not listed in the snapshot"));
    }

    Ok(manifest)
}

/// Makes the project's tracked files equal to a verified snapshot.
pub(crate) fn apply_snapshot(
    layout: &ProjectLayout,
    checkpoint_dir: &Path,
    manifest: &SnapshotManifest,
) -> Result<()> {
    let root = layout.project_root();
    let files_dir = checkpoint_dir.join("files");
    let keep = manifest
        .files
        .iter()
        .map(|entry| entry.path.as_str())
        .collect::<BTreeSet<_>>();

    for relative_path in collect_tracked_files(layout)? {
        if keep.contains(normalize_path_for_snapshot(&relative_path).as_str()) {
            continue;
        }
        let path = root.join(&relative_path);
        fs::remove_file(&path)
            .with_context(|| format!("failed removing untracked file {}", path.display()))?;
        prune_empty_parents(&path, root);
    }

    for entry in &manifest.files {
        let relative = snapshot_path_to_relative(&entry.path)?;
        let destination = root.join(&relative);
        if destination.is_dir() {
            fs::remove_dir_all(&destination).with_context(|| {
                format!("failed clearing directory {}", destination.display())
            })?;
        }
        copy_file_creating_parents(&files_dir.join(&relative), &destination)?;
    }

    Ok(())
}

/// `sha256(path \0 file-digest \0 ...)` over entries in path order.
pub(crate) fn compute_snapshot_digest(entries: &[SnapshotEntry]) -> String {
    sha256_hex(&snapshot_digest_input(entries))
}

fn snapshot_digest_input(entries: &[SnapshotEntry]) -> Vec<u8> {
    let mut ordered = entries.iter().collect::<Vec<_>>();
    ordered.sort_by(|a, b| a.path.cmp(&b.path));

    let mut input = Vec::new();
    for entry in ordered {
        input.extend_from_slice(entry.path.as_bytes());
        input.push(0);
        input.extend_from_slice(entry.sha256.as_bytes());
        input.push(0);
    }
    input
}

pub(crate) fn read_snapshot_manifest(path: &Path) -> Result<SnapshotManifest> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed reading snapshot manifest {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed parsing snapshot manifest {}", path.display()))
}
