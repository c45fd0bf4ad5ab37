use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};

use crate::layout::{ProjectLayout, EXCLUDED_ANYWHERE, EXCLUDED_AT_ROOT};

pub fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

pub fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)?;
    }
    Ok(())
}

/// Relative paths of every tracked project file, sorted.
pub(crate) fn collect_tracked_files(layout: &ProjectLayout) -> Result<Vec<PathBuf>> {
    let root = layout.project_root();
    let mut paths = Vec::new();
    let mut queue: VecDeque<PathBuf> = VecDeque::new();
    queue.push_back(root.to_path_buf());

    while let Some(dir) = queue.pop_front() {
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed reading project directory {}", dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                if is_excluded_dir(layout, &dir, &entry.file_name().to_string_lossy(), &path) {
                    continue;
                }
                queue.push_back(path);
            } else if file_type.is_file() {
                let relative_path = path.strip_prefix(root).with_context(|| {
                    format!(
                        "failed deriving project relative path {} from {}",
                        path.display(),
                        root.display()
                    )
                })?;
                paths.push(relative_path.to_path_buf());
            }
        }
    }

    paths.sort();
    Ok(paths)
}

fn is_excluded_dir(layout: &ProjectLayout, parent: &Path, name: &str, path: &Path) -> bool {
    if EXCLUDED_ANYWHERE.contains(&name) || layout.is_state_path(path) {
        return true;
    }
    parent == layout.project_root() && EXCLUDED_AT_ROOT.contains(&name)
}

/// Relative paths of every regular file under `root`.
pub(crate) fn collect_relative_file_paths(root: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    let mut queue: VecDeque<PathBuf> = VecDeque::new();
    queue.push_back(root.to_path_buf());

    while let Some(dir) = queue.pop_front() {
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed reading snapshot directory {}", dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                queue.push_back(path);
            } else if file_type.is_file() {
                let relative_path = path.strip_prefix(root).with_context(|| {
                    format!(
                        "failed deriving snapshot relative path {} from {}",
                        path.display(),
                        root.display()
                    )
                })?;
                paths.push(relative_path.to_path_buf());
            }
        }
    }

    paths.sort();
    Ok(paths)
}

pub(crate) fn normalize_path_for_snapshot(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Turns a stored `a/b/c` path back into a relative path, refusing anything
/// that could escape the directory it is joined onto.
pub(crate) fn snapshot_path_to_relative(stored: &str) -> Result<PathBuf> {
    let relative = stored.split('/').collect::<PathBuf>();
    let escapes = stored.is_empty()
        || relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
    if escapes {
        return Err(anyhow!("snapshot path '{stored}' is not a plain relative path"));
    }
    Ok(relative)
}

pub(crate) fn copy_file_creating_parents(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating directory {}", parent.display()))?;
    }
    fs::copy(from, to).with_context(|| {
        format!(
            "failed copying file from {} to {}",
            from.display(),
            to.display()
        )
    })?;
    Ok(())
}

/// Writes `content` next to `path` and renames it into place.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("path has no parent directory: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = parent.join(format!(".{file_name}.tmp-{}", std::process::id()));
    fs::write(&tmp_path, content)
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "failed to move {} into place at {}",
            tmp_path.display(),
            path.display()
        )
    })
}

/// Removes now-empty directories between `start` and `stop` (exclusive).
pub(crate) fn prune_empty_parents(start: &Path, stop: &Path) {
    let mut current = start.parent();
    while let Some(dir) = current {
        if dir == stop || !dir.starts_with(stop) {
            break;
        }
        if fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

pub fn current_unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
