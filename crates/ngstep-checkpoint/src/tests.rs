use super::*;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ngstep_core::{UpgradeError, VersionId};
use tempfile::TempDir;

use crate::fs_utils::collect_tracked_files;

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent");
    }
    fs::write(path, content).expect("must write file");
}

fn test_project() -> (TempDir, ProjectLayout) {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();
    write(
        root,
        "package.json",
        "{\n  \"dependencies\": {\n    \"@angular/core\": \"^12.2.0\"\n  }\n}\n",
    );
    write(root, "angular.json", "{\"version\": 1}\n");
    write(root, "src/main.ts", "bootstrap();\n");
    write(root, "src/app/app.module.ts", "export class AppModule {}\n");
    write(root, "src/tmp/keep.ts", "// nested tmp is project source\n");
    write(root, "node_modules/@angular/core/package.json", "{}\n");
    write(root, ".git/HEAD", "ref: refs/heads/main\n");
    write(root, "dist/main.js", "compiled\n");
    let layout = ProjectLayout::new(root);
    (dir, layout)
}

fn tracked_state(layout: &ProjectLayout) -> BTreeMap<String, Vec<u8>> {
    collect_tracked_files(layout)
        .expect("must list tracked files")
        .into_iter()
        .map(|relative| {
            let bytes = fs::read(layout.project_root().join(&relative)).expect("must read");
            (relative.to_string_lossy().replace('\\', "/"), bytes)
        })
        .collect()
}

fn upgrade_error(err: &anyhow::Error) -> &UpgradeError {
    err.downcast_ref::<UpgradeError>()
        .expect("error must carry an UpgradeError")
}

#[test]
fn layout_paths_live_under_state_dir() {
    let layout = ProjectLayout::new("/work/app");
    assert_eq!(layout.state_dir(), Path::new("/work/app/.ng-upgrade"));
    assert_eq!(
        layout.checkpoint_index_path(),
        Path::new("/work/app/.ng-upgrade/checkpoints/index.json")
    );
    assert_eq!(
        layout.checkpoint_snapshot_path("cp-1-1"),
        Path::new("/work/app/.ng-upgrade/checkpoints/cp-1-1/snapshot.json")
    );
    assert_eq!(
        layout.active_run_path(),
        Path::new("/work/app/.ng-upgrade/active-run")
    );
    assert_eq!(
        layout.run_journal_path("run-7"),
        Path::new("/work/app/.ng-upgrade/runs/run-7.journal")
    );

    let relocated =
        ProjectLayout::new("/work/app").with_checkpoints_root(Some("/backups/app".into()));
    assert_eq!(
        relocated.checkpoint_dir("cp-1-1"),
        Path::new("/backups/app/cp-1-1")
    );
    assert_eq!(relocated.runs_dir(), Path::new("/work/app/.ng-upgrade/runs"));
}

#[test]
fn tracked_files_skip_dependency_and_build_directories() {
    let (_dir, layout) = test_project();
    let tracked = tracked_state(&layout);
    assert_eq!(
        tracked.keys().map(String::as_str).collect::<Vec<_>>(),
        vec![
            "angular.json",
            "package.json",
            "src/app/app.module.ts",
            "src/main.ts",
            "src/tmp/keep.ts",
        ]
    );
}

#[test]
fn create_records_checkpoint_and_snapshot() {
    let (_dir, layout) = test_project();
    let store = CheckpointStore::new(layout.clone());

    let checkpoint = store
        .create(VersionId::new(12), "before 12 -> 13")
        .expect("must create checkpoint");

    assert!(checkpoint.id.starts_with("cp-"));
    assert_eq!(checkpoint.version, VersionId::new(12));
    assert_eq!(checkpoint.sequence, 1);
    assert_eq!(
        checkpoint.snapshot_ref,
        format!("{}/snapshot.json", checkpoint.id)
    );
    assert!(layout.checkpoint_files_dir(&checkpoint.id).join("src/main.ts").is_file());
    assert!(!layout
        .checkpoint_files_dir(&checkpoint.id)
        .join("node_modules")
        .exists());

    let manifest = store
        .snapshot_manifest(&checkpoint.id)
        .expect("must read snapshot manifest");
    assert_eq!(manifest.files.len(), 5);
    assert_eq!(manifest.status, "ready");
    assert_eq!(store.list().expect("must list"), vec![checkpoint]);
    assert_eq!(
        fs::read_dir(layout.checkpoint_staging_dir())
            .expect("staging dir")
            .count(),
        0
    );
}

#[test]
fn restore_reproduces_captured_state_exactly() {
    let (_dir, layout) = test_project();
    let store = CheckpointStore::new(layout.clone());
    let before = tracked_state(&layout);
    let checkpoint = store
        .create(VersionId::new(12), "baseline")
        .expect("must create checkpoint");

    let root = layout.project_root();
    write(root, "package.json", "{\"dependencies\": {\"@angular/core\": \"^13.0.0\"}}\n");
    write(root, "src/app/new.component.ts", "export class NewComponent {}\n");
    write(root, "src/generated/deep/file.ts", "generated\n");
    fs::remove_file(root.join("src/main.ts")).expect("must remove file");
    write(root, "node_modules/@angular/core/index.js", "untracked\n");

    store.restore(&checkpoint.id).expect("must restore");

    assert_eq!(tracked_state(&layout), before);
    assert!(!root.join("src/generated").exists());
    assert!(root.join("node_modules/@angular/core/index.js").is_file());
}

#[test]
fn restore_unknown_checkpoint_fails_with_not_found() {
    let (_dir, layout) = test_project();
    let store = CheckpointStore::new(layout);
    let err = store.restore("cp-0-0").expect_err("unknown id must fail");
    assert_eq!(
        upgrade_error(&err),
        &UpgradeError::CheckpointNotFound {
            id: "cp-0-0".to_string()
        }
    );
}

#[test]
fn restore_refuses_tampered_file_without_touching_project() {
    let (_dir, layout) = test_project();
    let store = CheckpointStore::new(layout.clone());
    let checkpoint = store
        .create(VersionId::new(12), "baseline")
        .expect("must create checkpoint");

    write(layout.project_root(), "src/main.ts", "changed after capture\n");
    let modified = tracked_state(&layout);
    write(
        &layout.checkpoint_files_dir(&checkpoint.id),
        "angular.json",
        "{\"version\": 2}\n",
    );

    let err = store.restore(&checkpoint.id).expect_err("must detect tampering");
    match upgrade_error(&err) {
        UpgradeError::CorruptSnapshot { id, reason } => {
            assert_eq!(id, &checkpoint.id);
            assert!(reason.contains("angular.json"), "reason: {reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(tracked_state(&layout), modified);
}

#[test]
fn restore_refuses_missing_and_unlisted_files() {
    let (_dir, layout) = test_project();
    let store = CheckpointStore::new(layout.clone());
    let first = store.create(VersionId::new(12), "first").expect("create");
    let second = store.create(VersionId::new(13), "second").expect("create");

    fs::remove_file(layout.checkpoint_files_dir(&first.id).join("src/main.ts"))
        .expect("must remove stored file");
    write(
        &layout.checkpoint_files_dir(&second.id),
        "src/injected.ts",
        "not captured\n",
    );

    for id in [&first.id, &second.id] {
        let err = store.restore(id).expect_err("must detect corruption");
        assert!(matches!(
            upgrade_error(&err),
            UpgradeError::CorruptSnapshot { .. }
        ));
    }
}

#[test]
fn restore_refuses_tampered_snapshot_manifest() {
    let (_dir, layout) = test_project();
    let store = CheckpointStore::new(layout.clone());
    let checkpoint = store.create(VersionId::new(12), "baseline").expect("create");

    let path = layout.checkpoint_snapshot_path(&checkpoint.id);
    let mut manifest: SnapshotManifest =
        serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
    manifest.files.retain(|entry| entry.path != "angular.json");
    fs::write(&path, serde_json::to_string(&manifest).expect("serialize")).expect("write");

    let err = store.restore(&checkpoint.id).expect_err("must detect digest mismatch");
    match upgrade_error(&err) {
        UpgradeError::CorruptSnapshot { reason, .. } => {
            assert!(reason.contains("digest"), "reason: {reason}")
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn list_orders_oldest_first_with_increasing_sequence() {
    let (_dir, layout) = test_project();
    let store = CheckpointStore::new(layout);
    let created = (12..15)
        .map(|major| {
            store
                .create(VersionId::new(major), &format!("before {major}"))
                .expect("create")
        })
        .collect::<Vec<_>>();

    let listed = store.list().expect("list");
    assert_eq!(listed, created);
    for pair in listed.windows(2) {
        assert!(pair[0].order_key() < pair[1].order_key());
        assert!(pair[0].sequence < pair[1].sequence);
    }
    assert_eq!(store.latest().expect("latest"), created.last().cloned());
}

#[test]
fn prune_keeps_most_recent_checkpoints() {
    let (_dir, layout) = test_project();
    let store = CheckpointStore::new(layout.clone());
    let created = (0..8)
        .map(|index| {
            store
                .create(VersionId::new(12), &format!("checkpoint {index}"))
                .expect("create")
        })
        .collect::<Vec<_>>();

    let removed = store.prune(5).expect("prune");
    assert_eq!(removed, created[..3].to_vec());
    assert_eq!(store.list().expect("list"), created[3..].to_vec());
    for checkpoint in &removed {
        assert!(!layout.checkpoint_dir(&checkpoint.id).exists());
    }

    assert!(store.prune(5).expect("prune again").is_empty());
    assert_eq!(store.list().expect("list").len(), 5);
}

#[test]
fn restore_and_discard_later_drops_newer_checkpoints() {
    let (_dir, layout) = test_project();
    let store = CheckpointStore::new(layout.clone());
    let baseline_state = tracked_state(&layout);
    let baseline = store.create(VersionId::new(12), "baseline").expect("create");

    write(layout.project_root(), "src/main.ts", "v13\n");
    let later = store.create(VersionId::new(13), "after 13").expect("create");
    write(layout.project_root(), "src/main.ts", "v14\n");
    let latest = store.create(VersionId::new(14), "after 14").expect("create");

    let outcome = store
        .restore_and_discard_later(&baseline.id)
        .expect("must restore");

    assert_eq!(outcome.restored, baseline);
    assert_eq!(outcome.discarded, vec![later.clone(), latest.clone()]);
    assert_eq!(store.list().expect("list"), vec![baseline]);
    assert_eq!(tracked_state(&layout), baseline_state);
    assert!(!layout.checkpoint_dir(&later.id).exists());
    assert!(!layout.checkpoint_dir(&latest.id).exists());
}

#[test]
fn relocated_checkpoints_inside_project_are_not_captured() {
    let (dir, _) = test_project();
    let backups = dir.path().join("backups");
    let layout = ProjectLayout::new(dir.path()).with_checkpoints_root(Some(backups.clone()));
    let store = CheckpointStore::new(layout);

    let first = store.create(VersionId::new(12), "first").expect("create");
    let second = store.create(VersionId::new(12), "second").expect("create");

    assert!(backups.join(&first.id).join("snapshot.json").is_file());
    let manifest = store.snapshot_manifest(&second.id).expect("manifest");
    assert!(manifest
        .files
        .iter()
        .all(|entry| !entry.path.starts_with("backups/")));
}

#[test]
fn recorded_checkpoint_root_is_followed_until_cleared() {
    let (dir, configured) = test_project();
    let elsewhere = tempfile::tempdir().expect("tempdir");
    let effective = configured
        .clone()
        .with_checkpoints_root(Some(elsewhere.path().join("backups")));

    record_checkpoints_root(&configured, &effective).expect("must record");
    let followed = ProjectLayout::new(dir.path())
        .with_recorded_checkpoints_root()
        .expect("must follow");
    assert_eq!(followed.checkpoints_dir(), elsewhere.path().join("backups"));

    record_checkpoints_root(&configured, &configured).expect("must clear");
    assert!(!configured.checkpoints_pointer_path().exists());
    let followed = ProjectLayout::new(dir.path())
        .with_recorded_checkpoints_root()
        .expect("must follow");
    assert_eq!(followed.checkpoints_dir(), configured.checkpoints_dir());
}

#[test]
fn active_run_claim_is_exclusive() {
    let (_dir, layout) = test_project();
    let guard = claim_active_run(&layout, "run-first").expect("must claim");
    assert_eq!(guard.run_id(), "run-first");
    assert_eq!(
        read_active_run(&layout).expect("read").as_deref(),
        Some("run-first")
    );

    let err = claim_active_run(&layout, "run-second").expect_err("second claim must fail");
    assert_eq!(
        upgrade_error(&err),
        &UpgradeError::RunInProgress {
            run_id: "run-first".to_string()
        }
    );

    guard.release().expect("must release");
    assert!(read_active_run(&layout).expect("read").is_none());
    let again = claim_active_run(&layout, "run-second").expect("must reclaim");
    drop(again);
    assert!(!layout.active_run_path().exists());
}

#[test]
fn run_metadata_round_trip_and_status_update() {
    let (_dir, layout) = test_project();
    let mut metadata = RunMetadata::new("run-1", "upgrade");
    metadata.from_version = Some(VersionId::new(12));
    metadata.to_version = Some(VersionId::new(15));
    write_run_metadata(&layout, &metadata).expect("must write metadata");

    assert_eq!(
        read_run_metadata(&layout, "run-1").expect("read"),
        Some(metadata.clone())
    );

    update_run_status(&layout, "run-1", RunStatus::RolledBack).expect("must update");
    let updated = read_run_metadata(&layout, "run-1")
        .expect("read")
        .expect("metadata exists");
    assert_eq!(updated.status, RunStatus::RolledBack);
    let raw = fs::read_to_string(layout.run_metadata_path("run-1")).expect("read raw");
    assert!(raw.contains("\"status\": \"rolled-back\""));

    assert!(read_run_metadata(&layout, "run-missing").expect("read").is_none());
    assert!(update_run_status(&layout, "run-missing", RunStatus::Failed).is_err());
}

#[test]
fn run_journal_entries_append_in_order() {
    let (_dir, layout) = test_project();
    let entries = vec![
        RunJournalEntry {
            seq: 1,
            state: "planning".to_string(),
            step: None,
            detail: Some("12 -> 14".to_string()),
        },
        RunJournalEntry {
            seq: 2,
            state: "executing".to_string(),
            step: Some("12 -> 13".to_string()),
            detail: None,
        },
    ];
    for entry in &entries {
        append_run_journal_entry(&layout, "run-9", entry).expect("must append");
    }

    assert_eq!(read_run_journal(&layout, "run-9").expect("read"), entries);
    assert!(read_run_journal(&layout, "run-none").expect("read").is_empty());
    let raw = fs::read_to_string(layout.run_journal_path("run-9")).expect("raw");
    assert_eq!(raw.lines().count(), 2);
    assert!(!raw.lines().next().unwrap_or_default().contains("\"step\""));
}

#[test]
fn run_ids_are_unique_within_process() {
    let first = new_run_id();
    let second = new_run_id();
    assert!(first.starts_with("run-"));
    assert_ne!(first, second);
}
