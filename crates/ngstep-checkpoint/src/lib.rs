mod fs_utils;
mod layout;
mod runs;
mod snapshot;
mod store;

pub use fs_utils::{current_unix_timestamp_ms, remove_dir_if_exists, remove_file_if_exists};
pub use layout::{
    record_checkpoints_root, ProjectLayout, EXCLUDED_ANYWHERE, EXCLUDED_AT_ROOT,
    MANIFEST_FILE_NAME, STATE_DIR_NAME,
};
pub use runs::{
    append_run_journal_entry, claim_active_run, new_run_id, read_active_run, read_run_journal,
    read_run_metadata, update_run_status, write_run_metadata, ActiveRun, RunJournalEntry,
    RunMetadata, RunStatus,
};
pub use snapshot::{SnapshotEntry, SnapshotManifest};
pub use store::{CheckpointStore, RestoreOutcome};

#[cfg(test)]
mod tests;
