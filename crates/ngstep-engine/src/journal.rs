use ngstep_checkpoint::{
    append_run_journal_entry, update_run_status, write_run_metadata, ProjectLayout,
    RunJournalEntry, RunMetadata, RunStatus,
};
use ngstep_core::UpgradeStep;
use tracing::warn;

/// Records a run's transitions under `.ng-upgrade/runs/`.
///
/// The journal is diagnostic: a write failure is logged and never changes the
/// outcome of the run.
#[derive(Debug)]
pub(crate) struct RunJournal<'a> {
    layout: &'a ProjectLayout,
    run_id: String,
    seq: u64,
}

impl<'a> RunJournal<'a> {
    pub(crate) fn start(layout: &'a ProjectLayout, metadata: &RunMetadata) -> Self {
        if let Err(err) = write_run_metadata(layout, metadata) {
            warn!(run_id = %metadata.run_id, error = %format!("{err:#}"), "failed to write run metadata");
        }
        Self {
            layout,
            run_id: metadata.run_id.clone(),
            seq: 0,
        }
    }

    pub(crate) fn record(&mut self, state: &str, step: Option<&UpgradeStep>, detail: Option<String>) {
        self.seq += 1;
        let entry = RunJournalEntry {
            seq: self.seq,
            state: state.to_string(),
            step: step.map(ToString::to_string),
            detail,
        };
        if let Err(err) = append_run_journal_entry(self.layout, &self.run_id, &entry) {
            warn!(run_id = %self.run_id, error = %format!("{err:#}"), "failed to append run journal");
        }
    }

    pub(crate) fn status(&mut self, status: RunStatus) {
        if let Err(err) = update_run_status(self.layout, &self.run_id, status) {
            warn!(run_id = %self.run_id, error = %format!("{err:#}"), "failed to update run status");
        }
        self.record(status.as_str(), None, None);
    }
}
