use ngstep_core::{
    CompatibilityReport, ManualIntervention, OrchestratorState, UpgradeError, UpgradeStep,
};

/// Notifications emitted by a run, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeEvent {
    Progress {
        message: String,
    },
    StateChanged {
        state: OrchestratorState,
    },
    StepStart {
        step: UpgradeStep,
    },
    StepComplete {
        step: UpgradeStep,
    },
    StepFailed {
        step: UpgradeStep,
        error: UpgradeError,
    },
    /// `blocking` is set when the run waits on [`UpgradeObserver::resolve_intervention`].
    ManualIntervention {
        step: UpgradeStep,
        intervention: ManualIntervention,
        blocking: bool,
    },
}

impl UpgradeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::StateChanged { .. } => "state-changed",
            Self::StepStart { .. } => "step-start",
            Self::StepComplete { .. } => "step-complete",
            Self::StepFailed { .. } => "step-failed",
            Self::ManualIntervention { .. } => "manual-intervention",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterventionResolution {
    /// Leave the manifest as it is and record the outstanding updates as warnings.
    Continue,
    /// Write the reported updates into the manifest, then continue.
    ApplyUpdates,
    /// Stop the run as cancelled. Nothing is rolled back.
    Abort,
}

/// Receives run events. `resolve_intervention` is the one place a run waits
/// on its caller; it blocks for as long as the implementation does.
pub trait UpgradeObserver {
    fn on_event(&mut self, event: &UpgradeEvent);

    fn resolve_intervention(
        &mut self,
        _step: &UpgradeStep,
        _intervention: &ManualIntervention,
        _report: &CompatibilityReport,
    ) -> InterventionResolution {
        InterventionResolution::Continue
    }
}

/// Ignores events and continues past every intervention.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl UpgradeObserver for SilentObserver {
    fn on_event(&mut self, _event: &UpgradeEvent) {}
}
