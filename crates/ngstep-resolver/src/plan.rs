use ngstep_core::{UpgradeError, UpgradeStep, VersionId};
use tracing::debug;

use crate::ecosystem::EcosystemTable;

/// One step per consecutive major between `current` (exclusive) and `target` (inclusive).
pub fn plan(current: VersionId, target: VersionId) -> Result<Vec<UpgradeStep>, UpgradeError> {
    if current >= target {
        return Err(UpgradeError::InvalidRange { current, target });
    }

    let steps = (current.major()..target.major())
        .enumerate()
        .map(|(index, major)| UpgradeStep {
            from_version: VersionId::new(major),
            to_version: VersionId::new(major + 1),
            ordinal: index + 1,
        })
        .collect::<Vec<_>>();
    debug!(%current, %target, steps = steps.len(), "planned upgrade path");
    Ok(steps)
}

/// Like [`plan`], but refuses ranges the compatibility table cannot describe.
pub fn plan_within(
    current: VersionId,
    target: VersionId,
    table: &EcosystemTable,
) -> Result<Vec<UpgradeStep>, UpgradeError> {
    if !table.supports(current) || !table.supports(target) {
        return Err(UpgradeError::InvalidRange { current, target });
    }
    plan(current, target)
}
