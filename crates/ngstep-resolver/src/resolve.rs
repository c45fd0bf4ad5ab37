use std::collections::BTreeSet;

use ngstep_core::{
    CompatibilityReport, CriticalDependency, DeclaredDependency, DependencyKind, DependencyUpdate,
    ProjectManifest, UpdateType, UpgradeStrategy, VersionId,
};
use rayon::prelude::*;
use semver::Version;
use tracing::{debug, warn};

use crate::constraints::{classify_change, NpmRange};
use crate::ecosystem::{EcosystemTable, PackageCategory, PackageRule, RuleResolution};
use crate::types::ResolveOptions;

#[derive(Debug, Default)]
struct DependencyFinding {
    update: Option<DependencyUpdate>,
    deprecated: Option<String>,
    warnings: Vec<String>,
    blocker: Option<CriticalDependency>,
}

/// Maps a project's declared dependencies onto a target framework version.
///
/// Resolution only reads the manifest. A dependency that cannot be resolved
/// contributes a warning; it never fails the whole call.
#[derive(Debug, Clone)]
pub struct CompatibilityResolver {
    table: EcosystemTable,
}

impl CompatibilityResolver {
    pub fn new(table: EcosystemTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &EcosystemTable {
        &self.table
    }

    pub fn resolve(
        &self,
        manifest: &ProjectManifest,
        target: VersionId,
        options: &ResolveOptions,
    ) -> CompatibilityReport {
        let mut declared = manifest.declared_dependencies(options.include_dev_dependencies);
        let mut seen = BTreeSet::new();
        declared.retain(|dependency| seen.insert(dependency.name.clone()));

        let findings: Vec<DependencyFinding> = if options.parallel {
            declared
                .par_iter()
                .map(|dependency| self.resolve_dependency(dependency, target, options))
                .collect()
        } else {
            declared
                .iter()
                .map(|dependency| self.resolve_dependency(dependency, target, options))
                .collect()
        };

        let mut warnings = manifest
            .malformed_entries(options.include_dev_dependencies)
            .into_iter()
            .map(|name| format!("skipping '{name}': declared value is not a version range"))
            .collect::<Vec<_>>();
        let mut updates = Vec::new();
        let mut deprecated = Vec::new();
        let mut blockers = Vec::new();
        for finding in findings {
            updates.extend(finding.update);
            deprecated.extend(finding.deprecated);
            warnings.extend(finding.warnings);
            blockers.extend(finding.blocker);
        }

        let report = CompatibilityReport::new(target, updates, deprecated, warnings, blockers);
        debug!(
            target = %target,
            total_updates = report.total_updates,
            critical_updates = report.critical_updates,
            deprecated = report.deprecated.len(),
            warnings = report.warnings.len(),
            "resolved dependency compatibility"
        );
        report
    }

    fn resolve_dependency(
        &self,
        dependency: &DeclaredDependency,
        target: VersionId,
        options: &ResolveOptions,
    ) -> DependencyFinding {
        let mut finding = DependencyFinding::default();
        let Some(rule) = self.table.rule_for(&dependency.name) else {
            return finding;
        };
        if options.only_framework_ecosystem && !rule.first_party {
            return finding;
        }

        let range = match NpmRange::parse(&dependency.range) {
            Ok(range) => range,
            Err(err) => {
                warn!(package = %dependency.name, error = %err, "unresolvable dependency range");
                finding
                    .warnings
                    .push(format!("skipping '{}': {err:#}", dependency.name));
                return finding;
            }
        };
        let Some(current) = range.floor() else {
            finding.warnings.push(format!(
                "skipping '{}': range '{}' has no lower bound",
                dependency.name, range
            ));
            return finding;
        };

        let required = is_required(rule.category, options.update_strategy);
        let base = DependencyUpdate {
            name: dependency.name.clone(),
            current_version: current.clone(),
            compatible_version: None,
            recommended_range: None,
            update_type: UpdateType::Compatible,
            required,
            dev: dependency.kind == DependencyKind::Dev,
            replacement: None,
            notes: String::new(),
        };

        match rule.resolution_for(target) {
            RuleResolution::Unknown => {
                finding.warnings.push(format!(
                    "no compatibility data for '{}' on version {target}",
                    dependency.name
                ));
            }
            RuleResolution::Requirement(requirement) => {
                if requirement.matches(&current) {
                    finding.update = Some(DependencyUpdate {
                        compatible_version: Some(current),
                        notes: format!("'{range}' already satisfies {requirement}"),
                        ..base
                    });
                } else if let Some(floor) = requirement.floor() {
                    finding.update = Some(DependencyUpdate {
                        update_type: classify_change(&current, &floor),
                        compatible_version: Some(floor),
                        recommended_range: requirement.declarable_range(),
                        notes: with_rule_notes(
                            format!("version {target} requires {requirement}"),
                            rule,
                        ),
                        ..base
                    });
                } else {
                    finding.warnings.push(format!(
                        "cannot choose a version of '{}' for {target}: requirement {requirement} has no lower bound",
                        dependency.name
                    ));
                }
            }
            RuleResolution::Deprecated { successor } => {
                let replacement = successor.as_deref().and_then(|successor| {
                    self.successor_floor(successor, target)
                        .map(|(floor, declarable)| (successor.to_string(), floor, declarable))
                });
                match replacement {
                    Some((successor, floor, declarable)) => {
                        finding.update = Some(DependencyUpdate {
                            update_type: UpdateType::Major,
                            compatible_version: Some(floor),
                            recommended_range: declarable,
                            notes: with_rule_notes(format!("replaced by {successor}"), rule),
                            replacement: Some(successor),
                            ..base
                        });
                    }
                    None => {
                        finding.deprecated = Some(dependency.name.clone());
                        finding.update = Some(DependencyUpdate {
                            update_type: UpdateType::Deprecated,
                            notes: with_rule_notes(
                                format!("no release supports version {target}"),
                                rule,
                            ),
                            ..base
                        });
                        if required {
                            let blocker = CriticalDependency {
                                name: dependency.name.clone(),
                                target,
                            };
                            warn!(package = %dependency.name, %target, "blocking deprecated dependency");
                            finding
                                .warnings
                                .push(format!("blocking: {}", blocker.to_error()));
                            finding.blocker = Some(blocker);
                        }
                    }
                }
            }
        }

        finding
    }

    fn successor_floor(
        &self,
        successor: &str,
        target: VersionId,
    ) -> Option<(Version, Option<String>)> {
        match self.table.rule_for(successor)?.resolution_for(target) {
            RuleResolution::Requirement(requirement) => requirement
                .floor()
                .map(|floor| (floor, requirement.declarable_range())),
            _ => None,
        }
    }
}

/// Writes every actionable update that has a target range into `manifest`.
/// Returns one line per change made.
pub fn apply_updates(report: &CompatibilityReport, manifest: &mut ProjectManifest) -> Vec<String> {
    let mut applied = Vec::new();
    for update in report.actionable_updates() {
        let Some(range) = update.target_range() else {
            continue;
        };
        let changed = match &update.replacement {
            Some(successor) => manifest.replace_dependency(&update.name, successor, &range),
            None => manifest.set_dependency_range(&update.name, &range),
        };
        if changed {
            applied.push(match &update.replacement {
                Some(successor) => format!("{} -> {successor}@{range}", update.name),
                None => format!("{}@{range}", update.name),
            });
        }
    }
    applied
}

fn is_required(category: PackageCategory, strategy: UpgradeStrategy) -> bool {
    match category {
        PackageCategory::Framework => true,
        PackageCategory::Tooling => strategy == UpgradeStrategy::Conservative,
        PackageCategory::ThirdParty => false,
    }
}

fn with_rule_notes(message: String, rule: &PackageRule) -> String {
    match &rule.notes {
        Some(notes) => format!("{message}; {notes}"),
        None => message,
    }
}
