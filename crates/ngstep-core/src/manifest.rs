use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::version::VersionId;

pub const FRAMEWORK_CORE_PACKAGE: &str = "@angular/core";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Runtime,
    Dev,
}

impl DependencyKind {
    pub fn section(&self) -> &'static str {
        match self {
            Self::Runtime => "dependencies",
            Self::Dev => "devDependencies",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredDependency {
    pub name: String,
    pub range: String,
    pub kind: DependencyKind,
}

/// The project's `package.json`.
///
/// Only the dependency sections are interpreted; every other key is carried
/// through untouched and in its original order when the manifest is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectManifest {
    document: Map<String, Value>,
}

impl ProjectManifest {
    pub fn from_json_str(input: &str) -> anyhow::Result<Self> {
        let value: Value = serde_json::from_str(input).context("failed to parse package.json")?;
        let Value::Object(document) = value else {
            return Err(anyhow!("package.json must contain a JSON object"));
        };

        for kind in [DependencyKind::Runtime, DependencyKind::Dev] {
            match document.get(kind.section()) {
                None | Some(Value::Object(_)) => {}
                Some(_) => {
                    return Err(anyhow!(
                        "package.json field '{}' must be an object",
                        kind.section()
                    ));
                }
            }
        }

        Ok(Self { document })
    }

    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest: {}", path.display()))?;
        Self::from_json_str(&raw)
            .with_context(|| format!("failed parsing manifest: {}", path.display()))
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        let content = self.to_json_string()?;
        fs::write(path, content)
            .with_context(|| format!("failed to write manifest: {}", path.display()))
    }

    pub fn to_json_string(&self) -> anyhow::Result<String> {
        let mut rendered = serde_json::to_string_pretty(&self.document)
            .context("failed to serialize package.json")?;
        rendered.push('\n');
        Ok(rendered)
    }

    pub fn name(&self) -> Option<&str> {
        self.document.get("name").and_then(Value::as_str)
    }

    /// String-valued dependency declarations, runtime first, each section in name order.
    pub fn declared_dependencies(&self, include_dev: bool) -> Vec<DeclaredDependency> {
        let mut kinds = vec![DependencyKind::Runtime];
        if include_dev {
            kinds.push(DependencyKind::Dev);
        }

        let mut declared = Vec::new();
        for kind in kinds {
            let Some(section) = self.section(kind) else {
                continue;
            };
            let mut entries = section
                .iter()
                .filter_map(|(name, value)| {
                    value.as_str().map(|range| DeclaredDependency {
                        name: name.clone(),
                        range: range.to_string(),
                        kind,
                    })
                })
                .collect::<Vec<_>>();
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            declared.extend(entries);
        }
        declared
    }

    /// Dependency entries whose value is not a version string.
    pub fn malformed_entries(&self, include_dev: bool) -> Vec<String> {
        let mut kinds = vec![DependencyKind::Runtime];
        if include_dev {
            kinds.push(DependencyKind::Dev);
        }

        let mut malformed = Vec::new();
        for kind in kinds {
            if let Some(section) = self.section(kind) {
                malformed.extend(
                    section
                        .iter()
                        .filter(|(_, value)| !value.is_string())
                        .map(|(name, _)| name.clone()),
                );
            }
        }
        malformed.sort();
        malformed
    }

    pub fn dependency_range(&self, name: &str) -> Option<&str> {
        [DependencyKind::Runtime, DependencyKind::Dev]
            .into_iter()
            .find_map(|kind| self.section(kind)?.get(name)?.as_str())
    }

    /// Rewrites the declared range of `name` in whichever section declares it.
    pub fn set_dependency_range(&mut self, name: &str, range: &str) -> bool {
        for kind in [DependencyKind::Runtime, DependencyKind::Dev] {
            if let Some(Value::Object(section)) = self.document.get_mut(kind.section()) {
                if let Some(slot) = section.get_mut(name) {
                    *slot = Value::String(range.to_string());
                    return true;
                }
            }
        }
        false
    }

    /// Swaps a package for its successor in the same section, keeping the section sorted.
    pub fn replace_dependency(&mut self, name: &str, successor: &str, range: &str) -> bool {
        for kind in [DependencyKind::Runtime, DependencyKind::Dev] {
            let Some(Value::Object(section)) = self.document.get_mut(kind.section()) else {
                continue;
            };
            if section.shift_remove(name).is_none() {
                continue;
            }
            section.insert(successor.to_string(), Value::String(range.to_string()));

            let mut entries = std::mem::take(section).into_iter().collect::<Vec<_>>();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            section.extend(entries);
            return true;
        }
        false
    }

    /// Framework major version, read from the `@angular/core` declaration.
    pub fn framework_version(&self) -> anyhow::Result<VersionId> {
        let range = self.dependency_range(FRAMEWORK_CORE_PACKAGE).ok_or_else(|| {
            anyhow!("package.json does not declare {FRAMEWORK_CORE_PACKAGE}")
        })?;
        VersionId::parse(range).with_context(|| {
            format!("cannot determine framework version from {FRAMEWORK_CORE_PACKAGE}@{range}")
        })
    }

    fn section(&self, kind: DependencyKind) -> Option<&Map<String, Value>> {
        self.document.get(kind.section()).and_then(Value::as_object)
    }
}
