use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ngstep_core::VersionId;
use serde::{Deserialize, Serialize};

use crate::constraints::NpmRange;

const BUILTIN_TABLE: &str = include_str!("../data/ecosystem.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageCategory {
    Framework,
    Tooling,
    ThirdParty,
}

#[derive(Debug, Deserialize)]
struct EcosystemTableFile {
    min_version: u64,
    max_version: u64,
    #[serde(default, rename = "package")]
    packages: Vec<PackageRuleFile>,
}

#[derive(Debug, Deserialize)]
struct PackageRuleFile {
    name: String,
    category: PackageCategory,
    first_party: Option<bool>,
    #[serde(default)]
    lockstep: bool,
    #[serde(default)]
    versions: BTreeMap<String, String>,
    introduced_in: Option<u64>,
    deprecated_from: Option<u64>,
    successor: Option<String>,
    notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRule {
    pub name: String,
    pub category: PackageCategory,
    pub first_party: bool,
    pub lockstep: bool,
    pub versions: BTreeMap<u64, NpmRange>,
    pub introduced_in: Option<u64>,
    pub deprecated_from: Option<u64>,
    pub successor: Option<String>,
    pub notes: Option<String>,
}

/// What a rule says about one framework version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleResolution {
    Requirement(NpmRange),
    Deprecated { successor: Option<String> },
    Unknown,
}

impl PackageRule {
    pub fn resolution_for(&self, target: VersionId) -> RuleResolution {
        let major = target.major();
        if self.deprecated_from.is_some_and(|from| major >= from) {
            return RuleResolution::Deprecated {
                successor: self.successor.clone(),
            };
        }
        if self.introduced_in.is_some_and(|from| major < from) {
            return RuleResolution::Unknown;
        }
        if let Some(range) = self.versions.get(&major) {
            return RuleResolution::Requirement(range.clone());
        }
        if self.lockstep {
            let caret = format!("^{major}.0.0");
            if let Ok(range) = NpmRange::parse(&caret) {
                return RuleResolution::Requirement(range);
            }
        }
        match self.versions.range(..major).next_back() {
            Some((_, range)) => RuleResolution::Requirement(range.clone()),
            None => RuleResolution::Unknown,
        }
    }

    fn matches_name(&self, name: &str) -> bool {
        match self.name.strip_suffix('*') {
            Some(scope) => name.starts_with(scope),
            None => self.name == name,
        }
    }

    fn is_scope_pattern(&self) -> bool {
        self.name.ends_with('*')
    }
}

/// Per-version compatibility data for the framework ecosystem.
///
/// This is configuration: the built-in copy ships with the crate and a project
/// can point at its own table instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcosystemTable {
    min_version: VersionId,
    max_version: VersionId,
    rules: Vec<PackageRule>,
}

impl EcosystemTable {
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_TABLE).context("built-in ecosystem table is invalid")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read ecosystem table: {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("failed parsing ecosystem table: {}", path.display()))
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        let file: EcosystemTableFile =
            toml::from_str(input).context("failed to parse ecosystem table")?;
        if file.min_version > file.max_version {
            return Err(anyhow!(
                "ecosystem table min_version {} exceeds max_version {}",
                file.min_version,
                file.max_version
            ));
        }

        let mut rules = Vec::with_capacity(file.packages.len());
        for package in file.packages {
            if package.name.trim().is_empty() {
                return Err(anyhow!("ecosystem package name must not be empty"));
            }
            if rules
                .iter()
                .any(|existing: &PackageRule| existing.name == package.name)
            {
                return Err(anyhow!(
                    "duplicate ecosystem package declaration '{}'",
                    package.name
                ));
            }

            let mut versions = BTreeMap::new();
            for (major, range) in &package.versions {
                let major = major.parse::<u64>().map_err(|_| {
                    anyhow!(
                        "invalid framework version key '{}' for package '{}'",
                        major,
                        package.name
                    )
                })?;
                let range = NpmRange::parse(range).with_context(|| {
                    format!("invalid range for '{}' on version {major}", package.name)
                })?;
                versions.insert(major, range);
            }

            if !package.lockstep && versions.is_empty() && package.deprecated_from.is_none() {
                return Err(anyhow!(
                    "package '{}' declares neither lockstep, versions nor deprecation",
                    package.name
                ));
            }

            rules.push(PackageRule {
                first_party: package
                    .first_party
                    .unwrap_or(package.category == PackageCategory::Framework),
                name: package.name,
                category: package.category,
                lockstep: package.lockstep,
                versions,
                introduced_in: package.introduced_in,
                deprecated_from: package.deprecated_from,
                successor: package.successor,
                notes: package.notes,
            });
        }

        Ok(Self {
            min_version: VersionId::new(file.min_version),
            max_version: VersionId::new(file.max_version),
            rules,
        })
    }

    pub fn min_version(&self) -> VersionId {
        self.min_version
    }

    pub fn max_version(&self) -> VersionId {
        self.max_version
    }

    pub fn rules(&self) -> &[PackageRule] {
        &self.rules
    }

    /// Rule for `name`; exact declarations win over scope patterns like `@ngrx/*`.
    pub fn rule_for(&self, name: &str) -> Option<&PackageRule> {
        self.rules
            .iter()
            .find(|rule| !rule.is_scope_pattern() && rule.matches_name(name))
            .or_else(|| {
                self.rules
                    .iter()
                    .filter(|rule| rule.is_scope_pattern() && rule.matches_name(name))
                    .max_by_key(|rule| rule.name.len())
            })
    }

    pub fn supports(&self, version: VersionId) -> bool {
        version >= self.min_version && version <= self.max_version
    }
}
