use std::fmt;

use anyhow::{anyhow, Context, Result};
use ngstep_core::UpdateType;
use semver::{Comparator, Op, Version, VersionReq};

/// A declared npm range such as `^15.2.0`, `>=4.8.2 <5.0.0` or `^6.5.3 || ^7.4.0`.
///
/// npm syntax differs from cargo syntax in a few places (bare versions are
/// exact, comparators are space separated, `||` unions); the range is
/// normalised into one `VersionReq` per alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpmRange {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl NpmRange {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if is_non_registry_specifier(trimmed) {
            return Err(anyhow!("unsupported dependency specifier '{trimmed}'"));
        }

        let mut alternatives = Vec::new();
        for alternative in trimmed.split("||") {
            let normalized = normalize_alternative(alternative)
                .with_context(|| format!("invalid npm range '{trimmed}'"))?;
            let requirement = VersionReq::parse(&normalized)
                .with_context(|| format!("invalid npm range '{trimmed}'"))?;
            alternatives.push(requirement);
        }

        Ok(Self {
            raw: trimmed.to_string(),
            alternatives,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    /// Range to write into a manifest when moving onto this requirement: the
    /// requirement itself when it is a single caret, tilde or exact comparator,
    /// otherwise a tilde range on the floor, which stays inside the requirement.
    pub fn declarable_range(&self) -> Option<String> {
        let simple = match self.alternatives.as_slice() {
            [only] => matches!(
                only.comparators.as_slice(),
                [single] if matches!(single.op, Op::Caret | Op::Tilde | Op::Exact)
            ),
            _ => false,
        };
        if simple {
            return Some(self.raw.clone());
        }
        self.floor().map(|floor| format!("~{floor}"))
    }

    /// Lowest version the range admits, or `None` when some alternative has no
    /// lower bound (`*`, `<2.0.0`) and the floor is therefore ambiguous.
    pub fn floor(&self) -> Option<Version> {
        let mut floor: Option<Version> = None;
        for requirement in &self.alternatives {
            let bound = requirement_lower_bound(requirement)?;
            floor = Some(match floor {
                Some(current) if current <= bound => current,
                _ => bound,
            });
        }
        floor
    }
}

impl fmt::Display for NpmRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Classifies the move from `current` to `compatible` by the first differing component.
pub fn classify_change(current: &Version, compatible: &Version) -> UpdateType {
    if current.major != compatible.major {
        UpdateType::Major
    } else if current.minor != compatible.minor {
        UpdateType::Minor
    } else if current.patch != compatible.patch {
        UpdateType::Patch
    } else {
        UpdateType::Compatible
    }
}

fn is_non_registry_specifier(value: &str) -> bool {
    const PREFIXES: &[&str] = &[
        "file:",
        "link:",
        "git",
        "http:",
        "https:",
        "npm:",
        "workspace:",
        "portal:",
    ];
    if PREFIXES.iter().any(|prefix| value.starts_with(prefix)) || value.contains('/') {
        return true;
    }

    value
        .chars()
        .next()
        .map(|first| first.is_ascii_alphabetic() && !matches!(first, 'v' | 'x' | 'X'))
        .unwrap_or(false)
}

fn normalize_alternative(alternative: &str) -> Result<String> {
    let alternative = alternative.trim();
    if alternative.is_empty() || alternative == "*" || alternative == "x" {
        return Ok("*".to_string());
    }

    if let Some((low, high)) = alternative.split_once(" - ") {
        let low = strip_v(low.trim());
        let high = strip_v(high.trim());
        return Ok(format!(">={low}, <={high}"));
    }

    let mut comparators = Vec::new();
    let mut pending_operator = String::new();
    for token in alternative.split_whitespace() {
        if token.chars().all(|ch| matches!(ch, '<' | '>' | '=' | '~' | '^')) {
            pending_operator.push_str(token);
            continue;
        }
        let joined = format!("{pending_operator}{token}");
        pending_operator.clear();
        comparators.push(normalize_comparator(&joined));
    }
    if !pending_operator.is_empty() {
        return Err(anyhow!("dangling operator '{pending_operator}'"));
    }

    Ok(comparators.join(", "))
}

fn normalize_comparator(token: &str) -> String {
    let split_at = token
        .find(|ch: char| !matches!(ch, '<' | '>' | '=' | '~' | '^'))
        .unwrap_or(token.len());
    let (operator, version) = token.split_at(split_at);
    let version = strip_v(version);
    if !operator.is_empty() {
        return format!("{operator}{version}");
    }

    // Bare npm versions: full versions are exact, partial ones are `x` ranges.
    let has_wildcard = version
        .split('.')
        .any(|part| matches!(part, "x" | "X" | "*"));
    let components = version.split(['-', '+']).next().unwrap_or(version).split('.').count();
    if has_wildcard {
        version.to_string()
    } else if components >= 3 {
        format!("={version}")
    } else {
        format!("~{version}")
    }
}

fn strip_v(value: &str) -> &str {
    value
        .strip_prefix('v')
        .or_else(|| value.strip_prefix('V'))
        .unwrap_or(value)
}

fn requirement_lower_bound(requirement: &VersionReq) -> Option<Version> {
    requirement
        .comparators
        .iter()
        .filter_map(comparator_lower_bound)
        .max()
}

fn comparator_lower_bound(comparator: &Comparator) -> Option<Version> {
    let minor = comparator.minor.unwrap_or(0);
    let patch = comparator.patch.unwrap_or(0);
    let mut version = match comparator.op {
        Op::Exact | Op::GreaterEq | Op::Tilde | Op::Caret | Op::Wildcard => {
            Version::new(comparator.major, minor, patch)
        }
        Op::Greater => match (comparator.minor, comparator.patch) {
            (Some(minor), Some(patch)) => Version::new(comparator.major, minor, patch + 1),
            (Some(minor), None) => Version::new(comparator.major, minor + 1, 0),
            _ => Version::new(comparator.major + 1, 0, 0),
        },
        _ => return None,
    };
    if comparator.op != Op::Greater {
        version.pre = comparator.pre.clone();
    }
    Some(version)
}
