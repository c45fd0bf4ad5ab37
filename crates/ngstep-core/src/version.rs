use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use semver::VersionReq;
use serde::{Deserialize, Serialize};

/// A major release of the framework being upgraded (12, 13, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(u64);

impl VersionId {
    pub const fn new(major: u64) -> Self {
        Self(major)
    }

    pub const fn major(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Parses `15`, `v15`, `15.2.1` or a declared npm range such as `^12.2.0`.
    /// Only the leading major component is significant.
    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let trimmed = input.trim();
        let stripped = trimmed.trim_start_matches(|ch: char| {
            matches!(ch, '^' | '~' | '>' | '=' | 'v' | 'V') || ch.is_whitespace()
        });
        let digits: String = stripped
            .chars()
            .take_while(|ch| ch.is_ascii_digit())
            .collect();
        if digits.is_empty() {
            return Err(anyhow!("invalid framework version: '{trimmed}'"));
        }
        let major = digits
            .parse::<u64>()
            .map_err(|_| anyhow!("framework version out of range: '{trimmed}'"))?;
        Ok(Self(major))
    }

    /// The caret requirement `^N.0.0` every lockstep package uses for this release.
    pub fn caret_requirement(self) -> VersionReq {
        let text = format!("^{}.0.0", self.0);
        VersionReq::parse(&text).unwrap_or(VersionReq::STAR)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VersionId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<u64> for VersionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
