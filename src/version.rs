//! Version selectors and version-gated behavior
//!
//! Two distinct concerns share this module: the install-time selector the
//! user provides (possibly partial, possibly "latest"), and the gate that
//! decides which omni subcommands apply to the version actually installed.

use crate::error::{SetupError, SetupResult};
use regex::Regex;
use semver::Version;
use std::fmt;
use std::sync::OnceLock;

fn selector_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^v?(\d+)(?:\.(\d+)(?:\.(\d+))?)?$").expect("valid regex"))
}

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+\.\d+\.\d+").expect("valid regex"))
}

/// A user-supplied version selector, normalized to a release tag prefix.
///
/// Partial selectors keep a trailing dot so `v1.2.` cannot match `v1.20.0`;
/// the any-version selector is the bare `v` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSpec {
    prefix: String,
}

impl VersionSpec {
    pub fn parse(raw: &str) -> SetupResult<Self> {
        if let Some(caps) = selector_re().captures(raw) {
            let parts: Vec<&str> = (1..=3)
                .filter_map(|i| caps.get(i).map(|m| m.as_str()))
                .collect();
            let mut prefix = format!("v{}", parts.join("."));
            if caps.get(3).is_none() {
                prefix.push('.');
            }
            return Ok(Self { prefix });
        }

        if raw == "latest" || raw.is_empty() {
            return Ok(Self {
                prefix: "v".to_string(),
            });
        }

        Err(SetupError::InvalidVersion(raw.to_string()))
    }

    /// The release tag prefix this selector matches
    pub fn tag_prefix(&self) -> &str {
        &self.prefix
    }

    pub fn matches_tag(&self, tag: &str) -> bool {
        tag.starts_with(&self.prefix)
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let trimmed = self
            .prefix
            .trim_start_matches('v')
            .trim_end_matches('.');
        if trimmed.is_empty() {
            write!(f, "latest")
        } else {
            write!(f, "{trimmed}")
        }
    }
}

/// Extract the first `x.y.z` version from command output
pub fn extract_version(output: &str) -> Option<&str> {
    version_re().find(output).map(|m| m.as_str())
}

/// Decides which behaviors apply to an installed omni version
#[derive(Debug, Clone)]
pub struct VersionGate {
    version: Version,
}

impl VersionGate {
    /// Parse and validate the version reported by the installed tool.
    ///
    /// An invalid version is a terminal error, surfaced before any gated
    /// subcommand runs.
    pub fn new(raw: &str) -> SetupResult<Self> {
        let version =
            Version::parse(raw).map_err(|_| SetupError::InvalidVersion(raw.to_string()))?;
        Ok(Self { version })
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// `omni config trust` exists; below this, trust goes through the
    /// legacy org-registration mechanism
    pub fn use_trust_subcommand(&self) -> bool {
        self.version >= Version::new(0, 0, 24)
    }

    /// The shims directory is the PATH integration point; below this, the
    /// environment comes from parsing `omni hook env`
    pub fn use_shims_path(&self) -> bool {
        self.version >= Version::new(0, 0, 24)
    }

    /// `omni config reshim` must run after setup
    pub fn run_reshim(&self) -> bool {
        self.version >= Version::new(0, 0, 24)
    }

    /// Auto-bootstrap must be disabled through a config write
    pub fn disable_auto_bootstrap(&self) -> bool {
        self.version < Version::new(0, 0, 25)
    }

    /// `omni config check` exists
    pub fn supports_check(&self) -> bool {
        self.version >= Version::new(2025, 1, 0)
    }
}
