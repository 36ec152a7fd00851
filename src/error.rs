//! Error types for omni-setup
//!
//! All modules use `SetupResult<T>` as their return type.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for omni-setup operations
pub type SetupResult<T> = Result<T, SetupError>;

/// All errors that can occur in omni-setup
#[derive(Error, Debug)]
pub enum SetupError {
    // Environment errors
    #[error("Unsupported platform: '{0}'")]
    UnsupportedPlatform(String),

    #[error("Unsupported architecture: '{0}'")]
    UnsupportedArch(String),

    // Version errors
    #[error("Invalid version: '{0}'")]
    InvalidVersion(String),

    #[error("Failed to get omni version ({code}): {stderr}")]
    VersionQuery { code: i32, stderr: String },

    #[error("Failed to parse omni version: {0}")]
    VersionParse(String),

    // Release resolution errors
    #[error("Failed to fetch releases: {0}")]
    ReleaseFetch(String),

    #[error("Release not found for '{version}', platform '{platform}' and architecture '{arch}'")]
    ReleaseNotFound {
        version: String,
        platform: String,
        arch: String,
    },

    #[error("Asset not found for platform '{platform}' and architecture '{arch}'")]
    AssetNotFound { platform: String, arch: String },

    #[error("Failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("Failed to extract archive {path}: {reason}")]
    Extract { path: PathBuf, reason: String },

    // Subprocess errors
    #[error("{0}")]
    Command(CommandFailure),

    #[error("Failed to get omni hook env ({code}): {stderr}")]
    HookEnv { code: i32, stderr: String },

    #[error("omni config check failed")]
    CheckFailed,

    #[error("omni up failed with exit code {0}")]
    UpFailed(i32),

    // Cache errors
    #[error("Cache entry invalid at {path}: {reason}")]
    CacheEntryInvalid { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SetupError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Context captured from a failed external command.
///
/// The display form is `"<command>: <detail>"` where the detail is the last
/// non-empty line of stderr, falling back to the original error message when
/// the command produced no stderr at all.
#[derive(Debug, Clone)]
pub struct CommandFailure {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    original: String,
}

impl CommandFailure {
    pub fn new(
        command: impl Into<String>,
        original: impl Into<String>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self {
            command: command.into(),
            original: original.into(),
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// The message the failure was created with, before contextualization
    pub fn original_message(&self) -> &str {
        &self.original
    }

    fn detail(&self) -> &str {
        self.stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or(&self.original)
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.command, self.detail())
    }
}

impl From<CommandFailure> for SetupError {
    fn from(failure: CommandFailure) -> Self {
        Self::Command(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SetupError::InvalidVersion("1.2.3.4".to_string());
        assert_eq!(err.to_string(), "Invalid version: '1.2.3.4'");
    }

    #[test]
    fn command_failure_uses_last_stderr_line() {
        let failure = CommandFailure::new(
            "omni up",
            "Process exited with code 1",
            "",
            "first line\n\nsomething broke\n",
            Some(1),
        );
        assert_eq!(failure.to_string(), "omni up: something broke");
    }

    #[test]
    fn command_failure_falls_back_to_original_message() {
        let failure = CommandFailure::new("omni up", "spawn failed", "", "", None);
        assert_eq!(failure.to_string(), "omni up: spawn failed");
    }

    #[test]
    fn command_failure_keeps_context() {
        let failure = CommandFailure::new("omni up", "boom", "out", "err", Some(2));
        assert_eq!(failure.exit_code, Some(2));
        assert_eq!(failure.stdout, "out");
        assert_eq!(failure.stderr, "err");
        assert_eq!(failure.original_message(), "boom");
    }
}
