//! External process execution
//!
//! Provides a trait for command execution so the orchestration layer can be
//! exercised against a scripted runner in tests.

use crate::error::{CommandFailure, SetupError, SetupResult};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Captured result of one external command invocation
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Abstract command execution interface
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion, capturing stdout and stderr.
    ///
    /// A non-zero exit is reported in the result, not as an error; only a
    /// failure to launch the process at all becomes a contextualized error.
    async fn run(&self, program: &str, args: &[String]) -> SetupResult<ExecResult>;
}

/// Command runner executing real processes via tokio
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> SetupResult<ExecResult> {
        let command_line = render_command(program, args);
        debug!("Executing: {command_line}");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                SetupError::Command(CommandFailure::new(
                    &command_line,
                    e.to_string(),
                    "",
                    "",
                    None,
                ))
            })?;

        Ok(ExecResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Render a command line for error messages and logs
pub fn render_command(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}
