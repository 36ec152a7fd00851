//! Wrappers around the omni subcommands this tool drives
//!
//! Every invocation goes through a [`CommandRunner`] so the orchestration
//! can be exercised against a scripted runner. Argument-vector construction
//! and hook-env parsing are pure functions, testable without any process.

use crate::error::{CommandFailure, SetupError, SetupResult};
use crate::process::{render_command, CommandRunner, ExecResult, SystemRunner};
use crate::retry::{with_retry, RetryConfig};
use crate::version::extract_version;
use crate::workflow;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::info;

/// One environment mutation parsed from `omni hook env` output.
///
/// Ordering matters: later operations override earlier ones for the same
/// key and must be applied in the order produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvOperation {
    Export { key: String, value: String },
    Unset { key: String },
}

fn export_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^export (\S+)=(.*)$").expect("valid regex"))
}

fn unset_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^unset (\S+)$").expect("valid regex"))
}

/// The omni CLI, addressed through an abstract command runner
pub struct OmniCli {
    runner: Arc<dyn CommandRunner>,
}

impl OmniCli {
    /// Wrapper over the real omni binary
    pub fn system() -> Self {
        Self::with_runner(Arc::new(SystemRunner::new()))
    }

    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Run an omni subcommand, raising a contextualized error on non-zero exit
    pub async fn run(&self, args: &[String]) -> SetupResult<i32> {
        let _group = workflow::group(&format!("Running omni {}", args.join(" ")));
        let result = self.runner.run("omni", args).await?;
        if !result.success() {
            return Err(CommandFailure::new(
                render_command("omni", args),
                format!("Process exited with code {}", result.exit_code),
                result.stdout,
                result.stderr,
                Some(result.exit_code),
            )
            .into());
        }
        Ok(result.exit_code)
    }

    /// Run an omni subcommand, returning the full result regardless of exit code
    pub async fn output(&self, args: &[String]) -> SetupResult<ExecResult> {
        let _group = workflow::group(&format!("Running omni {} (grab output)", args.join(" ")));
        self.runner.run("omni", args).await
    }

    /// Query the installed omni version
    pub async fn version(&self) -> SetupResult<String> {
        let output = self.output(&to_args(&["--version"])).await?;
        if !output.success() {
            return Err(SetupError::VersionQuery {
                code: output.exit_code,
                stderr: output.stderr,
            });
        }

        extract_version(&output.stdout)
            .map(str::to_string)
            .ok_or_else(|| SetupError::VersionParse(output.stdout.clone()))
    }

    /// Run `omni up` with the user's arguments plus the derived defaults,
    /// optionally through the retry policy
    pub async fn up(&self, raw_args: &str, trusted: bool, retry: &RetryConfig) -> SetupResult<i32> {
        let user_args = shell_words::split(raw_args.trim())
            .map_err(|e| SetupError::Internal(format!("Failed to parse up_args: {e}")))?;

        let mut args = vec!["up".to_string()];
        args.extend(build_up_args(user_args, trusted));

        if retry.retries == 0 {
            return self.run(&args).await;
        }
        with_retry(|| self.run(&args), "omni up", retry).await
    }

    /// Establish trust for the work tree via `omni config trust`.
    ///
    /// A non-zero exit is folded into the returned boolean rather than
    /// raised; the caller compensates by passing `--trust always` to up.
    pub async fn trust(&self) -> SetupResult<bool> {
        let result = self.output(&to_args(&["config", "trust"])).await?;
        if !result.success() {
            workflow::warning(&format!(
                "omni config trust exited with code {}; repository will not be trusted",
                result.exit_code
            ));
        }
        Ok(result.success())
    }

    /// Regenerate the shims directory
    pub async fn reshim(&self) -> SetupResult<i32> {
        self.run(&to_args(&["config", "reshim"])).await
    }

    /// Run `omni config check --local` with the derived option lists
    pub async fn check(&self, patterns: &str, ignore: &str, select: &str) -> SetupResult<()> {
        let args = build_check_args(patterns, ignore, select);
        match self.run(&args).await {
            Ok(_) => Ok(()),
            Err(e) => {
                workflow::warning(&e.to_string());
                Err(SetupError::CheckFailed)
            }
        }
    }

    /// Collect the environment operations omni wants applied
    pub async fn hook_env(&self) -> SetupResult<Vec<EnvOperation>> {
        let output = self.output(&to_args(&["hook", "env", "bash"])).await?;
        if !output.success() {
            return Err(SetupError::HookEnv {
                code: output.exit_code,
                stderr: output.stderr,
            });
        }

        let (operations, warnings) = parse_hook_env(&output.stdout);
        for line in warnings {
            workflow::warning(&format!("Failed to parse line: {line}"));
        }
        info!("Parsed {} environment operations", operations.len());
        Ok(operations)
    }
}

fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Build the final `omni up` argument vector from the user's arguments.
///
/// Unless the user opted into `--bootstrap`, suggested clones and user
/// config updates are turned off; an untrusted work tree gets
/// `--trust always` appended last.
pub fn build_up_args(mut args: Vec<String>, trusted: bool) -> Vec<String> {
    let mut has_bootstrap = false;
    let mut has_clone_suggested = false;
    let mut has_update_user_config = false;
    for arg in &args {
        match arg.as_str() {
            "--bootstrap" => has_bootstrap = true,
            "--clone-suggested" => has_clone_suggested = true,
            "--update-user-config" => has_update_user_config = true,
            _ => {}
        }
    }

    if !has_bootstrap {
        if !has_clone_suggested {
            args.push("--clone-suggested".to_string());
            args.push("no".to_string());
        }
        if !has_update_user_config {
            args.push("--update-user-config".to_string());
            args.push("no".to_string());
        }
    }

    if !trusted {
        args.push("--trust".to_string());
        args.push("always".to_string());
    }

    args
}

/// Build the `omni config check` argument vector from the raw option inputs.
///
/// Patterns split on newlines or colons; ignore/select split on newlines or
/// commas. Tokens are trimmed and empty tokens dropped.
pub fn build_check_args(patterns: &str, ignore: &str, select: &str) -> Vec<String> {
    let mut args = to_args(&["config", "check", "--local"]);

    for pattern in split_tokens(patterns, &['\n', ':']) {
        args.push("--pattern".to_string());
        args.push(pattern);
    }
    for ign in split_tokens(ignore, &['\n', ',']) {
        args.push("--ignore".to_string());
        args.push(ign);
    }
    for sel in split_tokens(select, &['\n', ',']) {
        args.push("--select".to_string());
        args.push(sel);
    }

    args
}

fn split_tokens(input: &str, separators: &[char]) -> Vec<String> {
    input
        .split(separators)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse the line-oriented output of `omni hook env bash`.
///
/// Returns the operations in emitted order plus the lines that matched
/// neither grammar (to be surfaced as warnings, not errors).
pub fn parse_hook_env(stdout: &str) -> (Vec<EnvOperation>, Vec<String>) {
    let mut operations = Vec::new();
    let mut warnings = Vec::new();

    for line in stdout.split('\n') {
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = export_re().captures(line) {
            operations.push(EnvOperation::Export {
                key: caps[1].to_string(),
                value: unquote(&caps[2]),
            });
            continue;
        }
        if let Some(caps) = unset_re().captures(line) {
            operations.push(EnvOperation::Unset {
                key: caps[1].to_string(),
            });
            continue;
        }

        warnings.push(line.to_string());
    }

    (operations, warnings)
}

/// Strip a symmetric pair of single or double quotes; an unbalanced quote
/// is part of the value
fn unquote(value: &str) -> String {
    for quote in ['"', '\''] {
        if let Some(rest) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return rest.to_string();
        }
    }
    value.to_string()
}
