//! CLI argument definitions using clap derive
//!
//! Every pipeline input is a long flag bound to the `INPUT_<NAME>`
//! environment variable the runner sets for step inputs, so the binary can
//! be driven either way.

use clap::{ArgAction, Parser, Subcommand};

/// Omni Setup - CI installer for the omni CLI
///
/// Installs omni on a pipeline runner, restores and saves its data caches,
/// and drives omni up and friends with version-gated behavior.
#[derive(Parser, Debug)]
#[command(name = "omni-setup")]
#[command(author, version, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Main phase: install omni, restore its cache, run gated subcommands
    Run(RunArgs),

    /// Post phase: save the omni cache if it changed
    Post,
}

/// Arguments for the run command (the main pipeline phase)
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Version of omni to install (exact, partial, or "latest")
    #[arg(long, env = "INPUT_VERSION", default_value = "latest")]
    pub version: String,

    /// Run omni up after installing
    #[arg(long, env = "INPUT_UP", default_value = "false",
          action = ArgAction::Set, value_parser = parse_boolish)]
    pub up: bool,

    /// Extra arguments for omni up, shell-tokenized
    #[arg(long, env = "INPUT_UP_ARGS", default_value = "", allow_hyphen_values = true)]
    pub up_args: String,

    /// Number of retries for omni up (0 = single attempt)
    #[arg(long, env = "INPUT_UP_RETRIES", default_value_t = 0)]
    pub up_retries: u32,

    /// Base delay between omni up retries, in milliseconds
    #[arg(long, env = "INPUT_UP_RETRY_DELAY", default_value_t = 1000)]
    pub up_retry_delay: u64,

    /// Retry delay jitter, in percent of the computed delay
    #[arg(long, env = "INPUT_UP_RETRY_JITTER", default_value_t = 10)]
    pub up_retry_jitter: u32,

    /// Exponential backoff multiplier between retries
    #[arg(long, env = "INPUT_UP_RETRY_BACKOFF", default_value_t = 1.0)]
    pub up_retry_backoff: f64,

    /// Run omni config check after establishing trust
    #[arg(long, env = "INPUT_CHECK", default_value = "false",
          action = ArgAction::Set, value_parser = parse_boolish)]
    pub check: bool,

    /// Error patterns for omni config check, split on newlines or colons
    #[arg(long, env = "INPUT_CHECK_PATTERNS", default_value = "")]
    pub check_patterns: String,

    /// Error codes to ignore, split on newlines or commas
    #[arg(long, env = "INPUT_CHECK_IGNORE", default_value = "")]
    pub check_ignore: String,

    /// Error codes to select, split on newlines or commas
    #[arg(long, env = "INPUT_CHECK_SELECT", default_value = "")]
    pub check_select: String,

    /// Restore the omni cache before installing
    #[arg(long, env = "INPUT_CACHE", default_value = "true",
          action = ArgAction::Set, value_parser = parse_boolish)]
    pub cache: bool,

    /// Allow the post phase to write the cache back
    #[arg(long, env = "INPUT_CACHE_WRITE", default_value = "true",
          action = ArgAction::Set, value_parser = parse_boolish)]
    pub cache_write: bool,

    /// Record a content hash at restore time to skip no-op saves
    #[arg(long, env = "INPUT_CACHE_CHECK_HASH", default_value = "true",
          action = ArgAction::Set, value_parser = parse_boolish)]
    pub cache_check_hash: bool,

    /// Prefix for the cache key
    #[arg(long, env = "INPUT_CACHE_KEY_PREFIX", default_value = "omni-v0")]
    pub cache_key_prefix: String,

    /// Token for the release feed (falls back to GITHUB_TOKEN / GH_TOKEN)
    #[arg(long, env = "INPUT_GITHUB_TOKEN", default_value = "", hide_env_values = true)]
    pub github_token: String,
}

/// Parse a runner-style boolean input (true/false, yes/no, 1/0)
fn parse_boolish(s: &str) -> Result<bool, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" | "" => Ok(false),
        other => Err(format!("invalid boolean input '{other}'")),
    }
}
