//! Runner protocol: annotations and the output/PATH/env files
//!
//! The pipeline runner communicates through environment-named files
//! (`GITHUB_OUTPUT`, `GITHUB_PATH`, `GITHUB_ENV`, `GITHUB_STATE`) and
//! `::`-prefixed stdout annotations. When a protocol file is absent (running
//! outside a pipeline) the write is logged at debug level and skipped.

pub mod state;

pub use state::{GithubStateStore, MemoryStateStore, StateStore};

use crate::error::{SetupError, SetupResult};
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;
use tracing::debug;

/// Open a collapsible log group; the group closes when the guard drops
pub fn group(name: &str) -> GroupGuard {
    println!("::group::{name}");
    GroupGuard
}

/// Guard returned by [`group`]
pub struct GroupGuard;

impl Drop for GroupGuard {
    fn drop(&mut self) {
        println!("::endgroup::");
    }
}

/// Emit a warning annotation
pub fn warning(message: &str) {
    println!("::warning::{}", escape_annotation(message));
}

/// Emit an error annotation
pub fn error(message: &str) {
    println!("::error::{}", escape_annotation(message));
}

/// Set a step output
pub fn set_output(name: &str, value: &str) -> SetupResult<()> {
    append_kv("GITHUB_OUTPUT", name, value)
}

/// Add a directory to the PATH of this and all subsequent steps
pub fn add_path(dir: &str) -> SetupResult<()> {
    append_raw("GITHUB_PATH", dir)?;

    let current = std::env::var("PATH").unwrap_or_default();
    let updated = if current.is_empty() {
        dir.to_string()
    } else {
        format!("{dir}:{current}")
    };
    std::env::set_var("PATH", updated);
    Ok(())
}

/// Export an environment variable to this and all subsequent steps
pub fn export_var(key: &str, value: &str) -> SetupResult<()> {
    append_kv("GITHUB_ENV", key, value)?;
    std::env::set_var(key, value);
    Ok(())
}

/// Clear an environment variable for this and all subsequent steps
pub fn unset_var(key: &str) -> SetupResult<()> {
    append_kv("GITHUB_ENV", key, "")?;
    std::env::remove_var(key);
    Ok(())
}

/// Append a `key=value` entry to a protocol file, heredoc-encoded when the
/// value spans multiple lines
pub(crate) fn append_kv(file_env: &str, key: &str, value: &str) -> SetupResult<()> {
    append_raw(file_env, &encode_kv(key, value))
}

fn append_raw(file_env: &str, content: &str) -> SetupResult<()> {
    let Some(path) = protocol_file(file_env) else {
        debug!("{file_env} not set, skipping write: {content}");
        return Ok(());
    };

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| SetupError::io(format!("opening {}", path.display()), e))?;
    writeln!(file, "{content}")
        .map_err(|e| SetupError::io(format!("writing {}", path.display()), e))?;
    Ok(())
}

fn protocol_file(file_env: &str) -> Option<PathBuf> {
    std::env::var_os(file_env)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn encode_kv(key: &str, value: &str) -> String {
    if !value.contains('\n') {
        return format!("{key}={value}");
    }

    // Heredoc form; grow the delimiter until it cannot collide with the value
    let mut delimiter = String::from("EOF");
    while value.contains(&delimiter) {
        delimiter.push('_');
    }
    format!("{key}<<{delimiter}\n{value}\n{delimiter}")
}

fn escape_annotation(message: &str) -> String {
    message
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}
