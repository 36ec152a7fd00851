//! Deterministic content hashing for cache invalidation
//!
//! A hash input is a list of path specs; entries prefixed with `!` exclude
//! matching paths. Symbolic links are never followed. The hashing utility
//! honors the runner's workspace-root variable and ignores files outside
//! it, so [`hash_cache`] temporarily clears that variable to hash the
//! absolute omni directories, restoring it on every exit path.

use crate::error::{SetupError, SetupResult};
use crate::home;
use crate::workflow::StateStore;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use walkdir::WalkDir;

const WORKSPACE_VAR: &str = "GITHUB_WORKSPACE";

/// Scoped clear of the workspace-root variable; the prior value comes back
/// when the guard drops, error exits included
struct WorkspaceOverride {
    saved: Option<OsString>,
}

impl WorkspaceOverride {
    fn clear() -> Self {
        let saved = std::env::var_os(WORKSPACE_VAR);
        std::env::remove_var(WORKSPACE_VAR);
        Self { saved }
    }
}

impl Drop for WorkspaceOverride {
    fn drop(&mut self) {
        match self.saved.take() {
            Some(value) => std::env::set_var(WORKSPACE_VAR, value),
            None => std::env::remove_var(WORKSPACE_VAR),
        }
    }
}

/// Hash the cached omni directories.
///
/// Clears the workspace-root variable for the duration of the call so the
/// data/cache homes, which live outside any workspace, are not silently
/// skipped.
pub fn hash_cache(specs: &[String]) -> SetupResult<String> {
    info!("Hashing cache paths: {specs:?}");

    let _workspace = WorkspaceOverride::clear();
    let hash = hash_files(specs)?;

    info!("Cache hash: {hash}");
    Ok(hash)
}

/// Hash the contents of every file matched by the path specs.
///
/// Files outside the workspace root (when set) are ignored. Returns the
/// empty string when nothing matched, so a missing manifest file simply
/// contributes an empty segment to the cache key.
pub fn hash_files(specs: &[String]) -> SetupResult<String> {
    let (includes, excludes): (Vec<&String>, Vec<&String>) =
        specs.iter().partition(|spec| !spec.starts_with('!'));
    let exclusions = build_exclusions(&excludes)?;

    let workspace = std::env::var_os(WORKSPACE_VAR)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);

    let mut files = Vec::new();
    for include in includes {
        collect_files(Path::new(include), &exclusions, workspace.as_deref(), &mut files)?;
    }
    files.sort();
    files.dedup();

    if files.is_empty() {
        return Ok(String::new());
    }

    let mut combined = Sha256::new();
    for file in &files {
        let contents = std::fs::read(file)
            .map_err(|e| SetupError::io(format!("reading {}", file.display()), e))?;
        let digest = Sha256::digest(&contents);
        combined.update(digest);
    }

    Ok(hex::encode(combined.finalize()))
}

fn build_exclusions(excludes: &[&String]) -> SetupResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for exclude in excludes {
        let pattern = exclude.trim_start_matches('!');
        for glob in [pattern.to_string(), format!("{pattern}/**")] {
            builder.add(
                Glob::new(&glob)
                    .map_err(|e| SetupError::Internal(format!("bad exclusion '{exclude}': {e}")))?,
            );
        }
    }
    builder
        .build()
        .map_err(|e| SetupError::Internal(format!("building exclusion set: {e}")))
}

fn collect_files(
    root: &Path,
    exclusions: &GlobSet,
    workspace: Option<&Path>,
    files: &mut Vec<PathBuf>,
) -> SetupResult<()> {
    if !root.exists() {
        debug!("hash input {} does not exist, skipping", root.display());
        return Ok(());
    }

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| SetupError::Internal(format!("walking {}: {e}", root.display())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if exclusions.is_match(path) {
            continue;
        }

        let absolute = std::path::absolute(path)
            .map_err(|e| SetupError::io(format!("resolving {}", path.display()), e))?;
        if let Some(workspace) = workspace {
            if !absolute.starts_with(workspace) {
                continue;
            }
        }
        files.push(absolute);
    }
    Ok(())
}

/// Remove the shims directory so the generated dispatch executables never
/// taint the content hash and get regenerated against restored data
pub async fn remove_shims(state: &mut dyn StateStore) -> SetupResult<()> {
    let shims = home::shims_dir(state);
    if !fs::try_exists(&shims).await.unwrap_or(false) {
        return Ok(());
    }

    info!("Removing shims directory: {}", shims.display());
    fs::remove_dir_all(&shims)
        .await
        .map_err(|e| SetupError::io(format!("removing {}", shims.display()), e))
}
