//! Omni home directories and downstream environment configuration
//!
//! Resolution order for the data/cache homes follows omni itself: explicit
//! override variable, then the XDG base dir, then the conventional default
//! under the user's home. Resolved values are memoized through persisted
//! state so the post phase hashes the same directories the main phase cached.

use crate::error::{SetupError, SetupResult};
use crate::omni::{EnvOperation, OmniCli};
use crate::version::VersionGate;
use crate::workflow::{
    self,
    state::{STATE_OMNI_CACHE_HOME, STATE_OMNI_DATA_HOME},
    StateStore,
};
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

/// Directory holding omni's tool data; the `shims` subdirectory lives here
pub fn omni_data_home(state: &mut dyn StateStore) -> PathBuf {
    if let Some(cached) = state.get(STATE_OMNI_DATA_HOME) {
        return PathBuf::from(cached);
    }

    let path = env_path("OMNI_DATA_HOME").unwrap_or_else(|| {
        env_path("XDG_DATA_HOME")
            .unwrap_or_else(|| home_dir().join(".local/share"))
            .join("omni")
    });
    state.set(STATE_OMNI_DATA_HOME, &path.display().to_string());
    path
}

/// Directory holding omni's cache
pub fn omni_cache_home(state: &mut dyn StateStore) -> PathBuf {
    if let Some(cached) = state.get(STATE_OMNI_CACHE_HOME) {
        return PathBuf::from(cached);
    }

    let path = env_path("OMNI_CACHE_HOME").unwrap_or_else(|| {
        env_path("XDG_CACHE_HOME")
            .unwrap_or_else(|| home_dir().join(".cache"))
            .join("omni")
    });
    state.set(STATE_OMNI_CACHE_HOME, &path.display().to_string());
    path
}

/// The generated dispatch-executables directory under the data home
pub fn shims_dir(state: &mut dyn StateStore) -> PathBuf {
    omni_data_home(state).join("shims")
}

/// Omni's per-user config file
pub fn user_config_path() -> PathBuf {
    home_dir().join(".config/omni/config.yaml")
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Make sure the user config file exists, so omni skips its own first-run
/// bootstrap prompts; an existing file is left untouched
pub async fn ensure_user_config() -> SetupResult<()> {
    let path = user_config_path();
    if fs::try_exists(&path).await.unwrap_or(false) {
        return Ok(());
    }
    write_config_file("").await
}

/// Turn off omni's auto-bootstrap through the user config file
pub async fn disable_auto_bootstrap() -> SetupResult<()> {
    write_config_file("up_command:\n  auto_bootstrap: false\n").await
}

async fn write_config_file(contents: &str) -> SetupResult<()> {
    let path = user_config_path();
    let _group = workflow::group(&format!("Writing file: {}", path.display()));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| SetupError::io(format!("creating directory {}", parent.display()), e))?;
    }

    info!("Contents:\n\n{contents}");
    fs::write(&path, contents)
        .await
        .map_err(|e| SetupError::io(format!("writing {}", path.display()), e))
}

/// Legacy trust for omni versions without `config trust`: register the
/// repository and its organization in `OMNI_ORG`.
///
/// Missing repository context is a warning, not a failure; the caller
/// compensates with `--trust always`.
pub fn set_org() -> bool {
    let context = repository_context();
    let Some((server_url, owner, repo)) = context else {
        workflow::warning(
            "Failed to get repository information from the environment (GITHUB_SERVER_URL, GITHUB_REPOSITORY)",
        );
        workflow::warning("Repository will not be trusted");
        return false;
    };

    let mut orgs = Vec::new();
    if let Some(existing) = std::env::var("OMNI_ORG").ok().filter(|v| !v.is_empty()) {
        orgs.push(existing);
    }
    orgs.push(format!("{server_url}/{owner}/{repo}"));
    orgs.push(format!("{server_url}/{owner}"));
    let value = orgs.join(",");

    info!("Setting OMNI_ORG={value}");
    if let Err(e) = workflow::export_var("OMNI_ORG", &value) {
        workflow::warning(&format!("Failed to export OMNI_ORG: {e}"));
        workflow::warning("Repository will not be trusted");
        return false;
    }
    true
}

fn repository_context() -> Option<(String, String, String)> {
    let server_url = std::env::var("GITHUB_SERVER_URL")
        .ok()
        .filter(|v| !v.is_empty())?;
    let repository = std::env::var("GITHUB_REPOSITORY")
        .ok()
        .filter(|v| !v.is_empty())?;
    let (owner, repo) = repository.split_once('/')?;
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((server_url, owner.to_string(), repo.to_string()))
}

/// Configure the environment downstream steps will see: shims on PATH for
/// versions that have them, otherwise the operations from `omni hook env`
/// applied in emitted order
pub async fn set_env(
    gate: &VersionGate,
    cli: &OmniCli,
    state: &mut dyn StateStore,
) -> SetupResult<()> {
    let _group = workflow::group("Setting environment variables to use omni");

    ensure_user_config().await?;

    if gate.use_shims_path() {
        let shims = shims_dir(state);
        info!("Adding {} to PATH", shims.display());
        workflow::add_path(&shims.display().to_string())?;
        return Ok(());
    }

    for operation in cli.hook_env().await? {
        match operation {
            EnvOperation::Export { key, value } => workflow::export_var(&key, &value)?,
            EnvOperation::Unset { key } => workflow::unset_var(&key)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::MemoryStateStore;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_home_env() {
        for key in [
            "OMNI_DATA_HOME",
            "OMNI_CACHE_HOME",
            "XDG_DATA_HOME",
            "XDG_CACHE_HOME",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn data_home_prefers_override_variable() {
        clear_home_env();
        std::env::set_var("OMNI_DATA_HOME", "/custom/omni/data");

        let mut state = MemoryStateStore::new();
        assert_eq!(
            omni_data_home(&mut state),
            PathBuf::from("/custom/omni/data")
        );
        assert_eq!(
            state.get(STATE_OMNI_DATA_HOME).as_deref(),
            Some("/custom/omni/data")
        );
        std::env::remove_var("OMNI_DATA_HOME");
    }

    #[test]
    #[serial]
    fn data_home_falls_back_to_xdg() {
        clear_home_env();
        std::env::set_var("XDG_DATA_HOME", "/xdg/data");

        let mut state = MemoryStateStore::new();
        assert_eq!(omni_data_home(&mut state), PathBuf::from("/xdg/data/omni"));
        std::env::remove_var("XDG_DATA_HOME");
    }

    #[test]
    #[serial]
    fn data_home_defaults_under_home() {
        clear_home_env();
        std::env::set_var("HOME", "/home/user");

        let mut state = MemoryStateStore::new();
        assert_eq!(
            omni_data_home(&mut state),
            PathBuf::from("/home/user/.local/share/omni")
        );
    }

    #[test]
    #[serial]
    fn data_home_returns_memoized_value() {
        clear_home_env();
        let mut state = MemoryStateStore::new();
        state.set(STATE_OMNI_DATA_HOME, "/memoized/omni");

        std::env::set_var("OMNI_DATA_HOME", "/should/not/win");
        assert_eq!(omni_data_home(&mut state), PathBuf::from("/memoized/omni"));
        std::env::remove_var("OMNI_DATA_HOME");
    }

    #[test]
    #[serial]
    fn cache_home_resolution_order() {
        clear_home_env();
        std::env::set_var("HOME", "/home/user");

        let mut state = MemoryStateStore::new();
        assert_eq!(
            omni_cache_home(&mut state),
            PathBuf::from("/home/user/.cache/omni")
        );

        let mut state = MemoryStateStore::new();
        std::env::set_var("XDG_CACHE_HOME", "/xdg/cache");
        assert_eq!(
            omni_cache_home(&mut state),
            PathBuf::from("/xdg/cache/omni")
        );

        let mut state = MemoryStateStore::new();
        std::env::set_var("OMNI_CACHE_HOME", "/custom/cache");
        assert_eq!(omni_cache_home(&mut state), PathBuf::from("/custom/cache"));

        std::env::remove_var("OMNI_CACHE_HOME");
        std::env::remove_var("XDG_CACHE_HOME");
    }

    #[tokio::test]
    #[serial]
    async fn ensure_user_config_creates_empty_file() {
        let home = TempDir::new().unwrap();
        std::env::set_var("HOME", home.path());

        ensure_user_config().await.unwrap();

        let path = home.path().join(".config/omni/config.yaml");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[tokio::test]
    #[serial]
    async fn ensure_user_config_leaves_existing_file_alone() {
        let home = TempDir::new().unwrap();
        std::env::set_var("HOME", home.path());

        let path = home.path().join(".config/omni/config.yaml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "existing: true\n").unwrap();

        ensure_user_config().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "existing: true\n");
    }

    #[tokio::test]
    #[serial]
    async fn disable_auto_bootstrap_writes_config() {
        let home = TempDir::new().unwrap();
        std::env::set_var("HOME", home.path());

        disable_auto_bootstrap().await.unwrap();

        let path = home.path().join(".config/omni/config.yaml");
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "up_command:\n  auto_bootstrap: false\n"
        );
    }

    #[test]
    #[serial]
    fn set_org_exports_repo_and_owner() {
        std::env::remove_var("GITHUB_ENV");
        std::env::remove_var("OMNI_ORG");
        std::env::set_var("GITHUB_SERVER_URL", "https://github.com");
        std::env::set_var("GITHUB_REPOSITORY", "testowner/testrepo");

        assert!(set_org());
        assert_eq!(
            std::env::var("OMNI_ORG").unwrap(),
            "https://github.com/testowner/testrepo,https://github.com/testowner"
        );

        std::env::remove_var("OMNI_ORG");
        std::env::remove_var("GITHUB_SERVER_URL");
        std::env::remove_var("GITHUB_REPOSITORY");
    }

    #[test]
    #[serial]
    fn set_org_appends_to_existing_value() {
        std::env::remove_var("GITHUB_ENV");
        std::env::set_var("OMNI_ORG", "existing-org");
        std::env::set_var("GITHUB_SERVER_URL", "https://github.com");
        std::env::set_var("GITHUB_REPOSITORY", "testowner/testrepo");

        assert!(set_org());
        assert_eq!(
            std::env::var("OMNI_ORG").unwrap(),
            "existing-org,https://github.com/testowner/testrepo,https://github.com/testowner"
        );

        std::env::remove_var("OMNI_ORG");
        std::env::remove_var("GITHUB_SERVER_URL");
        std::env::remove_var("GITHUB_REPOSITORY");
    }

    #[test]
    #[serial]
    fn set_org_without_context_returns_false() {
        std::env::remove_var("GITHUB_SERVER_URL");
        std::env::remove_var("GITHUB_REPOSITORY");
        std::env::remove_var("OMNI_ORG");

        assert!(!set_org());
        assert!(std::env::var("OMNI_ORG").is_err());
    }
}
