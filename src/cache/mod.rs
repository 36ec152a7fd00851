//! Cache key derivation and the restore/save skip logic
//!
//! Restore composes the primary key from the user prefix, platform,
//! architecture, and a manifest-file hash, persists everything the post
//! phase needs, and pulls the omni data/cache homes from the store. Save
//! re-hashes the restored content and short-circuits twice: once on hash
//! equality (content unchanged since restore) and once on key equality
//! (the store would reject the duplicate anyway).

pub mod hash;
pub mod store;

pub use store::{CacheStore, DirStore};

use crate::error::SetupResult;
use crate::home;
use crate::install;
use crate::workflow::{
    self,
    state::{
        STATE_CACHE, STATE_CACHED_HASHED_PATHS, STATE_CACHED_PATHS, STATE_CACHE_HASH,
        STATE_CACHE_KEY, STATE_PRIMARY_KEY_PREFIX, STATE_RESTORE_KEYS,
    },
    StateStore,
};
use std::path::PathBuf;
use tracing::info;

/// Manifest file whose hash scopes the primary key to this repository
const MANIFEST_GLOB: &str = ".omni.yaml";

/// Restore-time knobs taken from the user inputs
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Whether the post phase may write the cache back
    pub write: bool,
    /// Whether to record a content hash now for the save-time comparison
    pub check_hash: bool,
    /// User part of the cache key
    pub key_prefix: String,
}

/// Restore the omni cache; returns whether anything was restored
pub async fn restore(
    options: &CacheOptions,
    state: &mut dyn StateStore,
    store: &dyn CacheStore,
) -> SetupResult<bool> {
    let _group = workflow::group("Restoring cache for omni");

    let data_home = home::omni_data_home(state);
    let cache_home = home::omni_cache_home(state);
    let cache_paths = vec![data_home.clone(), cache_home];
    // The shims directory is regenerated and would cause spurious
    // invalidation, so it never participates in hashing
    let hash_specs = vec![
        data_home.display().to_string(),
        format!("!{}", data_home.join("shims").display()),
    ];

    let manifest_hash = hash::hash_files(&[MANIFEST_GLOB.to_string()])?;
    let platform = install::current_platform()?;
    let arch = install::current_arch()?;
    let full_key_prefix = format!("{}-{platform}-{arch}", options.key_prefix);
    let primary_key = format!("{full_key_prefix}-{manifest_hash}-");
    let restore_keys = vec![format!("{full_key_prefix}-")];

    state.set(STATE_CACHE, if options.write { "true" } else { "false" });
    state.set(STATE_PRIMARY_KEY_PREFIX, &primary_key);
    state.set(STATE_RESTORE_KEYS, &restore_keys.join("\n"));
    state.set(STATE_CACHED_PATHS, &join_paths(&cache_paths));
    state.set(STATE_CACHED_HASHED_PATHS, &hash_specs.join("\n"));

    let cache_key = store
        .restore(&cache_paths, &primary_key, &restore_keys)
        .await?;
    workflow::set_output("cache-hit", if cache_key.is_some() { "true" } else { "false" })?;

    let Some(cache_key) = cache_key else {
        info!(
            "omni cache not found for any of {primary_key}, {}",
            restore_keys.join(", ")
        );
        return Ok(false);
    };

    hash::remove_shims(state).await?;

    state.set(STATE_CACHE_KEY, &cache_key);
    info!("omni cache restored from key: {cache_key}");

    if options.write && options.check_hash {
        let cache_hash = hash::hash_cache(&hash_specs)?;
        state.set(STATE_CACHE_HASH, &cache_hash);
    }

    Ok(true)
}

/// Save the omni cache if the main phase enabled writing and the content
/// actually changed
pub async fn save(state: &mut dyn StateStore, store: &dyn CacheStore) -> SetupResult<()> {
    let should_cache = state.get(STATE_CACHE).as_deref() == Some("true");
    if !should_cache {
        info!("Skipping saving cache");
        return Ok(());
    }

    hash::remove_shims(state).await?;

    let primary_key_prefix = state.get(STATE_PRIMARY_KEY_PREFIX).unwrap_or_default();
    let cache_paths = split_paths(&state.get(STATE_CACHED_PATHS).unwrap_or_default());
    let hash_specs: Vec<String> = state
        .get(STATE_CACHED_HASHED_PATHS)
        .unwrap_or_default()
        .split('\n')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let current_hash = hash::hash_cache(&hash_specs)?;

    if let Some(initial_hash) = state.get(STATE_CACHE_HASH).filter(|h| !h.is_empty()) {
        if initial_hash == current_hash {
            info!("Cache up-to-date (hash), skipping saving cache");
            return Ok(());
        }
    }

    let save_key = format!("{primary_key_prefix}{current_hash}");
    if let Some(hit_key) = state.get(STATE_CACHE_KEY).filter(|k| !k.is_empty()) {
        if hit_key == save_key {
            info!("Cache up-to-date (key), skipping saving cache");
            return Ok(());
        }
    }

    if store.save(&cache_paths, &save_key).await?.is_none() {
        return Ok(());
    }

    info!(
        "Cache saved from {} with key: {save_key}",
        join_paths(&cache_paths).replace('\n', ", ")
    );
    Ok(())
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn split_paths(joined: &str) -> Vec<PathBuf> {
    joined
        .split('\n')
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}
