//! State shared between the main and post pipeline phases
//!
//! The two phases may run as separate processes, so state cannot live in
//! memory. The runner's protocol is asymmetric: the main phase appends
//! `key=value` lines to the file named by `GITHUB_STATE`, and the runner
//! re-exposes them to the post phase as `STATE_<key>` environment variables.

use std::collections::HashMap;
use tracing::debug;

/// Key under which the cache-enabled flag is persisted
pub const STATE_CACHE: &str = "CACHE";
/// Key for the primary cache key prefix (`<prefix>-<platform>-<arch>-<manifestHash>-`)
pub const STATE_PRIMARY_KEY_PREFIX: &str = "PRIMARY_KEY_PREFIX";
/// Key for the newline-joined restore fallback keys
pub const STATE_RESTORE_KEYS: &str = "RESTORE_KEYS";
/// Key for the newline-joined list of cached paths
pub const STATE_CACHED_PATHS: &str = "CACHED_PATHS";
/// Key for the newline-joined list of hashed path specs
pub const STATE_CACHED_HASHED_PATHS: &str = "CACHED_HASHED_PATHS";
/// Key for the cache key the restore actually hit
pub const STATE_CACHE_KEY: &str = "CACHE_KEY";
/// Key for the content hash computed right after restore
pub const STATE_CACHE_HASH: &str = "CACHE_HASH";
/// Key memoizing the resolved omni data home
pub const STATE_OMNI_DATA_HOME: &str = "OMNI_DATA_HOME";
/// Key memoizing the resolved omni cache home
pub const STATE_OMNI_CACHE_HOME: &str = "OMNI_CACHE_HOME";

/// Key-value state surviving from the main phase to the post phase.
///
/// Entries are only ever written or overwritten, never deleted.
pub trait StateStore: Send + Sync {
    /// Read a state entry
    fn get(&self, key: &str) -> Option<String>;

    /// Write a state entry
    fn set(&mut self, key: &str, value: &str);

    /// Whether a state entry exists
    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// Production store speaking the runner's state-file protocol.
///
/// Writes go to the `GITHUB_STATE` file and to a local overlay so reads in
/// the same phase observe them; reads fall back to the `STATE_<key>`
/// variables the runner sets for the post phase.
#[derive(Default)]
pub struct GithubStateStore {
    overlay: HashMap<String, String>,
}

impl GithubStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for GithubStateStore {
    fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.overlay.get(key) {
            return Some(value.clone());
        }
        std::env::var(format!("STATE_{key}")).ok()
    }

    fn set(&mut self, key: &str, value: &str) {
        if let Err(e) = super::append_kv("GITHUB_STATE", key, value) {
            debug!("failed to persist state {key}: {e}");
        }
        self.overlay.insert(key.to_string(), value.to_string());
    }
}

/// In-memory store backing the tests
#[derive(Default)]
pub struct MemoryStateStore {
    entries: HashMap<String, String>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }
}
