//! Cache storage backend
//!
//! The engine in `cache::restore`/`cache::save` only derives keys and
//! decides whether work is needed; actual storage goes through this trait.
//! The directory store below is the self-hosted-runner implementation: one
//! subdirectory per key, holding a manifest of the cached absolute paths
//! and a numbered tree copy per path.

use crate::error::{SetupError, SetupResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::WalkDir;

/// Remote cache service seen from the key engine
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Restore cached trees to their recorded locations.
    ///
    /// The primary key is tried first (exact, then as a prefix — composed
    /// keys end with a dangling `-`), then each restore key as a prefix,
    /// newest entry winning. Returns the key of the entry restored.
    async fn restore(
        &self,
        paths: &[PathBuf],
        primary_key: &str,
        restore_keys: &[String],
    ) -> SetupResult<Option<String>>;

    /// Save the trees under `key`. Returns `None` when an entry with the
    /// same key already exists; the store never overwrites.
    async fn save(&self, paths: &[PathBuf], key: &str) -> SetupResult<Option<String>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    paths: Vec<PathBuf>,
}

const MANIFEST_FILE: &str = "manifest.json";

/// Directory-backed cache store
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Store rooted at `OMNI_SETUP_CACHE_DIR`, falling back to the user
    /// cache directory
    pub fn new() -> Self {
        let root = std::env::var_os("OMNI_SETUP_CACHE_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::cache_dir()
                    .unwrap_or_else(std::env::temp_dir)
                    .join("omni-setup")
                    .join("cache")
            });
        Self { root }
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_dir(&self, key: &str) -> PathBuf {
        self.root.join(dir_name(key))
    }

    /// Pick the entry to restore: exact primary key, then primary key as a
    /// prefix, then each restore key as a prefix; ties go to the newest
    fn find_entry(&self, primary_key: &str, restore_keys: &[String]) -> Option<(String, PathBuf)> {
        let exact = self.entry_dir(primary_key);
        if exact.join(MANIFEST_FILE).is_file() {
            return Some((primary_key.to_string(), exact));
        }

        let mut prefixes = vec![dir_name(primary_key)];
        prefixes.extend(restore_keys.iter().map(|k| dir_name(k)));

        for prefix in prefixes {
            let mut best: Option<(String, PathBuf, SystemTime)> = None;
            let Ok(entries) = std::fs::read_dir(&self.root) else {
                return None;
            };
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !name.starts_with(&prefix) {
                    continue;
                }
                let path = entry.path();
                if !path.join(MANIFEST_FILE).is_file() {
                    continue;
                }
                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                if best.as_ref().is_none_or(|(_, _, ts)| modified > *ts) {
                    best = Some((name, path, modified));
                }
            }
            if let Some((name, path, _)) = best {
                return Some((name, path));
            }
        }
        None
    }
}

impl Default for DirStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for DirStore {
    async fn restore(
        &self,
        paths: &[PathBuf],
        primary_key: &str,
        restore_keys: &[String],
    ) -> SetupResult<Option<String>> {
        let _ = paths;
        let primary_key = primary_key.to_string();
        let restore_keys = restore_keys.to_vec();
        let root = self.root.clone();

        tokio::task::spawn_blocking(move || {
            let store = DirStore { root };
            let Some((key, entry)) = store.find_entry(&primary_key, &restore_keys) else {
                return Ok(None);
            };

            let manifest = read_manifest(&entry)?;
            for (index, original) in manifest.paths.iter().enumerate() {
                let source = entry.join(index.to_string());
                if source.is_dir() {
                    copy_tree(&source, original)?;
                }
            }
            Ok(Some(key))
        })
        .await
        .map_err(|e| SetupError::Internal(format!("cache restore task failed: {e}")))?
    }

    async fn save(&self, paths: &[PathBuf], key: &str) -> SetupResult<Option<String>> {
        let key = key.to_string();
        let paths = paths.to_vec();
        let root = self.root.clone();

        tokio::task::spawn_blocking(move || {
            let store = DirStore { root: root.clone() };
            let final_dir = store.entry_dir(&key);
            if final_dir.exists() {
                debug!("cache entry already exists for key {key}");
                return Ok(None);
            }

            std::fs::create_dir_all(&root)
                .map_err(|e| SetupError::io(format!("creating directory {}", root.display()), e))?;

            let staging = root.join(format!(".tmp-{}-{}", std::process::id(), dir_name(&key)));
            if staging.exists() {
                std::fs::remove_dir_all(&staging).map_err(|e| {
                    SetupError::io(format!("removing stale staging {}", staging.display()), e)
                })?;
            }
            std::fs::create_dir_all(&staging).map_err(|e| {
                SetupError::io(format!("creating directory {}", staging.display()), e)
            })?;

            for (index, path) in paths.iter().enumerate() {
                if path.is_dir() {
                    copy_tree(path, &staging.join(index.to_string()))?;
                }
            }
            let manifest = Manifest {
                paths: paths.clone(),
            };
            let encoded = serde_json::to_string_pretty(&manifest)?;
            std::fs::write(staging.join(MANIFEST_FILE), encoded).map_err(|e| {
                SetupError::io(format!("writing manifest in {}", staging.display()), e)
            })?;

            match std::fs::rename(&staging, &final_dir) {
                Ok(()) => Ok(Some(key)),
                Err(_) if final_dir.exists() => {
                    // Raced with another writer; their entry wins
                    let _ = std::fs::remove_dir_all(&staging);
                    Ok(None)
                }
                Err(e) => Err(SetupError::io(
                    format!("publishing cache entry {}", final_dir.display()),
                    e,
                )),
            }
        })
        .await
        .map_err(|e| SetupError::Internal(format!("cache save task failed: {e}")))?
    }
}

fn dir_name(key: &str) -> String {
    key.replace(['/', '\\'], "_")
}

fn read_manifest(entry: &Path) -> SetupResult<Manifest> {
    let path = entry.join(MANIFEST_FILE);
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| SetupError::io(format!("reading {}", path.display()), e))?;
    serde_json::from_str(&raw).map_err(|e| SetupError::CacheEntryInvalid {
        path: entry.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Copy a directory tree without following symbolic links
fn copy_tree(source: &Path, dest: &Path) -> SetupResult<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| SetupError::CacheEntryInvalid {
            path: source.to_path_buf(),
            reason: e.to_string(),
        })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| SetupError::Internal(format!("path outside copy root: {e}")))?;
        let target = dest.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)
                .map_err(|e| SetupError::io(format!("creating {}", target.display()), e))?;
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SetupError::io(format!("creating {}", parent.display()), e))?;
            }
            std::fs::copy(entry.path(), &target).map_err(|e| {
                SetupError::io(
                    format!("copying {} to {}", entry.path().display(), target.display()),
                    e,
                )
            })?;
        } else {
            debug!("skipping non-regular file {}", entry.path().display());
        }
    }
    Ok(())
}
