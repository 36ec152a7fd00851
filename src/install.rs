//! Install omni from its release feed
//!
//! Lists releases, picks the first one matching the version selector with a
//! usable asset for this platform/architecture, downloads and extracts it,
//! and puts the extraction directory on the step PATH.

use crate::error::{SetupError, SetupResult};
use crate::version::VersionSpec;
use crate::workflow;
use async_trait::async_trait;
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const RELEASES_URL: &str = "https://api.github.com/repos/XaF/omni/releases";

/// Assets smaller than this are checksum files and the like, not archives
const MIN_ASSET_SIZE: u64 = 1024;

#[derive(Debug, Clone, Deserialize)]
struct Release {
    tag_name: String,
    draft: bool,
    prerelease: bool,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReleaseAsset {
    name: String,
    size: u64,
    browser_download_url: String,
}

/// Normalized platform name for asset matching and cache keys
pub fn current_platform() -> SetupResult<String> {
    match std::env::consts::OS {
        "macos" => Ok("darwin".to_string()),
        "linux" => Ok("linux".to_string()),
        other => Err(SetupError::UnsupportedPlatform(other.to_string())),
    }
}

/// Normalized architecture name for asset matching and cache keys
pub fn current_arch() -> SetupResult<String> {
    match std::env::consts::ARCH {
        "aarch64" => Ok("arm64".to_string()),
        "x86_64" => Ok("x86_64".to_string()),
        other => Err(SetupError::UnsupportedArch(other.to_string())),
    }
}

/// Resolve the release-feed credential from the priority list of sources
pub fn resolve_token(input_token: &str) -> Option<String> {
    for candidate in [
        std::env::var("GITHUB_TOKEN").ok(),
        std::env::var("GH_TOKEN").ok(),
        Some(input_token.to_string()),
    ]
    .into_iter()
    .flatten()
    {
        if !candidate.is_empty() {
            return Some(candidate);
        }
    }
    None
}

/// Abstract install step, so the orchestrator can be tested without the
/// release feed
#[async_trait]
pub trait Installer: Send + Sync {
    /// Install the selected version; returns the resolved version string
    async fn install(&self, version: &str, token: Option<String>) -> SetupResult<String>;
}

/// Installer backed by the real release feed
pub struct ReleaseInstaller;

#[async_trait]
impl Installer for ReleaseInstaller {
    async fn install(&self, version: &str, token: Option<String>) -> SetupResult<String> {
        setup(version, token).await
    }
}

/// Install the selected omni version and return the resolved version string
pub async fn setup(version_input: &str, token: Option<String>) -> SetupResult<String> {
    let spec = VersionSpec::parse(version_input)?;
    let _group = workflow::group(&format!("Setup omni@{spec}"));

    let platform = current_platform()?;
    let arch = current_arch()?;

    info!("Getting releases from {RELEASES_URL}");
    let releases = fetch_releases(token).await?;

    let release = select_release(&releases, &spec, &platform, &arch).ok_or_else(|| {
        SetupError::ReleaseNotFound {
            version: spec.tag_prefix().to_string(),
            platform: platform.clone(),
            arch: arch.clone(),
        }
    })?;
    info!("Found release: {}", release.tag_name);

    let asset = select_asset(release, &platform, &arch).ok_or_else(|| SetupError::AssetNotFound {
        platform: platform.clone(),
        arch: arch.clone(),
    })?;
    info!("Found asset: {}", asset.name);

    let version = release.tag_name.trim_start_matches('v').to_string();

    let install_dir = install_root().join(format!("omni-{version}-{platform}-{arch}"));
    let archive_path = download_dir().join(&asset.name);
    download(&asset.browser_download_url, &archive_path).await?;

    let url = asset.browser_download_url.clone();
    let archive = archive_path.clone();
    let dest = install_dir.clone();
    tokio::task::spawn_blocking(move || extract(&archive, &dest, &url))
        .await
        .map_err(|e| SetupError::Internal(format!("extraction task failed: {e}")))??;

    workflow::add_path(&install_dir.display().to_string())?;
    workflow::export_var("OMNI_NONINTERACTIVE", "1")?;
    workflow::set_output("version", &version)?;

    Ok(version)
}

fn select_release<'a>(
    releases: &'a [Release],
    spec: &VersionSpec,
    platform: &str,
    arch: &str,
) -> Option<&'a Release> {
    releases.iter().find(|release| {
        spec.matches_tag(&release.tag_name)
            && !release.draft
            && !release.prerelease
            && !release.assets.is_empty()
            && release
                .assets
                .iter()
                .any(|asset| asset_matches(asset, platform, arch))
    })
}

fn select_asset<'a>(release: &'a Release, platform: &str, arch: &str) -> Option<&'a ReleaseAsset> {
    release.assets.iter().find(|asset| {
        (asset.name.ends_with(".tar.gz") || asset.name.ends_with(".zip"))
            && asset_matches(asset, platform, arch)
    })
}

fn asset_matches(asset: &ReleaseAsset, platform: &str, arch: &str) -> bool {
    asset.name.contains(platform) && asset.name.contains(arch) && asset.size > MIN_ASSET_SIZE
}

async fn fetch_releases(token: Option<String>) -> SetupResult<Vec<Release>> {
    tokio::task::spawn_blocking(move || {
        let mut request = ureq::get(RELEASES_URL)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = token {
            request = request.header("Authorization", format!("token {token}"));
        }

        let mut response = request
            .call()
            .map_err(|e| SetupError::ReleaseFetch(e.to_string()))?;
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| SetupError::ReleaseFetch(e.to_string()))?;
        let releases: Vec<Release> = serde_json::from_str(&body)?;
        Ok(releases)
    })
    .await
    .map_err(|e| SetupError::Internal(format!("release fetch task failed: {e}")))?
}

async fn download(url: &str, dest: &Path) -> SetupResult<()> {
    debug!("Downloading {url} to {}", dest.display());
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| SetupError::io(format!("creating directory {}", parent.display()), e))?;
    }

    let url = url.to_string();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let response = ureq::get(&url).call().map_err(|e| SetupError::Download {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        let mut reader = response.into_body().into_reader();
        let mut file = File::create(&dest)
            .map_err(|e| SetupError::io(format!("creating {}", dest.display()), e))?;
        std::io::copy(&mut reader, &mut file).map_err(|e| SetupError::Download {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        Ok(())
    })
    .await
    .map_err(|e| SetupError::Internal(format!("download task failed: {e}")))?
}

fn extract(archive: &Path, dest: &Path, url: &str) -> SetupResult<()> {
    std::fs::create_dir_all(dest)
        .map_err(|e| SetupError::io(format!("creating directory {}", dest.display()), e))?;

    if url.ends_with(".zip") {
        extract_zip(archive, dest)
    } else {
        extract_tar_gz(archive, dest)
    }
}

fn extract_tar_gz(archive: &Path, dest: &Path) -> SetupResult<()> {
    let file = File::open(archive)
        .map_err(|e| SetupError::io(format!("opening {}", archive.display()), e))?;
    let decoder = flate2::read::GzDecoder::new(file);
    tar::Archive::new(decoder)
        .unpack(dest)
        .map_err(|e| SetupError::Extract {
            path: archive.to_path_buf(),
            reason: e.to_string(),
        })
}

fn extract_zip(archive: &Path, dest: &Path) -> SetupResult<()> {
    let file = File::open(archive)
        .map_err(|e| SetupError::io(format!("opening {}", archive.display()), e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| SetupError::Extract {
        path: archive.to_path_buf(),
        reason: e.to_string(),
    })?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|e| SetupError::Extract {
            path: archive.to_path_buf(),
            reason: e.to_string(),
        })?;
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let outpath = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)
                .map_err(|e| SetupError::io(format!("creating {}", outpath.display()), e))?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SetupError::io(format!("creating {}", parent.display()), e))?;
        }
        let mut outfile = File::create(&outpath)
            .map_err(|e| SetupError::io(format!("creating {}", outpath.display()), e))?;
        std::io::copy(&mut entry, &mut outfile)
            .map_err(|e| SetupError::io(format!("writing {}", outpath.display()), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let _ = std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode));
            }
        }
    }

    Ok(())
}

fn install_root() -> PathBuf {
    if let Some(tool_cache) = std::env::var_os("RUNNER_TOOL_CACHE").filter(|v| !v.is_empty()) {
        return PathBuf::from(tool_cache);
    }
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("omni-setup")
        .join("tool")
}

fn download_dir() -> PathBuf {
    if let Some(temp) = std::env::var_os("RUNNER_TEMP").filter(|v| !v.is_empty()) {
        return PathBuf::from(temp);
    }
    std::env::temp_dir().join(format!("omni-setup-{}", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn release(tag: &str, draft: bool, prerelease: bool, assets: Vec<ReleaseAsset>) -> Release {
        Release {
            tag_name: tag.to_string(),
            draft,
            prerelease,
            assets,
        }
    }

    fn asset(name: &str, size: u64) -> ReleaseAsset {
        ReleaseAsset {
            name: name.to_string(),
            size,
            browser_download_url: format!("https://example.com/{name}"),
        }
    }

    #[test]
    fn selects_first_matching_stable_release() {
        let releases = vec![
            release("v2.0.0-rc1", false, true, vec![asset("omni-2.0.0-rc1-x86_64-linux.tar.gz", 4096)]),
            release("v1.9.0", true, false, vec![asset("omni-1.9.0-x86_64-linux.tar.gz", 4096)]),
            release("v1.8.0", false, false, vec![asset("omni-1.8.0-x86_64-linux.tar.gz", 4096)]),
            release("v1.7.0", false, false, vec![asset("omni-1.7.0-x86_64-linux.tar.gz", 4096)]),
        ];

        let spec = VersionSpec::parse("latest").unwrap();
        let selected = select_release(&releases, &spec, "linux", "x86_64").unwrap();
        assert_eq!(selected.tag_name, "v1.8.0");
    }

    #[test]
    fn skips_releases_without_matching_assets() {
        let releases = vec![
            release("v1.8.0", false, false, vec![asset("omni-1.8.0-arm64-darwin.tar.gz", 4096)]),
            release("v1.7.0", false, false, vec![asset("omni-1.7.0-x86_64-linux.tar.gz", 4096)]),
        ];

        let spec = VersionSpec::parse("latest").unwrap();
        let selected = select_release(&releases, &spec, "linux", "x86_64").unwrap();
        assert_eq!(selected.tag_name, "v1.7.0");
    }

    #[test]
    fn respects_version_selector_prefix() {
        let releases = vec![
            release("v1.8.0", false, false, vec![asset("omni-1.8.0-x86_64-linux.tar.gz", 4096)]),
            release("v1.7.2", false, false, vec![asset("omni-1.7.2-x86_64-linux.tar.gz", 4096)]),
        ];

        let spec = VersionSpec::parse("1.7").unwrap();
        let selected = select_release(&releases, &spec, "linux", "x86_64").unwrap();
        assert_eq!(selected.tag_name, "v1.7.2");

        let spec = VersionSpec::parse("2").unwrap();
        assert!(select_release(&releases, &spec, "linux", "x86_64").is_none());
    }

    #[test]
    fn asset_selection_requires_archive_extension_and_size() {
        let rel = release(
            "v1.8.0",
            false,
            false,
            vec![
                asset("omni-1.8.0-x86_64-linux.sha256", 64),
                asset("omni-1.8.0-x86_64-linux.tar.gz", 64),
                asset("omni-1.8.0-x86_64-linux.zip", 4096),
            ],
        );

        let selected = select_asset(&rel, "linux", "x86_64").unwrap();
        assert_eq!(selected.name, "omni-1.8.0-x86_64-linux.zip");
    }

    #[test]
    #[serial]
    fn token_priority_order() {
        std::env::remove_var("GITHUB_TOKEN");
        std::env::remove_var("GH_TOKEN");

        assert_eq!(resolve_token(""), None);
        assert_eq!(resolve_token("input-token").as_deref(), Some("input-token"));

        std::env::set_var("GH_TOKEN", "gh-token");
        assert_eq!(resolve_token("input-token").as_deref(), Some("gh-token"));

        std::env::set_var("GITHUB_TOKEN", "github-token");
        assert_eq!(resolve_token("input-token").as_deref(), Some("github-token"));

        std::env::remove_var("GITHUB_TOKEN");
        std::env::remove_var("GH_TOKEN");
    }

    #[test]
    fn extracts_tar_gz_archive() {
        let dir = TempDir::new().unwrap();
        let archive_path = dir.path().join("omni.tar.gz");

        // Build a small archive containing a single "omni" file
        let file = File::create(&archive_path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let payload = b"#!/bin/sh\necho omni\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(payload.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, "omni", payload.as_slice()).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let dest = dir.path().join("out");
        extract(&archive_path, &dest, "https://example.com/omni.tar.gz").unwrap();

        let extracted = std::fs::read(dest.join("omni")).unwrap();
        assert_eq!(extracted, payload);
    }
}
