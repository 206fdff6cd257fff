// ABOUTME: Self-update: release lookup, semver comparison, binary replacement.
// ABOUTME: The download itself is a commodity shell; the comparator is load-bearing.

use crate::error::{Error, Result};
use crate::version;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::time::Duration;

const GITHUB_API_URL: &str = "https://api.github.com/repos/reviewapps-dev/rad/releases/latest";

#[derive(Debug, Clone)]
pub struct ReleaseInfo {
    pub version: String,
    pub download_url: String,
    /// SHA-256 hex; empty means unverified.
    pub checksum: String,
    pub changelog: String,
}

#[derive(Deserialize)]
struct GithubRelease {
    tag_name: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

#[derive(Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
}

/// Query the release feed. Returns None when already up to date.
pub async fn check_for_update() -> Result<Option<ReleaseInfo>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .user_agent(format!("rad/{}", version::VERSION))
        .build()?;

    let release: GithubRelease = client
        .get(GITHUB_API_URL)
        .header(reqwest::header::ACCEPT, "application/vnd.github+json")
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let latest = release.tag_name.trim_start_matches('v').to_string();
    if !is_newer(&latest, version::VERSION) {
        return Ok(None);
    }

    let platform = format!("{}_{}", platform_os(), platform_arch());
    let asset_name = format!("rad_{platform}");
    let download_url = release
        .assets
        .iter()
        .find(|asset| asset.name == asset_name)
        .map(|asset| asset.browser_download_url.clone())
        .ok_or_else(|| Error::Tool {
            tool: "updater",
            message: format!("no binary available for {platform}"),
        })?;

    let checksum = match release.assets.iter().find(|a| a.name == "checksums.txt") {
        Some(asset) => fetch_checksum(&client, &asset.browser_download_url, &asset_name)
            .await
            .unwrap_or_default(),
        None => String::new(),
    };

    Ok(Some(ReleaseInfo {
        version: latest,
        download_url,
        checksum,
        changelog: release.body,
    }))
}

/// Download the release, verify it when a checksum is known, and atomically
/// replace the running binary.
pub async fn apply(info: &ReleaseInfo) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .user_agent(format!("rad/{}", version::VERSION))
        .build()?;

    tracing::info!(version = %info.version, "updater: downloading");
    let bytes = client
        .get(&info.download_url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;

    if !info.checksum.is_empty() {
        let actual = hex::encode(Sha256::digest(&bytes));
        if !actual.eq_ignore_ascii_case(&info.checksum) {
            return Err(Error::Tool {
                tool: "updater",
                message: format!("checksum mismatch: expected {}, got {actual}", info.checksum),
            });
        }
    }

    let current = std::env::current_exe()?;
    let dir = current.parent().unwrap_or(std::path::Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o755))?;
    }

    tmp.persist(&current).map_err(|err| err.error)?;
    tracing::info!(version = %info.version, "updater: installed");
    Ok(())
}

/// Whether the agent runs under systemd and can be bounced with systemctl.
pub fn is_systemd() -> bool {
    std::env::var_os("INVOCATION_ID").is_some() || std::os::unix::process::parent_id() == 1
}

async fn fetch_checksum(client: &reqwest::Client, url: &str, asset_name: &str) -> Option<String> {
    let body = client.get(url).send().await.ok()?.text().await.ok()?;
    // checksums.txt lines: "<hex>  <filename>"
    body.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            Some((fields.next()?, fields.next()?))
        })
        .find(|(_, name)| *name == asset_name)
        .map(|(hash, _)| hash.to_string())
}

/// True when `a` is a newer semver than `b`. Pre-release suffixes are
/// stripped before comparing.
pub fn is_newer(a: &str, b: &str) -> bool {
    parse_semver(a) > parse_semver(b)
}

pub fn parse_semver(v: &str) -> [u64; 3] {
    let v = v.trim_start_matches('v');
    let v = v.split('-').next().unwrap_or(v);
    let mut parts = [0u64; 3];
    for (i, field) in v.split('.').take(3).enumerate() {
        parts[i] = field.parse().unwrap_or(0);
    }
    parts
}

fn platform_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

fn platform_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_fields_compare_numerically() {
        assert!(is_newer("1.10.0", "1.9.9"));
        assert!(!is_newer("1.9.9", "1.10.0"));
        assert!(is_newer("2.0.0", "1.99.99"));
    }

    #[test]
    fn equal_versions_are_not_newer() {
        assert!(!is_newer("1.2.3", "1.2.3"));
    }

    #[test]
    fn prerelease_suffix_is_stripped() {
        assert_eq!(parse_semver("1.2.3-rc1"), [1, 2, 3]);
        assert!(!is_newer("1.2.3-rc1", "1.2.3"));
    }

    #[test]
    fn v_prefix_is_stripped() {
        assert_eq!(parse_semver("v0.4.1"), [0, 4, 1]);
        assert!(is_newer("v0.4.1", "0.4.0"));
    }

    #[test]
    fn short_versions_pad_with_zero() {
        assert_eq!(parse_semver("1.2"), [1, 2, 0]);
        assert!(is_newer("1.2.1", "1.2"));
    }
}
