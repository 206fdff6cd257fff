// ABOUTME: Shells over the fnm Node version manager.

use super::{probe_version, run_checked};
use crate::error::Result;
use std::path::Path;
use tokio::process::Command;

const FNM_BIN: &str = "fnm";

pub async fn install(node_version: &str) -> Result<()> {
    let mut cmd = Command::new(FNM_BIN);
    cmd.args(["install", node_version]);
    run_checked("fnm install", &mut cmd).await?;
    Ok(())
}

/// Directory containing the node binary for a version.
pub async fn which(node_version: &str) -> Result<String> {
    let mut cmd = Command::new(FNM_BIN);
    cmd.args(["exec", "--using", node_version, "--", "which", "node"]);
    let output = run_checked("fnm exec which node", &mut cmd).await?;
    let node_path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok(Path::new(&node_path)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or(node_path))
}

/// Build a command that runs under the given node version.
pub fn exec_in_dir(dir: &Path, node_version: &str, env: &[(String, String)], args: &[&str]) -> Command {
    let mut cmd = Command::new(FNM_BIN);
    cmd.args(["exec", "--using", node_version, "--"])
        .args(args)
        .current_dir(dir)
        .envs(env.iter().cloned());
    cmd
}

/// Installed Node versions, best-effort.
pub async fn list_installed() -> Vec<String> {
    let out = probe_version(FNM_BIN, &["list"]).await;
    let mut versions = Vec::new();
    for line in out.lines() {
        let line = line.trim();
        if line.is_empty() || line.contains("system") {
            continue;
        }
        // Format: "* v22.1.0 default" or "v20.10.0"
        if let Some(field) = line.split_whitespace().find(|f| f.starts_with('v')) {
            versions.push(field.trim_start_matches('v').to_string());
        }
    }
    versions
}

pub async fn version() -> String {
    probe_version(FNM_BIN, &["--version"]).await
}
