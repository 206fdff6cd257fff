// ABOUTME: Shells over the git binary for shallow clones and redeploy refreshes.

use super::run_checked;
use crate::error::Result;
use std::path::Path;
use tokio::process::Command;

/// Shallow clone of a single branch.
pub async fn clone(repo_url: &str, branch: &str, dest: &Path) -> Result<()> {
    let mut cmd = Command::new("git");
    cmd.args(["clone", "--depth", "1", "--branch", branch, repo_url])
        .arg(dest);
    run_checked("git clone", &mut cmd).await?;
    Ok(())
}

/// Redeploy refresh: fetch the branch and hard-reset onto its origin tip.
pub async fn fetch_and_reset(repo_dir: &Path, branch: &str) -> Result<()> {
    let mut fetch = Command::new("git");
    fetch.args(["fetch", "origin", branch]).current_dir(repo_dir);
    run_checked("git fetch", &mut fetch).await?;

    let mut reset = Command::new("git");
    reset
        .args(["reset", "--hard", &format!("origin/{branch}")])
        .current_dir(repo_dir);
    run_checked("git reset", &mut reset).await?;
    Ok(())
}

pub async fn commit_sha(repo_dir: &Path) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.args(["rev-parse", "HEAD"]).current_dir(repo_dir);
    let output = run_checked("git rev-parse", &mut cmd).await?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub async fn init_submodules(repo_dir: &Path) -> Result<()> {
    let mut cmd = Command::new("git");
    cmd.args(["submodule", "update", "--init", "--recursive"])
        .current_dir(repo_dir);
    run_checked("git submodule", &mut cmd).await?;
    Ok(())
}
