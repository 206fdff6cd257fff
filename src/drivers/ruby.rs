// ABOUTME: Shells over the rv Ruby version manager.
// ABOUTME: Installs rubies and builds commands that run inside a version's environment.

use super::{probe_version, run_checked};
use crate::error::Result;
use std::path::Path;
use tokio::process::Command;

const RV_BIN: &str = "rv";

pub async fn install(ruby_version: &str) -> Result<()> {
    let mut cmd = Command::new(RV_BIN);
    cmd.args(["ruby", "install", ruby_version]);
    run_checked("rv ruby install", &mut cmd).await?;
    Ok(())
}

pub async fn find_ruby(ruby_version: &str) -> Result<String> {
    let mut cmd = Command::new(RV_BIN);
    cmd.args(["ruby", "find", ruby_version]);
    let output = run_checked("rv ruby find", &mut cmd).await?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// `rv clean-install` in the app directory: Bundler install from the lockfile.
pub async fn clean_install(dir: &Path, env: &[(String, String)]) -> Result<()> {
    let mut cmd = Command::new(RV_BIN);
    cmd.arg("clean-install").current_dir(dir).envs(env.iter().cloned());
    run_checked("rv clean-install", &mut cmd).await?;
    Ok(())
}

/// Build a command that runs `ruby <args>` under the given version:
/// `rv ruby run VERSION -- <args>`. Use for bin/rails, `-S bundle`, `-e`.
pub fn run_in_dir(dir: &Path, ruby_version: &str, env: &[(String, String)], args: &[&str]) -> Command {
    let mut cmd = Command::new(RV_BIN);
    cmd.args(["ruby", "run", ruby_version, "--"])
        .args(args)
        .current_dir(dir)
        .envs(env.iter().cloned());
    cmd
}

/// Build a command that runs an arbitrary shell string with the version's
/// ruby environment (PATH, GEM_HOME) in place: ruby -e exec's into bash.
pub fn exec_in_dir(dir: &Path, ruby_version: &str, env: &[(String, String)], shell_cmd: &str) -> Command {
    let ruby_code = format!("exec 'bash', '-c', %q({shell_cmd})");
    run_in_dir(dir, ruby_version, env, &["-e", &ruby_code])
}

/// Installed Ruby versions, best-effort.
pub async fn list_installed() -> Vec<String> {
    let out = probe_version(RV_BIN, &["ruby", "list"]).await;
    let mut versions = Vec::new();
    for line in out.lines() {
        let line = line.trim();
        if !line.contains("[installed]") {
            continue;
        }
        // Format: "ruby-3.4.1  [installed] /path/to/ruby"
        if let Some(first) = line.split_whitespace().next() {
            let ver = first.trim_start_matches("ruby-").to_string();
            if !versions.contains(&ver) {
                versions.push(ver);
            }
        }
    }
    versions
}

pub async fn version() -> String {
    probe_version(RV_BIN, &["--version"]).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_wraps_shell_command_in_ruby_exec() {
        let cmd = exec_in_dir(
            Path::new("/tmp"),
            "3.4.1",
            &[],
            "bundle exec sidekiq",
        );
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(args[..4], ["ruby", "run", "3.4.1", "--"]);
        assert_eq!(args[4], "-e");
        assert!(args[5].contains("bundle exec sidekiq"));
    }
}
