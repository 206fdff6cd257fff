// ABOUTME: Thin shells over the external toolchain binaries the agent orchestrates.
// ABOUTME: git, the Ruby/Node version managers, the Postgres CLI, and the reverse proxy.

pub mod git;
pub mod node;
pub mod postgres;
pub mod proxy;
pub mod ruby;

use crate::error::{Error, Result};
use tokio::process::Command;

/// Run a command to completion, mapping a non-zero exit to a tool error
/// that carries the captured stderr.
pub(crate) async fn run_checked(tool: &'static str, cmd: &mut Command) -> Result<std::process::Output> {
    let output = cmd.output().await?;
    if !output.status.success() {
        return Err(Error::tool(tool, &output));
    }
    Ok(output)
}

/// Best-effort `--version` style probe, `unknown` when the binary is absent.
pub(crate) async fn probe_version(bin: &str, args: &[&str]) -> String {
    match Command::new(bin).args(args).output().await {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        }
        _ => "unknown".to_string(),
    }
}
