// ABOUTME: Toolchain steps: Ruby and Node installation, gem and JS dependency installs.

use crate::deploy::{Step, StepContext};
use crate::drivers::{node, ruby};
use crate::error::{Error, Result};
use crate::state::Status;
use async_trait::async_trait;

/// Installs the requested Ruby via the version manager. Also flips the app
/// into `building`: this is where the long work starts.
pub struct InstallRubyStep;

#[async_trait]
impl Step for InstallRubyStep {
    fn name(&self) -> &'static str {
        "install-ruby"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let _ = ctx
            .store
            .update_status(&ctx.state.app_id, Status::Building, "");

        let mut version = ctx.state.ruby_version.trim().to_string();
        if version.is_empty() {
            version = ctx.config.defaults.ruby_version.clone();
            ctx.state.ruby_version = version.clone();
            let _ = ctx.store.update_inputs(&ctx.state.app_id, &ctx.state);
        }

        ctx.logger.log(format!("installing ruby {version} via rv"));
        ruby::install(&version).await?;

        match ruby::find_ruby(&version).await {
            Ok(path) => ctx.logger.log(format!("ruby path: {path}")),
            Err(err) => ctx
                .logger
                .log(format!("could not determine ruby path: {err} (continuing)")),
        }

        Ok(())
    }
}

/// Ensures the host's platform triple is in Gemfile.lock so Bundler installs
/// native gems for this machine.
pub struct BundlePlatformStep;

#[async_trait]
impl Step for BundlePlatformStep {
    fn name(&self) -> &'static str {
        "bundle-platform"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let platform = detect_platform().await;
        ctx.logger
            .log(format!("ensuring platform {platform} is in Gemfile.lock"));

        // -S so ruby searches PATH for the bundle script.
        let mut cmd = ruby::run_in_dir(
            &ctx.repo_dir,
            &ctx.state.ruby_version,
            &[],
            &["-S", "bundle", "lock", "--add-platform", &platform],
        );
        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(Error::tool("bundle lock --add-platform", &output));
        }
        Ok(())
    }
}

/// `arch-os` the way Bundler spells it, from `uname -m` so a Rosetta-
/// translated agent still reports the real hardware.
async fn detect_platform() -> String {
    let arch = match tokio::process::Command::new("uname").arg("-m").output().await {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        }
        _ => std::env::consts::ARCH.to_string(),
    };
    let arch = match arch.as_str() {
        "arm64" => "aarch64".to_string(),
        "amd64" => "x86_64".to_string(),
        other => other.to_string(),
    };
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    format!("{arch}-{os}")
}

/// Bundler install from the lockfile via the version manager.
pub struct InstallGemsStep;

#[async_trait]
impl Step for InstallGemsStep {
    fn name(&self) -> &'static str {
        "install-gems"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        ctx.logger.log("installing gems via rv clean-install");
        ruby::clean_install(&ctx.repo_dir, &ctx.env_slice()).await?;
        ctx.logger.log("gems installed");
        Ok(())
    }
}

/// Installs Node when a version was requested or detected; otherwise skips.
pub struct InstallNodeStep;

#[async_trait]
impl Step for InstallNodeStep {
    fn name(&self) -> &'static str {
        "install-node"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let version = ctx.state.node_version.trim().to_string();
        if version.is_empty() {
            ctx.logger.log("no node version specified, skipping");
            return Ok(());
        }

        ctx.logger.log(format!("installing node {version} via fnm"));
        node::install(&version).await?;

        match node::which(&version).await {
            Ok(bin_dir) => ctx.logger.log(format!("node bin dir: {bin_dir}")),
            Err(err) => ctx
                .logger
                .log(format!("could not determine node path: {err} (continuing)")),
        }

        Ok(())
    }
}

/// Lockfile → package manager detection. A bare package.json defaults to npm.
pub struct DetectJsPmStep;

const LOCKFILES: [(&str, &str); 5] = [
    ("bun.lockb", "bun"),
    ("bun.lock", "bun"),
    ("pnpm-lock.yaml", "pnpm"),
    ("yarn.lock", "yarn"),
    ("package-lock.json", "npm"),
];

#[async_trait]
impl Step for DetectJsPmStep {
    fn name(&self) -> &'static str {
        "detect-jspm"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        for (file, pm) in LOCKFILES {
            if ctx.repo_dir.join(file).exists() {
                ctx.js_package_manager = Some(pm.to_string());
                ctx.logger
                    .log(format!("detected JS package manager: {pm} (from {file})"));
                return Ok(());
            }
        }

        if ctx.repo_dir.join("package.json").exists() {
            ctx.js_package_manager = Some("npm".to_string());
            ctx.logger
                .log("detected JS package manager: npm (default, package.json present)");
        } else {
            ctx.logger.log("no JS package manager detected");
        }

        Ok(())
    }
}

/// Frozen-lockfile install with whichever package manager was detected.
pub struct InstallJsDepsStep;

#[async_trait]
impl Step for InstallJsDepsStep {
    fn name(&self) -> &'static str {
        "install-js-deps"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let Some(pm) = ctx.js_package_manager.clone() else {
            ctx.logger.log("no JS package manager, skipping");
            return Ok(());
        };

        let node_version = ctx.state.node_version.trim().to_string();
        if node_version.is_empty() {
            ctx.logger.log("no node version specified, skipping JS deps install");
            return Ok(());
        }

        ctx.logger.log(format!("installing JS deps with {pm}"));

        let args: &[&str] = match pm.as_str() {
            "npm" => &["npm", "ci"],
            "yarn" => &["yarn", "install", "--frozen-lockfile"],
            "pnpm" => &["pnpm", "install", "--frozen-lockfile"],
            "bun" => &["bun", "install", "--frozen-lockfile"],
            other => {
                return Err(Error::Tool {
                    tool: "js-deps",
                    message: format!("unknown JS package manager: {other}"),
                })
            }
        };

        let mut cmd = node::exec_in_dir(&ctx.repo_dir, &node_version, &ctx.env_slice(), args);
        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(Error::tool("js-deps install", &output));
        }

        ctx.logger.log("JS deps installed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn platform_is_arch_dash_os() {
        let platform = detect_platform().await;
        let (arch, os) = platform.split_once('-').expect("arch-os");
        assert!(!arch.is_empty());
        assert!(matches!(os, "linux" | "darwin"));
        assert_ne!(arch, "arm64");
        assert_ne!(arch, "amd64");
    }
}
