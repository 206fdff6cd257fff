// ABOUTME: Configuration steps: manifest detection, branch filtering,
// ABOUTME: system packages, and the Rails initializer injection.

use crate::deploy::{Step, StepContext};
use crate::error::{Error, Result};
use crate::manifest::{Manifest, Patterns, MANIFEST_FILENAME};
use async_trait::async_trait;
use regex::Regex;

/// Reads `reviewapps.yml` if present and fills the gaps the deploy request
/// left open (request values win). Also applies `app_path` re-rooting,
/// loads process declarations, merges request-level hooks, and falls back
/// to `.ruby-version` / `.node-version` / `.nvmrc` files.
pub struct DetectConfigStep;

#[async_trait]
impl Step for DetectConfigStep {
    fn name(&self) -> &'static str {
        "detect-config"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let yml_path = ctx.repo_dir.join(MANIFEST_FILENAME);

        if yml_path.exists() {
            ctx.logger.log(format!("found {MANIFEST_FILENAME}"));
            let manifest = Manifest::parse(&yml_path)?;

            fill_if_empty(&mut ctx.state.ruby_version, manifest.ruby.as_deref());
            fill_if_empty(&mut ctx.state.node_version, manifest.node.as_deref());
            fill_if_empty(&mut ctx.state.database_adapter, manifest.database.as_deref());
            if ctx.state.databases.is_empty() && !manifest.databases.is_empty() {
                ctx.state.databases = manifest.databases.clone();
            }
            fill_if_empty(&mut ctx.state.build_command, manifest.build.command.as_deref());
            fill_if_empty(&mut ctx.state.seed_command, manifest.seed.command.as_deref());

            // Manifest env is lower priority than request env.
            for (k, v) in &manifest.env {
                ctx.state
                    .env_vars
                    .entry(k.clone())
                    .or_insert_with(|| v.clone());
            }

            // Monorepo support: re-root the working directory.
            if let Some(ref app_path) = manifest.app_path {
                if !app_path.is_empty() && app_path != "." {
                    ctx.repo_dir = ctx.repo_dir.join(app_path);
                    ctx.logger.log(format!(
                        "monorepo: app_path={app_path}, working dir={}",
                        ctx.repo_dir.display()
                    ));
                    if !ctx.repo_dir.exists() {
                        return Err(Error::AppPathMissing(app_path.clone()));
                    }
                }
            }

            if !manifest.processes.is_empty() {
                ctx.processes = manifest.processes.clone();
                let names: Vec<&str> = manifest.processes.keys().map(String::as_str).collect();
                ctx.logger
                    .log(format!("processes from {MANIFEST_FILENAME}: {names:?}"));
            }

            ctx.manifest = Some(manifest);
        } else {
            ctx.logger
                .log(format!("no {MANIFEST_FILENAME} found, using defaults"));
        }

        // Merge request-level hooks even without a manifest, so they are
        // never silently dropped. Manifest hooks win per phase.
        if let Some(request_hooks) = ctx.state.hooks.clone() {
            ctx.manifest
                .get_or_insert_with(Manifest::default)
                .merge_request_hooks(&request_hooks);
        }

        if ctx.state.ruby_version.is_empty() {
            if let Ok(version) = std::fs::read_to_string(ctx.repo_dir.join(".ruby-version")) {
                ctx.state.ruby_version = version.trim().to_string();
                ctx.logger.log(format!(
                    "detected ruby version from .ruby-version: {}",
                    ctx.state.ruby_version
                ));
            }
        }

        if ctx.state.node_version.is_empty() {
            for file in [".node-version", ".nvmrc"] {
                if let Ok(version) = std::fs::read_to_string(ctx.repo_dir.join(file)) {
                    ctx.state.node_version = version.trim().to_string();
                    ctx.logger.log(format!(
                        "detected node version from {file}: {}",
                        ctx.state.node_version
                    ));
                    break;
                }
            }
        }

        ctx.store.update_inputs(&ctx.state.app_id, &ctx.state)?;
        Ok(())
    }
}

fn fill_if_empty(dst: &mut String, src: Option<&str>) {
    if dst.is_empty() {
        if let Some(src) = src {
            if !src.is_empty() {
                *dst = src.to_string();
            }
        }
    }
}

/// Rejects the deploy when the branch falls outside the manifest's
/// `branches.only` allowlist or inside `branches.ignore`.
pub struct BranchFilterStep;

#[async_trait]
impl Step for BranchFilterStep {
    fn name(&self) -> &'static str {
        "branch-filter"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let Some(ref manifest) = ctx.manifest else {
            return Ok(());
        };
        let rules = &manifest.branches;
        if rules.is_empty() {
            return Ok(());
        }

        let branch = ctx.state.branch.clone();

        if !rules.only.is_empty() {
            if let Some(pattern) = first_match(&rules.only, &branch) {
                ctx.logger
                    .log(format!("branch {branch:?} matches branches.only pattern {pattern:?}"));
            } else {
                ctx.logger.log(format!(
                    "branch {branch:?} does not match any branches.only pattern, skipping deploy"
                ));
                return Err(Error::BranchFiltered {
                    branch,
                    pattern: rules.only.0.join(", "),
                });
            }
        }

        if let Some(pattern) = first_match(&rules.ignore, &branch) {
            ctx.logger.log(format!(
                "branch {branch:?} matches branches.ignore pattern {pattern:?}, skipping deploy"
            ));
            return Err(Error::BranchFiltered {
                branch,
                pattern: pattern.to_string(),
            });
        }

        Ok(())
    }
}

fn first_match<'a>(patterns: &'a Patterns, branch: &str) -> Option<&'a str> {
    patterns
        .iter()
        .find(|pattern| branch_matches(pattern, branch))
        .map(String::as_str)
}

/// Glob-style branch matching: `*` spans any characters, `?` one character,
/// everything else is literal.
pub fn branch_matches(pattern: &str, branch: &str) -> bool {
    let regex = format!("^{}$", glob_to_regex(pattern));
    Regex::new(&regex)
        .map(|re| re.is_match(branch))
        .unwrap_or(false)
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    for c in glob.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '.' | '(' | ')' | '+' | '|' | '^' | '$' | '[' | ']' | '{' | '}' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Installs apt packages the manifest asks for, after validating names
/// against an injection-proof charset. Skipped in dev mode.
pub struct SystemPackagesStep;

#[async_trait]
impl Step for SystemPackagesStep {
    fn name(&self) -> &'static str {
        "system-packages"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let packages = match ctx.manifest {
            Some(ref manifest) if !manifest.system_packages.is_empty() => {
                manifest.system_packages.clone()
            }
            _ => return Ok(()),
        };

        for package in &packages {
            if !valid_package_name(package) {
                return Err(Error::InvalidPackageName(package.clone()));
            }
        }

        if ctx.config.dev {
            ctx.logger.log(format!(
                "system_packages: skipping in dev mode (ensure these are installed: {})",
                packages.join(", ")
            ));
            return Ok(());
        }

        ctx.logger
            .log(format!("installing system packages: {}", packages.join(", ")));

        let mut cmd = tokio::process::Command::new("sudo");
        cmd.args(["apt-get", "install", "-y"]).args(&packages);
        let output = cmd.output().await?;
        if !output.status.success() {
            ctx.logger.log(format!(
                "apt-get output: {}",
                String::from_utf8_lossy(&output.stderr)
            ));
            return Err(Error::tool("apt-get install", &output));
        }

        ctx.logger.log("system packages installed successfully");
        Ok(())
    }
}

pub fn valid_package_name(name: &str) -> bool {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.+\-:]+$").expect("static pattern"))
        .is_match(name)
}

/// Drops a fixed preamble into `config/initializers` so Rails apps accept
/// the review-app hostname. Skipped when the directory doesn't exist.
pub struct WriteInitializerStep;

const RAILS_INITIALIZER: &str = r#"# Injected by the review-app agent. Regenerated on every deploy; do not edit.
if ENV["REVIEWAPPS"] == "true"
  Rails.application.configure do
    config.hosts << ENV["REVIEWAPPS_HOST"] if ENV["REVIEWAPPS_HOST"]
    config.force_ssl = false
    config.action_mailer.default_url_options = {
      host: ENV.fetch("REVIEWAPPS_HOST", "localhost"),
      protocol: ENV["REVIEWAPPS_SSL"] == "true" ? "https" : "http",
    }
  end
end
"#;

#[async_trait]
impl Step for WriteInitializerStep {
    fn name(&self) -> &'static str {
        "write-initializer"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let init_dir = ctx.repo_dir.join("config").join("initializers");
        if !init_dir.exists() {
            ctx.logger
                .log("no config/initializers directory, skipping initializer injection");
            return Ok(());
        }

        let dest = init_dir.join("_reviewapps.rb");
        ctx.logger.log(format!("writing initializer: {}", dest.display()));
        std::fs::write(&dest, RAILS_INITIALIZER)?;
        Ok(())
    }
}
