// ABOUTME: User hook execution at named lifecycle phases.
// ABOUTME: Hooks are shell strings run in the repo dir under the app's Ruby env.

use crate::deploy::{Step, StepContext};
use crate::drivers::ruby;
use crate::error::{Error, Result};
use crate::manifest::{HookPhase, Manifest};
use async_trait::async_trait;
use std::path::Path;

/// Runs the hook list for one phase. Hook failures abort the deploy except
/// where the caller (teardown, failure path) opts into best-effort.
pub struct RunHooksStep {
    phase: HookPhase,
}

impl RunHooksStep {
    pub fn new(phase: HookPhase) -> RunHooksStep {
        RunHooksStep { phase }
    }
}

#[async_trait]
impl Step for RunHooksStep {
    fn name(&self) -> &'static str {
        match self.phase {
            HookPhase::AfterClone => "hooks-after_clone",
            HookPhase::BeforeBuild => "hooks-before_build",
            HookPhase::AfterBuild => "hooks-after_build",
            HookPhase::BeforeMigrate => "hooks-before_migrate",
            HookPhase::AfterDeploy => "hooks-after_deploy",
            HookPhase::BeforeTeardown => "hooks-before_teardown",
            HookPhase::OnFailure => "hooks-on_failure",
        }
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let hooks: Vec<String> = match ctx.manifest {
            Some(ref manifest) => manifest.hooks_for(self.phase).to_vec(),
            None => return Ok(()),
        };
        if hooks.is_empty() {
            return Ok(());
        }

        ctx.logger
            .log(format!("running {} {} hook(s)", hooks.len(), self.phase));

        let env = ctx.env_slice();
        for (i, hook) in hooks.iter().enumerate() {
            ctx.logger
                .log(format!("  [{}/{}] {hook}", i + 1, hooks.len()));
            run_hook(hook, &ctx.repo_dir, &ctx.state.ruby_version, &env).await?;
        }

        ctx.logger.log(format!("{} hooks complete", self.phase));
        Ok(())
    }
}

/// Run one phase's hooks outside a pipeline (teardown, failure path).
pub async fn run_hooks(
    hooks: &[String],
    repo_dir: &Path,
    ruby_version: &str,
    env: &[(String, String)],
) -> Result<()> {
    for hook in hooks {
        run_hook(hook, repo_dir, ruby_version, env).await?;
    }
    Ok(())
}

/// Convenience for the teardown path: parse the checked-out manifest and run
/// one phase best-effort. Missing manifest means nothing to run.
pub async fn run_hooks_from_repo(
    repo_dir: &Path,
    phase: HookPhase,
    ruby_version: &str,
    env: &[(String, String)],
) -> Result<()> {
    let yml_path = repo_dir.join(crate::manifest::MANIFEST_FILENAME);
    if !yml_path.exists() {
        return Ok(());
    }
    let manifest = Manifest::parse(&yml_path)?;
    run_hooks(manifest.hooks_for(phase), repo_dir, ruby_version, env).await
}

async fn run_hook(
    hook: &str,
    repo_dir: &Path,
    ruby_version: &str,
    env: &[(String, String)],
) -> Result<()> {
    let mut cmd = ruby::exec_in_dir(repo_dir, ruby_version, env, hook);
    let output = cmd.output().await?;
    if !output.status.success() {
        tracing::warn!(
            hook,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "hook failed"
        );
        return Err(Error::HookFailed(hook.to_string(), output.status.code()));
    }
    Ok(())
}
