// ABOUTME: Workspace steps: app directory layout and the git checkout.

use crate::deploy::{Step, StepContext};
use crate::drivers::git;
use crate::error::Result;
use crate::state::Status;
use async_trait::async_trait;

/// Builds `{apps_dir}/{app_id}` and its `repo/` subdirectory. A fresh deploy
/// clears any leftover directory first; a redeploy reuses it.
pub struct CreateDirStep;

#[async_trait]
impl Step for CreateDirStep {
    fn name(&self) -> &'static str {
        "create-dir"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let app_dir = ctx.config.paths.apps_dir.join(&ctx.state.app_id);
        ctx.app_dir = app_dir.clone();
        ctx.repo_dir = app_dir.join("repo");
        ctx.state.app_dir = app_dir.to_string_lossy().to_string();
        ctx.store.set_app_dir(&ctx.state.app_id, &ctx.state.app_dir)?;

        if ctx.redeploy {
            ctx.logger
                .log(format!("redeploy: reusing app directory {}", app_dir.display()));
            return Ok(());
        }

        ctx.logger
            .log(format!("creating app directory: {}", app_dir.display()));

        if app_dir.exists() {
            ctx.logger.log("removing existing directory");
            std::fs::remove_dir_all(&app_dir)?;
        }

        std::fs::create_dir_all(&ctx.repo_dir)?;
        Ok(())
    }
}

/// Fresh deploy: shallow clone of the branch. Redeploy: fetch and hard
/// reset. Either way the actual commit SHA is recorded afterwards.
pub struct GitCloneStep;

#[async_trait]
impl Step for GitCloneStep {
    fn name(&self) -> &'static str {
        "git-clone"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let _ = ctx
            .store
            .update_status(&ctx.state.app_id, Status::Cloning, "");

        if ctx.redeploy {
            ctx.logger.log(format!(
                "fetching updates for {} (branch: {})",
                ctx.state.repo_url, ctx.state.branch
            ));
            git::fetch_and_reset(&ctx.repo_dir, &ctx.state.branch).await?;
        } else {
            ctx.logger.log(format!(
                "cloning {} (branch: {}) into {}",
                ctx.state.repo_url,
                ctx.state.branch,
                ctx.repo_dir.display()
            ));
            git::clone(&ctx.state.repo_url, &ctx.state.branch, &ctx.repo_dir).await?;
        }

        if let Ok(sha) = git::commit_sha(&ctx.repo_dir).await {
            ctx.logger.log(format!("commit: {sha}"));
            ctx.state.commit_sha = sha.clone();
            let _ = ctx.store.set_commit_sha(&ctx.state.app_id, &sha);
        }

        // Submodules are best-effort; most apps have none.
        if let Err(err) = git::init_submodules(&ctx.repo_dir).await {
            ctx.logger.log(format!("submodule init: {err} (continuing)"));
        }

        Ok(())
    }
}
