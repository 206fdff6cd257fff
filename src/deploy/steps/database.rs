// ABOUTME: Database steps: create per-app databases, run migrations, seed.

use crate::deploy::{Step, StepContext};
use crate::drivers::postgres::{self, DbConfig};
use crate::drivers::ruby;
use crate::error::{Error, Result};
use async_trait::async_trait;

/// Creates each declared database (Postgres only needs real work) and
/// injects its connection URL into the env map.
pub struct SetupDatabaseStep;

#[async_trait]
impl Step for SetupDatabaseStep {
    fn name(&self) -> &'static str {
        "setup-database"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let databases = ctx.state.effective_databases();

        for (name, adapter) in databases {
            let db = DbConfig::new(&ctx.state.app_id, &name, &adapter);

            if ctx.redeploy {
                ctx.logger.log(format!(
                    "redeploy: reusing {name} database ({adapter}): {}",
                    db.db_name()
                ));
            } else {
                ctx.logger.log(format!(
                    "setting up {name} database ({adapter}): {}",
                    db.db_name()
                ));
                if db.is_postgres() {
                    postgres::create_db(&db.db_name()).await?;
                }
            }

            let url = db.url(&ctx.config.paths.apps_dir);
            ctx.logger.log(format!("  {}={url}", db.env_key()));
            ctx.env_map.insert(db.env_key(), url);
        }

        Ok(())
    }
}

/// Prepares the schema: a manifest `setup.command` on fresh deploys, else
/// the framework task (`db:prepare` fresh, `db:migrate` on redeploy).
pub struct DbPrepareStep;

#[async_trait]
impl Step for DbPrepareStep {
    fn name(&self) -> &'static str {
        "db-prepare"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let setup_command = ctx
            .manifest
            .as_ref()
            .and_then(|m| m.setup.command.clone())
            .filter(|_| !ctx.redeploy);

        if let Some(setup_command) = setup_command {
            ctx.logger.log(format!("running setup command: {setup_command}"));
            let mut cmd = ruby::exec_in_dir(
                &ctx.repo_dir,
                &ctx.state.ruby_version,
                &ctx.env_slice(),
                &setup_command,
            );
            let output = cmd.output().await?;
            if !output.status.success() {
                return Err(Error::tool("setup command", &output));
            }
            ctx.logger.log("setup command complete");
            return Ok(());
        }

        let task = if ctx.redeploy { "db:migrate" } else { "db:prepare" };
        ctx.logger.log(format!("running {task}"));

        let mut cmd = ruby::run_in_dir(
            &ctx.repo_dir,
            &ctx.state.ruby_version,
            &ctx.env_slice(),
            &["bin/rails", task],
        );
        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(Error::tool("bin/rails db task", &output));
        }

        ctx.logger.log(format!("{task} complete"));
        Ok(())
    }
}

/// Seeds a fresh deploy when a seed command is configured. Redeploys keep
/// their data.
pub struct SeedStep;

#[async_trait]
impl Step for SeedStep {
    fn name(&self) -> &'static str {
        "seed"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        if ctx.redeploy {
            ctx.logger.log("redeploy: skipping seed");
            return Ok(());
        }

        let seed_command = ctx.state.seed_command.clone();
        if seed_command.is_empty() {
            ctx.logger.log("no seed command specified, skipping");
            return Ok(());
        }

        ctx.logger.log(format!("running seed: {seed_command}"));
        let mut cmd = ruby::exec_in_dir(
            &ctx.repo_dir,
            &ctx.state.ruby_version,
            &ctx.env_slice(),
            &seed_command,
        );
        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(Error::tool("seed", &output));
        }

        ctx.logger.log("seed complete");
        Ok(())
    }
}
