// ABOUTME: Release steps: env file, asset build, port allocation, process start,
// ABOUTME: health gate, proxy site config, and the terminal status callback.

use crate::appenv;
use crate::callback::{Client, StatusPayload};
use crate::deploy::{Step, StepContext};
use crate::drivers::proxy::SiteConfig;
use crate::drivers::ruby;
use crate::error::{Error, Result};
use crate::health;
use crate::process;
use crate::state::{ProcessInfo, Status};
use async_trait::async_trait;
use std::time::Duration;

/// Composes the full app environment and writes the `.env` file.
pub struct WriteEnvStep;

#[async_trait]
impl Step for WriteEnvStep {
    fn name(&self) -> &'static str {
        "write-env"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let full_env = appenv::compose(
            ctx.state.subdomain_or_id(),
            &ctx.config.proxy.zone,
            ctx.config.dev,
            &ctx.env_map,
            &ctx.state.env_vars,
        );
        // Merge back so downstream steps and processes see the full set.
        ctx.env_map.extend(full_env);

        let env_path = ctx.app_dir.join(".env");
        ctx.logger.log(format!(
            "writing .env to {} ({} vars)",
            env_path.display(),
            ctx.env_map.len()
        ));
        appenv::write_file(&env_path, &ctx.env_map)
    }
}

/// Runs the configured build command, or the framework asset build.
pub struct AssetPrecompileStep;

#[async_trait]
impl Step for AssetPrecompileStep {
    fn name(&self) -> &'static str {
        "asset-precompile"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let build_command = if ctx.state.build_command.is_empty() {
            "bin/rails assets:precompile".to_string()
        } else {
            ctx.state.build_command.clone()
        };

        ctx.logger.log(format!("running: {build_command}"));
        let mut cmd = ruby::exec_in_dir(
            &ctx.repo_dir,
            &ctx.state.ruby_version,
            &ctx.env_slice(),
            &build_command,
        );
        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(Error::tool("asset precompile", &output));
        }

        ctx.logger.log("assets precompiled");
        Ok(())
    }
}

/// Claims a port for the app and publishes it as `PORT`. Redeploys keep
/// their existing reservation.
pub struct AllocatePortStep;

#[async_trait]
impl Step for AllocatePortStep {
    fn name(&self) -> &'static str {
        "allocate-port"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        if ctx.redeploy {
            if let Some(port) = ctx.ports.get_port(&ctx.state.app_id) {
                ctx.port = port;
                ctx.state.port = port;
                ctx.env_map.insert("PORT".to_string(), port.to_string());
                ctx.logger.log(format!("redeploy: reusing port {port}"));
                return Ok(());
            }
        }

        let port = ctx.ports.allocate(&ctx.state.app_id)?;
        ctx.port = port;
        ctx.state.port = port;
        ctx.store.set_port(&ctx.state.app_id, port)?;
        ctx.env_map.insert("PORT".to_string(), port.to_string());

        ctx.logger.log(format!("allocated port {port}"));
        Ok(())
    }
}

/// Starts the app's processes: web first, the rest alphabetically, each in
/// its own process group with stdout+stderr appended to its log file.
pub struct StartProcessesStep;

#[async_trait]
impl Step for StartProcessesStep {
    fn name(&self) -> &'static str {
        "start-processes"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let _ = ctx
            .store
            .update_status(&ctx.state.app_id, Status::Starting, "");

        let mut procs = ctx.processes.clone();
        if procs.is_empty() {
            procs.insert(
                "web".to_string(),
                format!("bin/rails server -p {} -e production", ctx.port),
            );
        }

        // Redeploy: stop everything from the previous generation first.
        if ctx.redeploy && !ctx.state.processes.is_empty() {
            ctx.logger
                .log(format!("stopping {} old process(es)", ctx.state.processes.len()));
            stop_all(ctx).await;
        }
        ctx.store.clear_processes(&ctx.state.app_id)?;
        ctx.state.processes.clear();

        let env = ctx.env_slice();
        for name in ordered_names(&procs) {
            let mut command_line = procs[&name].clone();
            if name == "web" {
                command_line = command_line.replace("$PORT", &ctx.port.to_string());
            }

            ctx.logger
                .log(format!("starting process {name:?}: {command_line}"));

            let log_path = ctx.config.process_log_path(&ctx.state.app_id, &name);
            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)?;

            let mut cmd = ruby::exec_in_dir(
                &ctx.repo_dir,
                &ctx.state.ruby_version,
                &env,
                &command_line,
            );
            cmd.stdout(log_file.try_clone()?);
            cmd.stderr(log_file);

            let pid = match process::start(cmd) {
                Ok(pid) => pid,
                Err(err) => {
                    // Roll back whatever this deploy already started.
                    ctx.logger
                        .log(format!("process {name:?} failed to start: {err}"));
                    stop_all(ctx).await;
                    return Err(err);
                }
            };

            let info = ProcessInfo {
                name: name.clone(),
                pid,
                port: if name == "web" { ctx.port } else { 0 },
            };
            ctx.store.set_process(&ctx.state.app_id, info.clone())?;
            ctx.state.processes.insert(name.clone(), info);

            ctx.logger.log(format!(
                "process {name:?} started (pid={pid}, log={})",
                log_path.display()
            ));
        }

        // Saved so the crash monitor and restart handler can re-start them.
        ctx.state.process_commands = procs.clone();
        ctx.store.set_process_commands(&ctx.state.app_id, procs)?;

        ctx.logger.log(format!(
            "all {} process(es) started",
            ctx.state.process_commands.len()
        ));
        Ok(())
    }
}

/// Process start order: web first, then the rest alphabetically.
fn ordered_names(procs: &std::collections::HashMap<String, String>) -> Vec<String> {
    let mut names: Vec<String> = procs.keys().filter(|n| *n != "web").cloned().collect();
    names.sort();
    if procs.contains_key("web") {
        names.insert(0, "web".to_string());
    }
    names
}

async fn stop_all(ctx: &StepContext) {
    for (name, proc) in &ctx.state.processes {
        if proc.pid > 0 {
            ctx.logger
                .log(format!("stopping process {name:?} (pid={})", proc.pid));
            process::stop(proc.pid).await;
        }
    }
}

/// Blocks the pipeline until the app answers HTTP; flips it to `running`.
pub struct HealthCheckStep;

#[async_trait]
impl Step for HealthCheckStep {
    fn name(&self) -> &'static str {
        "health-check"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        let section = ctx
            .manifest
            .as_ref()
            .map(|m| m.health_check.clone())
            .unwrap_or_default();
        let timeout = Duration::from_secs(section.timeout);
        let interval = Duration::from_secs(section.interval);

        // Dev mode talks straight to localhost, no vhost routing involved.
        let host = if ctx.config.dev {
            String::new()
        } else {
            ctx.state.subdomain_or_id().to_string()
        };

        ctx.logger.log(format!(
            "waiting for health check (timeout={timeout:?}, interval={interval:?})"
        ));

        health::check(ctx.port, &host, timeout, interval, section.path.as_deref()).await?;

        ctx.store
            .update_status(&ctx.state.app_id, Status::Running, "")?;
        ctx.state.status = Status::Running;
        ctx.logger
            .log(format!("app is healthy and running on port {}", ctx.port));
        Ok(())
    }
}

/// Writes the reverse-proxy site file and reloads the proxy. A reload
/// failure is non-fatal: the app still answers on localhost:{port}.
pub struct CaddyConfigStep;

#[async_trait]
impl Step for CaddyConfigStep {
    fn name(&self) -> &'static str {
        "caddy-config"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        if !ctx.proxy.enabled {
            ctx.logger.log("proxy not enabled, skipping site config");
            return Ok(());
        }

        let subdomain = ctx.state.subdomain_or_id().to_string();
        ctx.proxy.write_site_config(&SiteConfig {
            app_id: &ctx.state.app_id,
            subdomain: &subdomain,
            port: ctx.port,
        })?;

        ctx.logger.log(format!(
            "wrote proxy config for {} → localhost:{}",
            ctx.proxy.hostname(&subdomain),
            ctx.port
        ));

        match ctx.proxy.reload().await {
            Ok(()) => ctx.logger.log("proxy reloaded"),
            Err(err) => ctx.logger.log(format!("proxy reload failed (non-fatal): {err}")),
        }

        Ok(())
    }
}

/// POSTs the terminal status to the configured callback URL.
pub struct CallbackStep;

#[async_trait]
impl Step for CallbackStep {
    fn name(&self) -> &'static str {
        "callback"
    }

    async fn run(&self, ctx: &mut StepContext) -> Result<()> {
        if ctx.state.callback_url.is_empty() {
            ctx.logger.log("no callback URL, skipping");
            return Ok(());
        }

        let url = if ctx.state.subdomain.is_empty() || ctx.config.dev {
            format!("http://localhost:{}", ctx.port)
        } else {
            format!("https://{}", ctx.proxy.hostname(&ctx.state.subdomain))
        };

        let mut payload = StatusPayload::new(&ctx.state.app_id, ctx.state.status);
        payload.port = Some(ctx.port);
        payload.url = Some(url);
        payload.commit_sha = Some(ctx.state.commit_sha.clone());

        ctx.logger
            .log(format!("sending callback to {}", ctx.state.callback_url));
        let client = Client::new(&ctx.config.api.api_key);
        client.send_status(&ctx.state.callback_url, payload).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn web_starts_first_then_alphabetical() {
        let procs: HashMap<String, String> = [
            ("worker", "run worker"),
            ("web", "run web"),
            ("cron", "run cron"),
            ("assets", "run assets"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        assert_eq!(ordered_names(&procs), vec!["web", "assets", "cron", "worker"]);
    }

    #[test]
    fn ordering_without_web() {
        let procs: HashMap<String, String> =
            [("b", "x"), ("a", "y")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
        assert_eq!(ordered_names(&procs), vec!["a", "b"]);
    }
}
