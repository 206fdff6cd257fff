// ABOUTME: REST handlers: deploy intake, status, teardown, restart, exec, logs, update.

use super::request::{DeployRequest, ExecRequest, LogsQuery, UpdateRequest};
use super::{ApiError, AppContext};
use crate::appenv;
use crate::callback::{Client, StatusPayload};
use crate::deploy::steps::hooks;
use crate::drivers::postgres::{self, DbConfig};
use crate::drivers::proxy::ProxyManager;
use crate::drivers::{node, ruby};
use crate::manifest::HookPhase;
use crate::process;
use crate::queue::Job;
use crate::state::{AppState, ProcessInfo, Status};
use crate::updater::{self, ReleaseInfo};
use crate::version;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::path::Path as FsPath;
use std::sync::Arc;
use std::time::Duration;

type Result<T> = std::result::Result<T, ApiError>;

/// Agent liveness plus the toolchain inventory the control plane cares about.
pub async fn health(State(ctx): State<Arc<AppContext>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": version::VERSION,
        "commit": version::commit(),
        "uptime": ctx.started_at.elapsed().as_secs_f64(),
        "app_count": ctx.store.count(),
        "rv_version": ruby::version().await,
        "fnm_version": node::version().await,
        "caddy_version": ProxyManager::version().await,
        "ruby_versions": ruby::list_installed().await,
        "node_versions": node::list_installed().await,
    }))
}

pub async fn list_apps(State(ctx): State<Arc<AppContext>>) -> Json<serde_json::Value> {
    Json(json!({ "apps": ctx.store.list() }))
}

pub async fn app_status(
    State(ctx): State<Arc<AppContext>>,
    Path(app_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let state = ctx.store.get(&app_id)?;

    let url = if state.port > 0 {
        if state.subdomain.is_empty() || ctx.config.dev {
            format!("http://localhost:{}", state.port)
        } else {
            format!("https://{}", ctx.proxy.hostname(&state.subdomain))
        }
    } else {
        String::new()
    };

    let uptime = if state.status == Status::Running {
        (chrono::Utc::now() - state.updated_at).num_milliseconds() as f64 / 1000.0
    } else {
        0.0
    };

    let web_pid = state.processes.get("web").map(|p| p.pid).unwrap_or(0);
    let memory_mb = if web_pid > 0 {
        process_memory_mb(web_pid).await
    } else {
        0
    };

    Ok(Json(json!({
        "app_id": state.app_id,
        "repo_url": state.repo_url,
        "branch": state.branch,
        "commit_sha": state.commit_sha,
        "ruby_version": state.ruby_version,
        "node_version": state.node_version,
        "database_adapter": state.database_adapter,
        "subdomain": state.subdomain,
        "status": state.status,
        "port": state.port,
        "url": url,
        "memory_mb": memory_mb,
        "uptime": uptime,
        "processes": state.processes,
        "error": state.error,
        "created_at": state.created_at,
        "updated_at": state.updated_at,
        "build_log": state.build_log,
    })))
}

/// RSS of a pid in MB, best-effort via ps.
async fn process_memory_mb(pid: u32) -> u64 {
    let output = tokio::process::Command::new("ps")
        .args(["-o", "rss=", "-p", &pid.to_string()])
        .output()
        .await;
    match output {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<u64>()
            .map(|kb| kb / 1024)
            .unwrap_or(0),
        _ => 0,
    }
}

/// Create-or-replace the app state and enqueue a pipeline run. An existing
/// app_id makes this a redeploy: same port and directory where possible.
pub async fn deploy(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<DeployRequest>,
) -> Result<Response> {
    if req.app_id.is_empty() {
        return Err(ApiError::bad_request("app_id is required"));
    }
    if req.repo_url.is_empty() {
        return Err(ApiError::bad_request("repo_url is required"));
    }

    let existing = ctx.store.get(&req.app_id).ok();
    let redeploy = existing.is_some();
    if let Some(ref prev) = existing {
        tracing::info!(app_id = %req.app_id, status = %prev.status, "deploy: redeploy of existing app");
    }

    let branch = if req.branch.is_empty() {
        "main".to_string()
    } else {
        req.branch.clone()
    };
    let mut state = AppState::new(&req.app_id, &req.repo_url, branch);
    state.commit_sha = req.commit_sha;
    state.ruby_version = if req.ruby_version.is_empty() {
        ctx.config.defaults.ruby_version.clone()
    } else {
        req.ruby_version
    };
    state.node_version = req.node_version;
    state.database_adapter = if req.database_adapter.is_empty() {
        ctx.config.defaults.database_adapter.clone()
    } else {
        req.database_adapter
    };
    state.databases = req.databases;
    state.env_vars = req.env_vars;
    state.build_command = req.build_command;
    state.seed_command = req.seed_command;
    state.subdomain = req.subdomain;
    state.callback_url = req.callback_url;
    state.hooks = req.hooks;

    // A redeploy keeps the observed state of the previous generation, so
    // the pipeline can stop the old processes and reuse port and directory.
    if let Some(prev) = existing {
        state.port = prev.port;
        state.app_dir = prev.app_dir;
        state.processes = prev.processes;
        state.process_commands = prev.process_commands;
        state.created_at = prev.created_at;
    }

    ctx.store.put(state.clone());

    let pipeline = Arc::clone(&ctx.pipeline);
    let app_id = req.app_id.clone();
    ctx.queue.enqueue(Job {
        app_id: app_id.clone(),
        run: Box::new(move |cancel| {
            Box::pin(async move { pipeline.run(cancel, state, redeploy).await })
        }),
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "queued",
            "app_id": app_id,
            "message": "deploy queued",
        })),
    )
        .into_response())
}

/// Take the app offline and erase every trace of it: processes, port,
/// databases, proxy site, log files, app dir, store row.
pub async fn teardown(
    State(ctx): State<Arc<AppContext>>,
    Path(app_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let state = ctx.store.get(&app_id)?;

    // A deploy for this app is queued or actively mutating the app dir;
    // tearing down underneath it would race the filesystem.
    if state.status.deploy_in_flight() {
        return Err(ApiError::conflict(format!(
            "deploy in progress (status: {})",
            state.status
        )));
    }

    let _ = ctx.store.update_status(&app_id, Status::Teardown, "");

    // before_teardown hooks from the checked-out manifest, best-effort.
    if !state.app_dir.is_empty() {
        let app_dir = FsPath::new(&state.app_dir);
        let repo_dir = app_dir.join("repo");
        let env = appenv::read_file(&app_dir.join(".env"));
        tracing::info!(%app_id, "teardown: running before_teardown hooks");
        if let Err(err) =
            hooks::run_hooks_from_repo(&repo_dir, HookPhase::BeforeTeardown, &state.ruby_version, &env)
                .await
        {
            tracing::warn!(%app_id, %err, "teardown: before_teardown hook error (non-fatal)");
        }
    }

    if !state.processes.is_empty() {
        tracing::info!(%app_id, count = state.processes.len(), "teardown: stopping processes");
        for proc in state.processes.values() {
            if proc.pid > 0 {
                process::stop(proc.pid).await;
            }
        }
    }

    ctx.ports.release(&app_id);

    for (name, adapter) in state.effective_databases() {
        let db = DbConfig::new(&app_id, &name, &adapter);
        if db.is_postgres() {
            tracing::info!(%app_id, db = %db.db_name(), "teardown: dropping database");
            if let Err(err) = postgres::drop_db(&db.db_name()).await {
                tracing::warn!(%app_id, %err, "teardown: dropdb failed");
            }
        }
    }

    if let Err(err) = ctx.proxy.remove_site_config(&app_id) {
        tracing::warn!(%app_id, %err, "teardown: proxy site removal failed");
    }
    if let Err(err) = ctx.proxy.reload().await {
        tracing::warn!(%app_id, %err, "teardown: proxy reload failed");
    }

    remove_log_files(&ctx.config.paths.log_dir, &app_id);

    if !state.app_dir.is_empty() {
        tracing::info!(%app_id, dir = %state.app_dir, "teardown: removing app directory");
        let _ = std::fs::remove_dir_all(&state.app_dir);
    }

    ctx.store.delete(&app_id)?;

    if !state.callback_url.is_empty() {
        let client = Client::new(&ctx.config.api.api_key);
        client
            .send_status(&state.callback_url, StatusPayload::new(&app_id, "removed"))
            .await;
    }

    Ok(Json(json!({ "status": "removed", "app_id": app_id })))
}

/// Remove `{app_id}*.log` from the log dir (web, named processes, access log).
fn remove_log_files(log_dir: &FsPath, app_id: &str) {
    let Ok(entries) = std::fs::read_dir(log_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(app_id) && name.ends_with(".log") {
            tracing::info!(file = %name, "teardown: removing log");
            let _ = std::fs::remove_file(entry.path());
        }
    }
}

/// Stop and restart every process from its saved command line. Only allowed
/// while the app is running.
pub async fn restart(
    State(ctx): State<Arc<AppContext>>,
    Path(app_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let state = ctx.store.get(&app_id)?;

    if state.status != Status::Running {
        return Err(ApiError::conflict(format!(
            "app is not running (status: {})",
            state.status
        )));
    }

    let _ = ctx.store.update_status(&app_id, Status::Starting, "");

    for proc in state.processes.values() {
        if proc.pid > 0 {
            tracing::info!(%app_id, process = %proc.name, pid = proc.pid, "restart: stopping");
            process::stop(proc.pid).await;
        }
    }
    let _ = ctx.store.clear_processes(&app_id);

    let app_dir = FsPath::new(&state.app_dir);
    let repo_dir = app_dir.join("repo");
    let env = appenv::read_file(&app_dir.join(".env"));

    let mut commands = state.process_commands.clone();
    if commands.is_empty() {
        commands.insert(
            "web".to_string(),
            format!("bin/rails server -p {} -e production", state.port),
        );
    }

    for (name, command_line) in &commands {
        let mut command_line = command_line.clone();
        if name == "web" {
            command_line = command_line.replace("$PORT", &state.port.to_string());
        }

        tracing::info!(%app_id, process = %name, command = %command_line, "restart: starting");

        let log_path = ctx.config.process_log_path(&app_id, name);
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|err| {
                let _ = ctx.store.update_status(&app_id, Status::Failed, &err.to_string());
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("failed to open log file: {err}"),
                )
            })?;

        let mut cmd = ruby::exec_in_dir(&repo_dir, &state.ruby_version, &env, &command_line);
        let stderr = log_file.try_clone().map_err(crate::error::Error::from)?;
        cmd.stdout(log_file);
        cmd.stderr(stderr);

        let pid = process::start(cmd).map_err(|err| {
            let _ = ctx.store.update_status(&app_id, Status::Failed, &err.to_string());
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to start process {name}: {err}"),
            )
        })?;

        let _ = ctx.store.set_process(
            &app_id,
            ProcessInfo {
                name: name.clone(),
                pid,
                port: if name == "web" { state.port } else { 0 },
            },
        );
    }

    let _ = ctx.store.update_status(&app_id, Status::Running, "");
    Ok(Json(json!({ "status": "restarted", "app_id": app_id })))
}

/// Run one shell command in the app's runtime environment, with a timeout.
pub async fn exec(
    State(ctx): State<Arc<AppContext>>,
    Path(app_id): Path<String>,
    Json(req): Json<ExecRequest>,
) -> Result<Response> {
    let state = ctx.store.get(&app_id)?;

    if req.command.is_empty() {
        return Err(ApiError::bad_request("command is required"));
    }

    let app_dir = FsPath::new(&state.app_dir);
    let repo_dir = app_dir.join("repo");
    let env = appenv::read_file(&app_dir.join(".env"));
    let timeout = Duration::from_secs(if req.timeout > 0 { req.timeout } else { 30 });

    tracing::info!(%app_id, command = %req.command, ?timeout, "exec: running");

    let mut cmd = ruby::exec_in_dir(&repo_dir, &state.ruby_version, &env, &req.command);
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    // Dropping the future on timeout takes the child down with it.
    cmd.kill_on_drop(true);

    let child = cmd.spawn().map_err(crate::error::Error::from)?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Err(_elapsed) => Ok((
            StatusCode::REQUEST_TIMEOUT,
            Json(json!({
                "status": "timeout",
                "app_id": app_id,
                "error": format!("command timed out after {}s", timeout.as_secs()),
            })),
        )
            .into_response()),
        Ok(Err(err)) => Err(crate::error::Error::from(err).into()),
        Ok(Ok(output)) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            let body = if output.status.success() {
                json!({ "status": "success", "app_id": app_id, "output": combined })
            } else {
                json!({
                    "status": "error",
                    "app_id": app_id,
                    "error": format!("exit code {:?}", output.status.code()),
                    "output": combined,
                })
            };
            Ok(Json(body).into_response())
        }
    }
}

/// Snapshot logs: the build log from the store, or a tail of a runtime file.
pub async fn logs(
    State(ctx): State<Arc<AppContext>>,
    Path(app_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<serde_json::Value>> {
    let state = ctx.store.get(&app_id)?;

    match query.r#type.as_deref().unwrap_or("build") {
        "build" => Ok(Json(json!({
            "app_id": app_id,
            "type": "build",
            "lines": state.build_log,
        }))),
        "runtime" => {
            let process = query.process.as_deref().unwrap_or("web");
            let log_path = ctx.config.process_log_path(&app_id, process);
            let content = std::fs::read_to_string(&log_path)
                .map_err(|err| ApiError::not_found(format!("log file not found: {err}")))?;

            let lines: Vec<&str> = content.lines().collect();
            let n = query.lines.unwrap_or(100).min(lines.len());
            let tail: Vec<&str> = lines[lines.len() - n..].to_vec();

            Ok(Json(json!({
                "app_id": app_id,
                "type": "runtime",
                "process": process,
                "lines": tail,
            })))
        }
        _ => Err(ApiError::bad_request("invalid type: use 'build' or 'runtime'")),
    }
}

/// Control-plane push update: install in the background, answer immediately.
pub async fn update(Json(req): Json<UpdateRequest>) -> Result<Json<serde_json::Value>> {
    if req.version.is_empty() || req.download_url.is_empty() {
        return Err(ApiError::bad_request("version and download_url are required"));
    }

    let info = ReleaseInfo {
        version: req.version.clone(),
        download_url: req.download_url,
        checksum: req.checksum,
        changelog: String::new(),
    };

    tokio::spawn(async move {
        tracing::info!(from = version::VERSION, to = %info.version, "update: starting");
        if let Err(err) = updater::apply(&info).await {
            tracing::error!(%err, "update: failed");
            return;
        }
        tracing::info!(version = %info.version, "update: installed, restarting via systemd");
        if updater::is_systemd() {
            let _ = tokio::process::Command::new("sudo")
                .args(["systemctl", "restart", "rad"])
                .status()
                .await;
        }
    });

    Ok(Json(json!({
        "status": "updating",
        "from": version::VERSION,
        "to": req.version,
    })))
}
