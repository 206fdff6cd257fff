// ABOUTME: Crash monitor: periodic liveness sweep over running apps' processes.
// ABOUTME: Dead children are restarted from their saved command lines.

use crate::appenv;
use crate::config::Config;
use crate::process;
use crate::state::{AppState, ProcessInfo, Status, Store};
use crate::drivers::ruby;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct Monitor {
    config: Arc<Config>,
    store: Arc<Store>,
    interval: Duration,
    cancel: CancellationToken,
}

impl Monitor {
    pub fn new(config: Arc<Config>, store: Arc<Store>, interval: Duration) -> Monitor {
        Monitor {
            config,
            store,
            interval,
            cancel: CancellationToken::new(),
        }
    }

    pub fn start(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so a restart storm
            // right at agent boot doesn't race startup reservations.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = monitor.cancel.cancelled() => return,
                    _ = ticker.tick() => monitor.sweep().await,
                }
            }
        });
        tracing::info!(interval = ?self.interval, "monitor: started");
    }

    pub fn stop(&self) {
        self.cancel.cancel();
        tracing::info!("monitor: stopped");
    }

    /// One pass over every running app: restart any process whose pid is gone.
    async fn sweep(&self) {
        for state in self.store.list() {
            if state.status != Status::Running || state.processes.is_empty() {
                continue;
            }

            for (name, proc) in &state.processes {
                if proc.pid == 0 || process::is_alive(proc.pid) {
                    continue;
                }

                tracing::warn!(
                    app_id = %state.app_id,
                    process = %name,
                    pid = proc.pid,
                    "monitor: process is dead, restarting"
                );
                self.restart_process(&state, name).await;
            }
        }
    }

    async fn restart_process(&self, state: &AppState, name: &str) {
        let Some(command_line) = state.process_commands.get(name) else {
            tracing::warn!(
                app_id = %state.app_id,
                process = %name,
                "monitor: no saved command, cannot restart"
            );
            return;
        };

        let mut command_line = command_line.clone();
        if name == "web" && state.port > 0 {
            command_line = command_line.replace("$PORT", &state.port.to_string());
        }

        let app_dir = Path::new(&state.app_dir);
        let repo_dir = app_dir.join("repo");
        let env = appenv::read_file(&app_dir.join(".env"));

        let log_path = self.config.process_log_path(&state.app_id, name);
        let log_file = match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
        {
            Ok(file) => file,
            Err(err) => {
                tracing::error!(app_id = %state.app_id, process = %name, %err, "monitor: open log file");
                return;
            }
        };

        let mut cmd = ruby::exec_in_dir(&repo_dir, &state.ruby_version, &env, &command_line);
        let stderr = match log_file.try_clone() {
            Ok(file) => file,
            Err(err) => {
                tracing::error!(app_id = %state.app_id, process = %name, %err, "monitor: clone log handle");
                return;
            }
        };
        cmd.stdout(log_file);
        cmd.stderr(stderr);

        let pid = match process::start(cmd) {
            Ok(pid) => pid,
            Err(err) => {
                tracing::error!(app_id = %state.app_id, process = %name, %err, "monitor: restart failed");
                return;
            }
        };

        let info = ProcessInfo {
            name: name.to_string(),
            pid,
            port: if name == "web" { state.port } else { 0 },
        };
        let _ = self.store.set_process(&state.app_id, info);

        tracing::info!(
            app_id = %state.app_id,
            process = %name,
            new_pid = pid,
            "monitor: restarted process"
        );
    }
}
