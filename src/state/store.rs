// ABOUTME: Authoritative in-memory map of app_id → AppState with JSON snapshots.
// ABOUTME: Every mutation except AppendLog atomically rewrites state.json.

use super::{AppState, ProcessInfo, Status};
use crate::error::{Error, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::RwLock;
use tempfile::NamedTempFile;

pub struct Store {
    apps: RwLock<HashMap<String, AppState>>,
    state_path: Option<PathBuf>,
}

impl Store {
    /// Create a store backed by the given state file. A missing file is an
    /// empty store; a malformed file is logged and treated as empty.
    pub fn new(state_path: Option<PathBuf>) -> Store {
        let mut apps = HashMap::new();
        if let Some(ref path) = state_path {
            match std::fs::read(path) {
                Ok(data) => match serde_json::from_slice::<HashMap<String, AppState>>(&data) {
                    Ok(loaded) => {
                        tracing::info!(count = loaded.len(), path = %path.display(), "store: loaded state");
                        apps = loaded;
                    }
                    Err(err) => {
                        tracing::error!(path = %path.display(), %err, "store: state file malformed, starting empty");
                    }
                },
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::error!(path = %path.display(), %err, "store: read state file");
                }
            }
        }
        Store {
            apps: RwLock::new(apps),
            state_path,
        }
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Store {
        Store::new(None)
    }

    pub fn get(&self, app_id: &str) -> Result<AppState> {
        let apps = self.apps.read().unwrap();
        apps.get(app_id)
            .cloned()
            .ok_or_else(|| Error::AppNotFound(app_id.to_string()))
    }

    pub fn list(&self) -> Vec<AppState> {
        self.apps.read().unwrap().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.apps.read().unwrap().len()
    }

    pub fn put(&self, mut state: AppState) {
        let mut apps = self.apps.write().unwrap();
        state.updated_at = Utc::now();
        apps.insert(state.app_id.clone(), state);
        self.persist_locked(&apps);
    }

    pub fn delete(&self, app_id: &str) -> Result<()> {
        let mut apps = self.apps.write().unwrap();
        if apps.remove(app_id).is_none() {
            return Err(Error::AppNotFound(app_id.to_string()));
        }
        self.persist_locked(&apps);
        Ok(())
    }

    pub fn update_status(&self, app_id: &str, status: Status, error: &str) -> Result<()> {
        self.mutate(app_id, |state| {
            state.status = status;
            state.error = error.to_string();
        })
    }

    pub fn set_port(&self, app_id: &str, port: u16) -> Result<()> {
        self.mutate(app_id, |state| state.port = port)
    }

    pub fn set_process(&self, app_id: &str, proc: ProcessInfo) -> Result<()> {
        self.mutate(app_id, |state| {
            state.processes.insert(proc.name.clone(), proc);
        })
    }

    pub fn set_process_commands(&self, app_id: &str, commands: HashMap<String, String>) -> Result<()> {
        self.mutate(app_id, |state| state.process_commands = commands)
    }

    pub fn clear_processes(&self, app_id: &str) -> Result<()> {
        self.mutate(app_id, |state| state.processes.clear())
    }

    pub fn set_commit_sha(&self, app_id: &str, sha: &str) -> Result<()> {
        self.mutate(app_id, |state| state.commit_sha = sha.to_string())
    }

    pub fn set_app_dir(&self, app_id: &str, dir: &str) -> Result<()> {
        self.mutate(app_id, |state| state.app_dir = dir.to_string())
    }

    /// Copy the declared-input fields from a pipeline's working state, after
    /// manifest and version-file detection filled the gaps a deploy request
    /// left open. Observed state (status, port, processes, build log) is
    /// untouched.
    pub fn update_inputs(&self, app_id: &str, from: &AppState) -> Result<()> {
        self.mutate(app_id, |state| {
            state.ruby_version = from.ruby_version.clone();
            state.node_version = from.node_version.clone();
            state.database_adapter = from.database_adapter.clone();
            state.databases = from.databases.clone();
            state.env_vars = from.env_vars.clone();
            state.build_command = from.build_command.clone();
            state.seed_command = from.seed_command.clone();
        })
    }

    /// Append a build-log line. Memory only: build logs are high-frequency
    /// and ephemeral across agent restarts, so no snapshot is taken.
    pub fn append_log(&self, app_id: &str, line: &str) {
        let mut apps = self.apps.write().unwrap();
        if let Some(state) = apps.get_mut(app_id) {
            state.build_log.push(line.to_string());
        }
    }

    fn mutate(&self, app_id: &str, f: impl FnOnce(&mut AppState)) -> Result<()> {
        let mut apps = self.apps.write().unwrap();
        let state = apps
            .get_mut(app_id)
            .ok_or_else(|| Error::AppNotFound(app_id.to_string()))?;
        f(state);
        state.updated_at = Utc::now();
        self.persist_locked(&apps);
        Ok(())
    }

    /// Snapshot to disk while holding the write lock, so readers never see
    /// a state that is newer than the file. Failures are logged, not raised.
    fn persist_locked(&self, apps: &HashMap<String, AppState>) {
        let Some(ref path) = self.state_path else {
            return;
        };
        if let Err(err) = write_snapshot(path, apps) {
            tracing::error!(path = %path.display(), %err, "store: persist failed");
        }
    }
}

fn write_snapshot(path: &PathBuf, apps: &HashMap<String, AppState>) -> Result<()> {
    let data = serde_json::to_vec_pretty(apps)?;
    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}
