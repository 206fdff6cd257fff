// ABOUTME: App state model: status machine, process records, and lifecycle hooks.
// ABOUTME: The persistent store lives in the store submodule.

mod store;

pub use store::Store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Queued,
    Cloning,
    Building,
    Starting,
    Running,
    Failed,
    Stopped,
    Teardown,
}

impl Status {
    /// True while a deploy pipeline may be actively working on the app.
    pub fn deploy_in_flight(self) -> bool {
        matches!(
            self,
            Status::Queued | Status::Cloning | Status::Building | Status::Starting
        )
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Queued => "queued",
            Status::Cloning => "cloning",
            Status::Building => "building",
            Status::Starting => "starting",
            Status::Running => "running",
            Status::Failed => "failed",
            Status::Stopped => "stopped",
            Status::Teardown => "teardown",
        };
        f.write_str(s)
    }
}

/// Shell commands to run at named points of the deploy lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hooks {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after_clone: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before_build: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after_build: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before_migrate: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after_deploy: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before_teardown: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_failure: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub name: String,
    pub pid: u32,
    /// Only the web process gets a port.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub port: u16,
}

fn is_zero(port: &u16) -> bool {
    *port == 0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppState {
    pub app_id: String,
    pub repo_url: String,
    pub branch: String,
    #[serde(default)]
    pub commit_sha: String,
    #[serde(default)]
    pub ruby_version: String,
    #[serde(default)]
    pub node_version: String,
    #[serde(default)]
    pub database_adapter: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub databases: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env_vars: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub build_command: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub seed_command: String,
    #[serde(default)]
    pub subdomain: String,
    #[serde(default)]
    pub callback_url: String,
    /// Hooks supplied with the deploy request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Hooks>,

    // Observed state
    pub status: Status,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub processes: HashMap<String, ProcessInfo>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub process_commands: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_dir: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_log: Vec<String>,
}

impl AppState {
    pub fn new(app_id: impl Into<String>, repo_url: impl Into<String>, branch: impl Into<String>) -> Self {
        let now = Utc::now();
        AppState {
            app_id: app_id.into(),
            repo_url: repo_url.into(),
            branch: branch.into(),
            commit_sha: String::new(),
            ruby_version: String::new(),
            node_version: String::new(),
            database_adapter: String::new(),
            databases: HashMap::new(),
            env_vars: HashMap::new(),
            build_command: String::new(),
            seed_command: String::new(),
            subdomain: String::new(),
            callback_url: String::new(),
            hooks: None,
            status: Status::Queued,
            port: 0,
            processes: HashMap::new(),
            process_commands: HashMap::new(),
            app_dir: String::new(),
            error: String::new(),
            created_at: now,
            updated_at: now,
            build_log: Vec::new(),
        }
    }

    /// Subdomain to serve the app under, falling back to the app id.
    pub fn subdomain_or_id(&self) -> &str {
        if self.subdomain.is_empty() {
            &self.app_id
        } else {
            &self.subdomain
        }
    }

    /// Databases to manage: the declared map, or an implicit `primary`
    /// on the configured adapter.
    pub fn effective_databases(&self) -> HashMap<String, String> {
        if self.databases.is_empty() {
            let mut map = HashMap::new();
            map.insert("primary".to_string(), self.database_adapter.clone());
            map
        } else {
            self.databases.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Status::Queued).unwrap(), "\"queued\"");
        assert_eq!(serde_json::to_string(&Status::Teardown).unwrap(), "\"teardown\"");
    }

    #[test]
    fn deploy_in_flight_statuses() {
        assert!(Status::Queued.deploy_in_flight());
        assert!(Status::Cloning.deploy_in_flight());
        assert!(Status::Building.deploy_in_flight());
        assert!(Status::Starting.deploy_in_flight());
        assert!(!Status::Running.deploy_in_flight());
        assert!(!Status::Failed.deploy_in_flight());
        assert!(!Status::Teardown.deploy_in_flight());
    }

    #[test]
    fn subdomain_falls_back_to_app_id() {
        let mut state = AppState::new("pr-7", "https://example.com/repo.git", "main");
        assert_eq!(state.subdomain_or_id(), "pr-7");
        state.subdomain = "my-feature".to_string();
        assert_eq!(state.subdomain_or_id(), "my-feature");
    }

    #[test]
    fn effective_databases_defaults_to_primary() {
        let mut state = AppState::new("pr-7", "url", "main");
        state.database_adapter = "postgresql".to_string();
        let dbs = state.effective_databases();
        assert_eq!(dbs.len(), 1);
        assert_eq!(dbs.get("primary").unwrap(), "postgresql");
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = AppState::new("pr-7", "https://example.com/repo.git", "feature/x");
        state.port = 3005;
        state.processes.insert(
            "web".to_string(),
            ProcessInfo {
                name: "web".to_string(),
                pid: 4242,
                port: 3005,
            },
        );
        let json = serde_json::to_string(&state).unwrap();
        let back: AppState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.app_id, "pr-7");
        assert_eq!(back.port, 3005);
        assert_eq!(back.processes.get("web").unwrap().pid, 4242);
    }
}
