// ABOUTME: Request and response body types for the HTTP API.

use crate::state::Hooks;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct DeployRequest {
    pub app_id: String,
    pub repo_url: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub commit_sha: String,
    #[serde(default)]
    pub ruby_version: String,
    #[serde(default)]
    pub node_version: String,
    #[serde(default)]
    pub database_adapter: String,
    #[serde(default)]
    pub databases: HashMap<String, String>,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    #[serde(default)]
    pub build_command: String,
    #[serde(default)]
    pub seed_command: String,
    #[serde(default)]
    pub subdomain: String,
    #[serde(default)]
    pub callback_url: String,
    #[serde(default)]
    pub hooks: Option<Hooks>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecRequest {
    pub command: String,
    /// Seconds; default 30.
    #[serde(default)]
    pub timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRequest {
    pub version: String,
    pub download_url: String,
    /// SHA-256 hex, optional.
    #[serde(default)]
    pub checksum: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub process: Option<String>,
    #[serde(default)]
    pub lines: Option<usize>,
}
