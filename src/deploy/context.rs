// ABOUTME: Shared mutable context threaded through one pipeline run.
// ABOUTME: Steps enrich it: discovered paths, manifest, env, process declarations.

use crate::config::Config;
use crate::drivers::proxy::ProxyManager;
use crate::logstream::DeployLogger;
use crate::manifest::Manifest;
use crate::ports::PortAllocator;
use crate::state::{AppState, Store};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

pub struct StepContext {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub ports: Arc<PortAllocator>,
    pub proxy: Arc<ProxyManager>,
    pub logger: DeployLogger,

    /// Working copy of the app's state for this run. Declared-input changes
    /// are synced back to the store by the steps that make them.
    pub state: AppState,

    // Enriched as steps run
    pub app_dir: PathBuf,
    pub repo_dir: PathBuf,
    pub manifest: Option<Manifest>,
    pub env_map: HashMap<String, String>,
    pub port: u16,

    /// Process declarations, name → command. `web` is the primary process.
    pub processes: HashMap<String, String>,

    /// Detected JS package manager: "npm", "yarn", "pnpm", or "bun".
    pub js_package_manager: Option<String>,

    /// Redeploy mode: refresh in place instead of starting from scratch.
    pub redeploy: bool,
}

impl StepContext {
    /// Env pairs for child processes, as composed so far.
    pub fn env_slice(&self) -> Vec<(String, String)> {
        self.env_map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
