// ABOUTME: Application-wide error types for rad.
// ABOUTME: Uses thiserror for ergonomic error handling.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("app {0:?} not found")]
    AppNotFound(String),

    #[error("no available ports in range {0}-{1}")]
    NoFreePort(u16, u16),

    #[error("build queue full")]
    QueueFull,

    #[error("deploy cancelled")]
    Cancelled,

    #[error("step {step}: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("health check failed after {0:?}")]
    HealthCheckTimeout(std::time::Duration),

    #[error("{tool}: {message}")]
    Tool { tool: &'static str, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid package name {0:?}: must be alphanumeric with hyphens/dots/colons only")]
    InvalidPackageName(String),

    #[error("branch {branch:?} rejected by pattern {pattern:?}")]
    BranchFiltered { branch: String, pattern: String },

    #[error("hook {0:?} failed with exit code {1:?}")]
    HookFailed(String, Option<i32>),

    #[error("app_path {0:?} does not exist in repo")]
    AppPathMissing(String),

    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Wrap an error with the name of the pipeline step it failed in.
    pub fn in_step(self, step: &'static str) -> Self {
        Error::Step {
            step,
            source: Box::new(self),
        }
    }

    /// Build a tool-failure error from an external command's captured output.
    pub fn tool(tool: &'static str, output: &std::process::Output) -> Self {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = match output.status.code() {
            Some(code) => format!("exit code {code}: {}", stderr.trim()),
            None => format!("killed by signal: {}", stderr.trim()),
        };
        Error::Tool { tool, message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
