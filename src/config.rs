// ABOUTME: Agent configuration types and TOML loading.
// ABOUTME: Provides dev and prod defaults; a config file overrides them section by section.

use crate::error::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub api: ApiConfig,
    pub paths: PathsConfig,
    pub proxy: ProxyConfig,
    pub defaults: DefaultsConfig,

    /// Runtime flag, set from the CLI rather than the file.
    #[serde(skip)]
    pub dev: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// How long in-flight requests get to finish on shutdown.
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Admin bearer token. In dev mode this is set via --token.
    pub token: String,
    /// Read-only token accepted by the log-stream endpoints only.
    pub stream_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub endpoint: String,
    pub server_id: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub apps_dir: PathBuf,
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub config_dir: PathBuf,
    /// DNS zone review apps are served under: {subdomain}.{zone}.
    pub zone: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub ruby_version: String,
    pub database_adapter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: "0.0.0.0:7890".to_string(),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            endpoint: "https://reviewapps.dev/api/v1".to_string(),
            server_id: String::new(),
            api_key: String::new(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            apps_dir: PathBuf::from("/opt/reviewapps/apps"),
            log_dir: PathBuf::from("/opt/reviewapps/log"),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            enabled: true,
            config_dir: PathBuf::from("/opt/reviewapps/etc/caddy/sites"),
            zone: "srv.reviewapps.dev".to_string(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        DefaultsConfig {
            ruby_version: "3.4.1".to_string(),
            database_adapter: "sqlite".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            api: ApiConfig::default(),
            paths: PathsConfig::default(),
            proxy: ProxyConfig::default(),
            defaults: DefaultsConfig::default(),
            dev: false,
        }
    }
}

impl Config {
    /// Production defaults.
    pub fn default_prod() -> Self {
        Config::default()
    }

    /// Dev defaults: everything under ~/.reviewapps, proxy disabled,
    /// apps reached directly via localhost:{port}.
    pub fn default_dev() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let base = home.join(".reviewapps");
        Config {
            server: ServerConfig {
                listen: "localhost:7890".to_string(),
                ..ServerConfig::default()
            },
            api: ApiConfig {
                endpoint: "http://localhost:3000/api/v1".to_string(),
                ..ApiConfig::default()
            },
            paths: PathsConfig {
                apps_dir: base.join("apps"),
                log_dir: base.join("log"),
            },
            proxy: ProxyConfig {
                enabled: false,
                config_dir: base.join("caddy"),
                ..ProxyConfig::default()
            },
            dev: true,
            ..Config::default()
        }
    }

    /// Load config: defaults for the mode, overridden by the TOML file if it exists.
    pub fn load(path: Option<&Path>, dev: bool) -> Result<Config> {
        let mut cfg = if dev {
            Config::default_dev()
        } else {
            Config::default_prod()
        };

        if let Some(path) = path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                cfg = toml::from_str(&content)?;
                cfg.dev = dev;
            }
        }

        Ok(cfg)
    }

    /// Create the apps and log directories if missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.paths.apps_dir, &self.paths.log_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Path of the persistent state file, next to the apps dir.
    pub fn state_path(&self) -> PathBuf {
        match self.paths.apps_dir.parent() {
            Some(parent) => parent.join("state.json"),
            None => PathBuf::from("state.json"),
        }
    }

    /// Log file path for a named app process.
    /// web → {app_id}.log, others → {app_id}.{name}.log
    pub fn process_log_path(&self, app_id: &str, process: &str) -> PathBuf {
        if process == "web" {
            self.paths.log_dir.join(format!("{app_id}.log"))
        } else {
            self.paths.log_dir.join(format!("{app_id}.{process}.log"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_defaults_disable_proxy() {
        let cfg = Config::default_dev();
        assert!(cfg.dev);
        assert!(!cfg.proxy.enabled);
        assert_eq!(cfg.server.listen, "localhost:7890");
    }

    #[test]
    fn prod_defaults_enable_proxy() {
        let cfg = Config::default_prod();
        assert!(!cfg.dev);
        assert!(cfg.proxy.enabled);
        assert_eq!(cfg.defaults.database_adapter, "sqlite");
    }

    #[test]
    fn toml_overrides_defaults() {
        let toml = r#"
            [server]
            listen = "127.0.0.1:9999"

            [defaults]
            ruby_version = "3.3.0"
        "#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.server.listen, "127.0.0.1:9999");
        assert_eq!(cfg.defaults.ruby_version, "3.3.0");
        // Untouched sections keep their defaults
        assert_eq!(cfg.proxy.zone, "srv.reviewapps.dev");
    }

    #[test]
    fn state_path_is_sibling_of_apps_dir() {
        let cfg = Config::default_prod();
        assert_eq!(
            cfg.state_path(),
            PathBuf::from("/opt/reviewapps/state.json")
        );
    }

    #[test]
    fn process_log_paths() {
        let cfg = Config::default_prod();
        assert_eq!(
            cfg.process_log_path("pr-1", "web"),
            PathBuf::from("/opt/reviewapps/log/pr-1.log")
        );
        assert_eq!(
            cfg.process_log_path("pr-1", "worker"),
            PathBuf::from("/opt/reviewapps/log/pr-1.worker.log")
        );
    }
}
