// ABOUTME: Per-app Caddy site files and admin reloads.
// ABOUTME: The main Caddyfile imports {config_dir}/*.caddy; we only manage fragments.

use super::{probe_version, run_checked};
use crate::error::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct ProxyManager {
    config_dir: PathBuf,
    log_dir: PathBuf,
    zone: String,
    /// Disabled in dev mode: apps are reached directly via localhost:{port}.
    pub enabled: bool,
}

/// Parameters for one app's site block.
pub struct SiteConfig<'a> {
    pub app_id: &'a str,
    pub subdomain: &'a str,
    pub port: u16,
}

impl ProxyManager {
    pub fn new(config_dir: PathBuf, log_dir: PathBuf, zone: String, enabled: bool) -> ProxyManager {
        ProxyManager {
            config_dir,
            log_dir,
            zone,
            enabled,
        }
    }

    pub fn hostname(&self, subdomain: &str) -> String {
        format!("{subdomain}.{}", self.zone)
    }

    /// Write `{config_dir}/{app_id}.caddy` mapping the app's hostname to its
    /// local port.
    pub fn write_site_config(&self, site: &SiteConfig<'_>) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        std::fs::create_dir_all(&self.config_dir)?;

        let hostname = self.hostname(site.subdomain);
        let access_log = self.log_dir.join(format!("{}.access.log", site.app_id));
        let content = format!(
            "{hostname} {{\n\
             \treverse_proxy localhost:{port} {{\n\
             \t\theader_up X-Forwarded-Proto {{scheme}}\n\
             \t\theader_up X-Forwarded-For {{remote_host}}\n\
             \t\theader_up X-Forwarded-Host {{host}}\n\
             \t}}\n\
             \tlog {{\n\
             \t\toutput file {access_log}\n\
             \t}}\n\
             }}\n",
            port = site.port,
            access_log = access_log.display(),
        );

        let path = self.site_path(site.app_id);
        std::fs::write(&path, content)?;
        tracing::info!(path = %path.display(), %hostname, port = site.port, "proxy: wrote site config");
        Ok(())
    }

    pub fn remove_site_config(&self, app_id: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let path = self.site_path(app_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Ask the proxy to reload its configuration.
    pub async fn reload(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let caddyfile = self.find_caddyfile();
        let mut cmd = tokio::process::Command::new("caddy");
        cmd.arg("reload").arg("--config").arg(&caddyfile);
        run_checked("caddy reload", &mut cmd).await?;
        tracing::info!("proxy: reloaded configuration");
        Ok(())
    }

    /// Whether the proxy admin API answers.
    pub async fn is_running(&self) -> bool {
        if !self.enabled {
            return false;
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .expect("static client config");
        matches!(
            client.get("http://localhost:2019/config/").send().await,
            Ok(resp) if resp.status().is_success()
        )
    }

    pub async fn version() -> String {
        let out = probe_version("caddy", &["version"]).await;
        out.split_whitespace()
            .next()
            .unwrap_or("unknown")
            .to_string()
    }

    fn site_path(&self, app_id: &str) -> PathBuf {
        self.config_dir.join(format!("{app_id}.caddy"))
    }

    /// The main Caddyfile is expected next to the sites dir, with the usual
    /// system locations as fallbacks.
    fn find_caddyfile(&self) -> PathBuf {
        let sibling = self
            .config_dir
            .parent()
            .unwrap_or(Path::new("/"))
            .join("Caddyfile");
        if sibling.exists() {
            return sibling;
        }
        for candidate in ["/etc/caddy/Caddyfile", "/opt/reviewapps/etc/caddy/Caddyfile"] {
            let path = PathBuf::from(candidate);
            if path.exists() {
                return path;
            }
        }
        sibling
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(dir: &Path, enabled: bool) -> ProxyManager {
        ProxyManager::new(
            dir.join("sites"),
            dir.join("log"),
            "srv.reviewapps.dev".to_string(),
            enabled,
        )
    }

    #[test]
    fn writes_and_removes_site_file() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = manager(dir.path(), true);

        proxy
            .write_site_config(&SiteConfig {
                app_id: "pr-1",
                subdomain: "pr-1-myapp",
                port: 3004,
            })
            .unwrap();

        let path = dir.path().join("sites/pr-1.caddy");
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("pr-1-myapp.srv.reviewapps.dev {"));
        assert!(content.contains("reverse_proxy localhost:3004"));
        assert!(content.contains("pr-1.access.log"));

        proxy.remove_site_config("pr-1").unwrap();
        assert!(!path.exists());
        // Removing an absent file is fine.
        proxy.remove_site_config("pr-1").unwrap();
    }

    #[test]
    fn disabled_manager_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = manager(dir.path(), false);
        proxy
            .write_site_config(&SiteConfig {
                app_id: "pr-1",
                subdomain: "pr-1",
                port: 3004,
            })
            .unwrap();
        assert!(!dir.path().join("sites").exists());
    }
}
