// ABOUTME: Per-app database naming and the createdb/dropdb shell.
// ABOUTME: Names are sanitised to ra_{app_id}_{name} before touching the CLI.

use crate::error::{Error, Result};
use std::path::Path;
use tokio::process::Command;

/// One logical database of an app (`primary`, `queue`, `cache`, ...).
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub app_id: String,
    pub name: String,
    pub adapter: String,
}

impl DbConfig {
    pub fn new(app_id: &str, name: &str, adapter: &str) -> DbConfig {
        DbConfig {
            app_id: app_id.to_string(),
            name: name.to_string(),
            adapter: adapter.to_string(),
        }
    }

    pub fn is_postgres(&self) -> bool {
        matches!(self.adapter.as_str(), "postgresql" | "postgres")
    }

    /// Physical database name: `ra_{app_id}_{name}`, non-alphanumerics
    /// flattened to underscores.
    pub fn db_name(&self) -> String {
        format!("ra_{}_{}", sanitize(&self.app_id), sanitize(&self.name))
    }

    /// Connection URL handed to the app.
    pub fn url(&self, apps_dir: &Path) -> String {
        if self.is_postgres() {
            format!("postgres://localhost/{}", self.db_name())
        } else {
            format!(
                "sqlite3:{}/{}/{}.sqlite3",
                apps_dir.display(),
                self.app_id,
                self.name
            )
        }
    }

    /// Env var the URL is published under: DATABASE_URL for `primary`,
    /// `{NAME}_DATABASE_URL` otherwise.
    pub fn env_key(&self) -> String {
        if self.name == "primary" {
            "DATABASE_URL".to_string()
        } else {
            format!("{}_DATABASE_URL", self.name.to_uppercase())
        }
    }
}

/// Create a Postgres database. "Already exists" is success: redeploys hit
/// this path every time.
pub async fn create_db(db_name: &str) -> Result<()> {
    let output = Command::new("createdb").arg(db_name).output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("already exists") {
            return Ok(());
        }
        return Err(Error::tool("createdb", &output));
    }
    Ok(())
}

pub async fn drop_db(db_name: &str) -> Result<()> {
    let output = Command::new("dropdb")
        .args(["--if-exists", db_name])
        .output()
        .await?;
    if !output.status.success() {
        return Err(Error::tool("dropdb", &output));
    }
    Ok(())
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_name_is_sanitised() {
        let db = DbConfig::new("pr-42.app", "primary", "postgresql");
        assert_eq!(db.db_name(), "ra_pr_42_app_primary");
    }

    #[test]
    fn env_key_for_primary_and_named() {
        assert_eq!(DbConfig::new("a", "primary", "postgres").env_key(), "DATABASE_URL");
        assert_eq!(DbConfig::new("a", "queue", "postgres").env_key(), "QUEUE_DATABASE_URL");
    }

    #[test]
    fn postgres_and_sqlite_urls() {
        let pg = DbConfig::new("pr-1", "primary", "postgresql");
        assert_eq!(pg.url(Path::new("/apps")), "postgres://localhost/ra_pr_1_primary");

        let lite = DbConfig::new("pr-1", "cache", "sqlite");
        assert_eq!(lite.url(Path::new("/apps")), "sqlite3:/apps/pr-1/cache.sqlite3");
    }

    #[test]
    fn adapter_aliases() {
        assert!(DbConfig::new("a", "primary", "postgres").is_postgres());
        assert!(DbConfig::new("a", "primary", "postgresql").is_postgres());
        assert!(!DbConfig::new("a", "primary", "sqlite").is_postgres());
    }
}
