// ABOUTME: Environment contract injected into every review app.
// ABOUTME: Composes fixed defaults, a fresh secret, database URLs, and user vars, then writes .env.

use crate::error::Result;
use rand::RngCore;
use std::collections::HashMap;
use std::path::Path;

/// Compose the full environment for an app.
///
/// Later layers override earlier ones: fixed defaults (including a freshly
/// generated SECRET_KEY_BASE), then database URLs, then user-supplied vars.
pub fn compose(
    subdomain: &str,
    zone: &str,
    dev_mode: bool,
    db_env: &HashMap<String, String>,
    user_env: &HashMap<String, String>,
) -> HashMap<String, String> {
    let (host, ssl) = if dev_mode {
        ("localhost".to_string(), "false")
    } else {
        (format!("{subdomain}.{zone}"), "true")
    };

    let mut env: HashMap<String, String> = [
        ("REVIEWAPPS", "true".to_string()),
        ("REVIEWAPPS_HOST", host),
        ("REVIEWAPPS_SSL", ssl.to_string()),
        ("RAILS_ENV", "production".to_string()),
        ("NODE_ENV", "production".to_string()),
        ("RAILS_SERVE_STATIC_FILES", "true".to_string()),
        ("RAILS_LOG_TO_STDOUT", "true".to_string()),
        ("DISABLE_SPRING", "1".to_string()),
        ("WEB_CONCURRENCY", "0".to_string()),
        ("RAILS_MAX_THREADS", "3".to_string()),
        ("SECRET_KEY_BASE", generate_secret()),
        ("ACTION_CABLE_ADAPTER", "async".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    for (k, v) in db_env {
        env.insert(k.clone(), v.clone());
    }
    for (k, v) in user_env {
        env.insert(k.clone(), v.clone());
    }

    env
}

/// Write a KEY=VALUE env file, sorted by key, mode 0600.
pub fn write_file(path: &Path, env: &HashMap<String, String>) -> Result<()> {
    let mut keys: Vec<&String> = env.keys().collect();
    keys.sort();

    let mut content = String::new();
    for key in keys {
        content.push_str(key);
        content.push('=');
        content.push_str(&env[key]);
        content.push('\n');
    }

    std::fs::write(path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Read an env file back into KEY=VALUE pairs, skipping blanks and comments.
/// Used when a saved process is restarted outside a deploy.
pub fn read_file(path: &Path) -> Vec<(String, String)> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            line.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}

/// 64 bytes from the OS CSPRNG, hex encoded: a per-deploy SECRET_KEY_BASE.
fn generate_secret() -> String {
    let mut bytes = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
