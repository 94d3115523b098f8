//! Fail-soft config loading.
//!
//! The manager must start (and keep running) no matter what is on disk: a
//! missing, unreadable or unparseable document yields an empty config and
//! a log line, never an error.

use std::path::{Path, PathBuf};

use fleet_domain::config::AppConfig;

/// File name inside `$CONFIG_DIR`.
pub const CONFIG_FILE: &str = "config.json";

/// Resolve the config directory from `CONFIG_DIR` (default `/config`).
pub fn config_dir_from_env() -> PathBuf {
    std::env::var("CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/config"))
}

/// Read and normalize `<dir>/config.json`.
pub async fn load_app_config(dir: &Path) -> AppConfig {
    let path = dir.join(CONFIG_FILE);
    let raw = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "config unreadable, using empty config");
            return AppConfig::default();
        }
    };
    match AppConfig::from_json(&raw) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "config unparseable, using empty config");
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_app_config(dir.path()).await;
        assert!(config.mcp_servers.is_empty());
    }

    #[tokio::test]
    async fn invalid_json_yields_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{ not json").unwrap();
        let config = load_app_config(dir.path()).await;
        assert!(config.mcp_servers.is_empty());
    }

    #[tokio::test]
    async fn missing_top_level_key_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{ "other": 1 }"#).unwrap();
        let config = load_app_config(dir.path()).await;
        assert!(config.mcp_servers.is_empty());
    }

    #[tokio::test]
    async fn valid_document_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{ "mcpServers": { "s1": { "command": "echo-mcp" } } }"#,
        )
        .unwrap();
        let config = load_app_config(dir.path()).await;
        let s1 = config.mcp_servers.get("s1").unwrap();
        assert!(s1.enabled);
        assert!(s1.transport.is_some());
    }
}
