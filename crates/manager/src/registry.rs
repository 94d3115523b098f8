//! Service registry: the process-wide `serverKey → ManagedClient` map.
//!
//! Enabled, valid servers get a live client; disabled or invalid ones get
//! a placeholder projection so status APIs still have something to say.
//! All lifecycle transitions for one key are serialized through a per-key
//! lock; distinct keys proceed in parallel.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use fleet_domain::config::{AppConfig, ServerConfig};
use fleet_domain::status::{ManagedServerInfo, ServerStatus};
use fleet_mcp_client::client::{ManagedClient, StatusSink};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One registry slot: a live client, or a static placeholder for servers
/// that are disabled or failed validation.
#[derive(Clone)]
pub enum RegistryEntry {
    Client(Arc<ManagedClient>),
    Placeholder(ManagedServerInfo),
}

impl RegistryEntry {
    pub fn info(&self) -> ManagedServerInfo {
        match self {
            RegistryEntry::Client(client) => client.info(),
            RegistryEntry::Placeholder(info) => info.clone(),
        }
    }

    pub fn as_client(&self) -> Option<&Arc<ManagedClient>> {
        match self {
            RegistryEntry::Client(client) => Some(client),
            RegistryEntry::Placeholder(_) => None,
        }
    }
}

/// Outcome of a [`Registry::diff_and_apply`] pass.
#[derive(Debug, Default, PartialEq)]
pub struct DiffSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Registry {
    client_name: String,
    sink: Option<Arc<dyn StatusSink>>,
    entries: tokio::sync::RwLock<BTreeMap<String, RegistryEntry>>,
    /// Normalized config each entry was built from, for diffing.
    configs: tokio::sync::RwLock<BTreeMap<String, ServerConfig>>,
    key_locks: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Registry {
    pub fn new(client_name: &str, sink: Option<Arc<dyn StatusSink>>) -> Self {
        Self {
            client_name: client_name.to_string(),
            sink,
            entries: tokio::sync::RwLock::new(BTreeMap::new()),
            configs: tokio::sync::RwLock::new(BTreeMap::new()),
            key_locks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    async fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Create (or replace) the entry for `key` from a normalized config.
    pub async fn register(&self, key: &str, config: ServerConfig) {
        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;
        self.register_locked(key, config).await;
    }

    async fn register_locked(&self, key: &str, config: ServerConfig) {
        let entry = if !config.enabled {
            tracing::info!(server_key = %key, "server disabled, registering placeholder");
            RegistryEntry::Placeholder(placeholder(key, &config, ServerStatus::Disabled, None))
        } else if let Err(e) = config.validate() {
            tracing::warn!(server_key = %key, error = %e, "invalid server config");
            RegistryEntry::Placeholder(placeholder(
                key,
                &config,
                ServerStatus::Error,
                Some(e.to_string()),
            ))
        } else {
            RegistryEntry::Client(ManagedClient::spawn(
                key,
                config.clone(),
                &self.client_name,
                self.sink.clone(),
            ))
        };

        if let RegistryEntry::Placeholder(info) = &entry {
            if let Some(sink) = &self.sink {
                sink.publish(info.clone());
            }
        }
        self.entries.write().await.insert(key.to_string(), entry);
        self.configs.write().await.insert(key.to_string(), config);
    }

    /// Close and drop the entry for `key`. Idempotent.
    pub async fn remove(&self, key: &str) {
        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;
        self.remove_locked(key).await;
    }

    async fn remove_locked(&self, key: &str) {
        let entry = self.entries.write().await.remove(key);
        self.configs.write().await.remove(key);
        if let Some(RegistryEntry::Client(client)) = entry {
            client.close().await;
        }
    }

    pub async fn get(&self, key: &str) -> Option<RegistryEntry> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn config_for(&self, key: &str) -> Option<ServerConfig> {
        self.configs.read().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Consistent snapshot for iteration.
    pub async fn snapshot(&self) -> Vec<(String, RegistryEntry)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Live clients only (placeholders carry no connection).
    pub async fn clients(&self) -> Vec<(String, Arc<ManagedClient>)> {
        self.entries
            .read()
            .await
            .iter()
            .filter_map(|(k, v)| v.as_client().map(|c| (k.clone(), Arc::clone(c))))
            .collect()
    }

    /// Reconcile the registry against a new config: close clients whose
    /// keys vanished, spawn clients for new keys, and recreate clients
    /// whose transport, label or enabled flag changed. Applying the same
    /// config twice is a no-op.
    pub async fn diff_and_apply(&self, new: AppConfig) -> DiffSummary {
        let current = self.configs.read().await.clone();
        let mut summary = DiffSummary::default();

        for key in current.keys() {
            if !new.mcp_servers.contains_key(key) {
                summary.removed.push(key.clone());
            }
        }
        for (key, config) in &new.mcp_servers {
            match current.get(key) {
                None => summary.added.push(key.clone()),
                Some(existing) if !existing.significant_eq(config) => {
                    summary.modified.push(key.clone())
                }
                Some(_) => {
                    // Insignificant drift (schemas, retry, timeouts) takes
                    // effect without a client restart.
                    self.configs
                        .write()
                        .await
                        .insert(key.clone(), config.clone());
                }
            }
        }

        if !summary.is_empty() {
            tracing::info!(
                added = summary.added.len(),
                removed = summary.removed.len(),
                modified = summary.modified.len(),
                "applying config diff"
            );
        }

        for key in &summary.removed {
            self.remove(key).await;
        }
        for key in &summary.added {
            let config = new.mcp_servers[key].clone();
            self.register(key, config).await;
        }
        for key in &summary.modified {
            let config = new.mcp_servers[key].clone();
            let lock = self.key_lock(key).await;
            let _guard = lock.lock().await;
            self.remove_locked(key).await;
            self.register_locked(key, config).await;
        }

        summary
    }
}

fn placeholder(
    key: &str,
    config: &ServerConfig,
    status: ServerStatus,
    error_details: Option<String>,
) -> ManagedServerInfo {
    ManagedServerInfo {
        key: key.to_string(),
        label: config.label.clone().unwrap_or_else(|| key.to_string()),
        status,
        tools: Vec::new(),
        error_details,
        transport_type: config.transport_type(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_domain::config::RawServerConfig;
    use fleet_domain::status::TransportType;

    fn normalize(json: &str) -> ServerConfig {
        serde_json::from_str::<RawServerConfig>(json)
            .unwrap()
            .normalize()
    }

    fn app_config(json: &str) -> AppConfig {
        AppConfig::from_json(json).unwrap()
    }

    #[tokio::test]
    async fn disabled_server_gets_placeholder_and_no_process() {
        let registry = Registry::new("mcp-fleet", None);
        registry
            .register("s1", normalize(r#"{ "disabled": true, "command": "x" }"#))
            .await;
        let entry = registry.get("s1").await.unwrap();
        assert!(entry.as_client().is_none());
        let info = entry.info();
        assert_eq!(info.status, ServerStatus::Disabled);
        assert_eq!(info.transport_type, TransportType::Stdio);
        assert!(info.tools.is_empty());
    }

    #[tokio::test]
    async fn invalid_server_gets_error_placeholder() {
        let registry = Registry::new("mcp-fleet", None);
        registry
            .register("broken", normalize(r#"{ "label": "no transport" }"#))
            .await;
        let info = registry.get("broken").await.unwrap().info();
        assert_eq!(info.status, ServerStatus::Error);
        assert!(info.error_details.is_some());
        assert_eq!(info.label, "no transport");
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = Registry::new("mcp-fleet", None);
        registry
            .register("s1", normalize(r#"{ "disabled": true, "command": "x" }"#))
            .await;
        registry.remove("s1").await;
        registry.remove("s1").await;
        assert!(registry.get("s1").await.is_none());
    }

    #[tokio::test]
    async fn diff_classifies_added_removed_modified() {
        let registry = Registry::new("mcp-fleet", None);
        let first = app_config(
            r#"{ "mcpServers": {
                "keep": { "disabled": true, "command": "a" },
                "change": { "disabled": true, "command": "b" },
                "drop": { "disabled": true, "command": "c" }
            } }"#,
        );
        registry.diff_and_apply(first).await;

        let second = app_config(
            r#"{ "mcpServers": {
                "keep": { "disabled": true, "command": "a" },
                "change": { "disabled": true, "command": "b2" },
                "fresh": { "disabled": true, "command": "d" }
            } }"#,
        );
        let summary = registry.diff_and_apply(second).await;
        assert_eq!(summary.added, vec!["fresh".to_string()]);
        assert_eq!(summary.removed, vec!["drop".to_string()]);
        assert_eq!(summary.modified, vec!["change".to_string()]);

        assert!(registry.get("drop").await.is_none());
        assert!(registry.get("fresh").await.is_some());
    }

    #[tokio::test]
    async fn reapplying_the_same_config_is_a_noop() {
        let registry = Registry::new("mcp-fleet", None);
        let config = app_config(
            r#"{ "mcpServers": { "s1": { "disabled": true, "command": "a" } } }"#,
        );
        registry.diff_and_apply(config.clone()).await;
        let summary = registry.diff_and_apply(config).await;
        assert!(summary.is_empty());
    }

    #[tokio::test]
    async fn insignificant_changes_update_config_without_restart() {
        let registry = Registry::new("mcp-fleet", None);
        registry
            .diff_and_apply(app_config(
                r#"{ "mcpServers": { "s1": { "disabled": true, "command": "a" } } }"#,
            ))
            .await;
        let summary = registry
            .diff_and_apply(app_config(
                r#"{ "mcpServers": {
                    "s1": { "disabled": true, "command": "a", "timeoutMs": 1234 }
                } }"#,
            ))
            .await;
        assert!(summary.is_empty());
        let stored = registry.config_for("s1").await.unwrap();
        assert_eq!(stored.timeout_ms, Some(1234));
    }

    #[tokio::test]
    async fn diff_to_empty_removes_everything() {
        let registry = Registry::new("mcp-fleet", None);
        registry
            .diff_and_apply(app_config(
                r#"{ "mcpServers": {
                    "a": { "disabled": true, "command": "a" },
                    "b": { "disabled": true, "command": "b" }
                } }"#,
            ))
            .await;
        let summary = registry.diff_and_apply(AppConfig::default()).await;
        assert_eq!(summary.removed.len(), 2);
        assert!(registry.keys().await.is_empty());
    }
}
