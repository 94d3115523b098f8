//! Process-wide manager facade.
//!
//! One [`Manager`] per process: it boots the status cache, registry,
//! poller and config watcher, answers the read paths (status, unified
//! tools), routes tool calls, and tears everything down inside the
//! shutdown budget.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fleet_domain::config::AppConfig;
use fleet_domain::error::{Error, Result};
use fleet_domain::status::{ManagedServerInfo, ServerStatus};
use fleet_domain::tool::ToolFailure;
use fleet_mcp_client::client::StatusSink;

use crate::aggregator::{build_unified_tools, resolve_tool, UnifiedTool};
use crate::invoke::InvocationWrapper;
use crate::loader::{config_dir_from_env, load_app_config};
use crate::metrics::{MetricsSink, TracingMetrics};
use crate::poller::{spawn_status_poller, POLL_INTERVAL};
use crate::registry::{DiffSummary, Registry};
use crate::status_cache::StatusCache;
use crate::watcher::spawn_config_watcher;

/// Total time allowed for shutdown before stragglers are abandoned (their
/// child processes die with the kill-on-drop handles).
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(10);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Directory holding `config.json`.
    pub config_dir: PathBuf,
    /// Status cache endpoint; `None` disables the cache.
    pub redis_url: Option<String>,
    /// Sink for persisted binary content (accepted for parity with the
    /// environment contract; unused by the core normalizer).
    pub uploads_dir: Option<PathBuf>,
    /// Status poll cadence.
    pub poll_interval: Duration,
    /// Name reported to servers in the `initialize` handshake.
    pub client_name: String,
    /// Whether to watch the config file for hot reload.
    pub watch_config: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/config"),
            redis_url: None,
            uploads_dir: None,
            poll_interval: POLL_INTERVAL,
            client_name: "mcp-fleet".to_string(),
            watch_config: true,
        }
    }
}

impl ManagerOptions {
    /// Resolve from `CONFIG_DIR`, `REDIS_URL` and `UPLOADS_DIR`.
    pub fn from_env() -> Self {
        Self {
            config_dir: config_dir_from_env(),
            redis_url: std::env::var("REDIS_URL").ok(),
            uploads_dir: std::env::var("UPLOADS_DIR").ok().map(PathBuf::from),
            ..Self::default()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status sink wiring
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Publishes client lifecycle updates to the cache and the metrics sink,
/// fire-and-forget.
struct CacheStatusSink {
    cache: Arc<StatusCache>,
    metrics: Arc<dyn MetricsSink>,
}

impl StatusSink for CacheStatusSink {
    fn publish(&self, info: ManagedServerInfo) {
        self.metrics.record_connection(&info.key, info.status);
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            cache.put(&info).await;
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Manager {
    options: ManagerOptions,
    registry: Arc<Registry>,
    cache: Arc<StatusCache>,
    invoker: InvocationWrapper,
    cancel: CancellationToken,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    reload_tx: mpsc::Sender<()>,
    stopped: AtomicBool,
}

impl Manager {
    /// Boot with the default (tracing) metrics sink and a cache resolved
    /// from the options.
    pub async fn start(options: ManagerOptions) -> Result<Arc<Self>> {
        let cache = Arc::new(StatusCache::connect(options.redis_url.as_deref()).await);
        Self::start_with(options, cache, Arc::new(TracingMetrics)).await
    }

    /// Boot with explicit cache and metrics sink.
    pub async fn start_with(
        options: ManagerOptions,
        cache: Arc<StatusCache>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Arc<Self>> {
        let sink: Arc<dyn StatusSink> = Arc::new(CacheStatusSink {
            cache: Arc::clone(&cache),
            metrics: Arc::clone(&metrics),
        });
        let registry = Arc::new(Registry::new(&options.client_name, Some(sink)));
        let (reload_tx, mut reload_rx) = mpsc::channel::<()>(4);
        let cancel = CancellationToken::new();

        let manager = Arc::new(Self {
            invoker: InvocationWrapper::new(Arc::clone(&registry), metrics),
            registry,
            cache: Arc::clone(&cache),
            cancel: cancel.clone(),
            tasks: parking_lot::Mutex::new(Vec::new()),
            reload_tx,
            stopped: AtomicBool::new(false),
            options,
        });

        // Initial load; per-server failures surface as status, not errors.
        let config = load_app_config(&manager.options.config_dir).await;
        for issue in config.validate() {
            match issue.severity {
                fleet_domain::config::ConfigSeverity::Warning => {
                    tracing::warn!("config: {issue}")
                }
                fleet_domain::config::ConfigSeverity::Error => {
                    tracing::error!("config: {issue}")
                }
            }
        }
        let server_count = config.mcp_servers.len();
        manager.registry.diff_and_apply(config).await;
        tracing::info!(server_count, "manager initialized");

        let poller = spawn_status_poller(
            Arc::clone(&manager.registry),
            cache,
            manager.options.config_dir.clone(),
            manager.options.poll_interval,
            cancel.child_token(),
        );
        manager.tasks.lock().push(poller);

        if manager.options.watch_config {
            match spawn_config_watcher(
                manager.options.config_dir.clone(),
                manager.reload_tx.clone(),
                cancel.child_token(),
            ) {
                Ok(task) => manager.tasks.lock().push(task),
                Err(e) => {
                    tracing::warn!(error = %e, "config watcher unavailable, hot reload via signal only");
                }
            }
        }

        // Reload loop: drains ConfigUpdated signals from the watcher and
        // any admin surface holding `reload_handle()`.
        let reloader = Arc::clone(&manager);
        let reload_cancel = cancel.child_token();
        manager.tasks.lock().push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reload_cancel.cancelled() => return,
                    signal = reload_rx.recv() => {
                        if signal.is_none() {
                            return;
                        }
                        reloader.reload().await;
                    }
                }
            }
        }));

        Ok(manager)
    }

    /// The `ConfigUpdated` contract: an admin surface sends one unit after
    /// writing the config file.
    pub fn reload_handle(&self) -> mpsc::Sender<()> {
        self.reload_tx.clone()
    }

    /// Re-read the config and reconcile the registry. Idempotent.
    pub async fn reload(&self) -> DiffSummary {
        let config = load_app_config(&self.options.config_dir).await;
        self.registry.diff_and_apply(config).await
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Status snapshot for every registered server: cache first, live
    /// registry state for keys the cache does not know.
    pub async fn managed_servers_info(&self) -> Vec<ManagedServerInfo> {
        let keys = self.registry.keys().await;
        let mut infos = Vec::with_capacity(keys.len());
        for key in keys {
            let cached = self.cache.get(&key).await;
            if cached.status == ServerStatus::Uninitialized {
                if let Some(entry) = self.registry.get(&key).await {
                    infos.push(entry.info());
                    continue;
                }
            }
            infos.push(cached);
        }
        infos
    }

    /// The aggregated tool catalog for the LLM runtime.
    pub async fn unified_tools(&self) -> Vec<UnifiedTool> {
        build_unified_tools(&self.registry).await
    }

    /// Execute a unified tool by its `<serverKey>_<tool>` name. Always
    /// returns a value; failures come back as `{error:true, …}`.
    pub async fn call_tool(&self, unified_name: &str, arguments: Value) -> Value {
        let keys = self.registry.keys().await;
        match resolve_tool(&keys, unified_name) {
            Some((server_key, tool_name)) => {
                self.invoker
                    .execute(&server_key, &tool_name, arguments, None)
                    .await
            }
            None => serde_json::to_value(ToolFailure::new(
                "",
                unified_name,
                &Error::Execution(format!("unknown tool `{unified_name}`")),
            ))
            .unwrap_or_default(),
        }
    }

    /// Stop background tasks and close every client. Idempotent; bounded
    /// by the shutdown budget.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("manager shutting down");
        self.cancel.cancel();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        match tokio::time::timeout(
            SHUTDOWN_BUDGET,
            self.registry.diff_and_apply(AppConfig::default()),
        )
        .await
        {
            Ok(summary) => {
                tracing::info!(closed = summary.removed.len(), "all clients closed");
            }
            Err(_) => {
                tracing::warn!(
                    budget_secs = SHUTDOWN_BUDGET.as_secs(),
                    "shutdown budget exceeded; abandoning remaining clients"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_to_the_config_contract() {
        let options = ManagerOptions::default();
        assert_eq!(options.config_dir, PathBuf::from("/config"));
        assert_eq!(options.poll_interval, Duration::from_secs(60));
        assert!(options.redis_url.is_none());
        assert!(options.watch_config);
    }
}
