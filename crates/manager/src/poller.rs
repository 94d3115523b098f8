//! Background status poller.
//!
//! One task, fixed cadence: re-read the config (picking up added/removed
//! servers), then refresh every client's status into the cache. A slow
//! tick never queues work behind itself — missed intervals are skipped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::loader::load_app_config;
use crate::registry::{Registry, RegistryEntry};
use crate::status_cache::StatusCache;

/// Default refresh cadence.
pub const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn the poller task. Cancel the token to stop it.
pub fn spawn_status_poller(
    registry: Arc<Registry>,
    cache: Arc<StatusCache>,
    config_dir: PathBuf,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // A tick that overruns the interval is skipped, not queued.
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Consume the immediate first tick; startup already polled.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("status poller stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            let started = tokio::time::Instant::now();
            run_tick(&registry, &cache, &config_dir).await;
            let elapsed = started.elapsed();
            if elapsed > interval {
                tracing::warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    "poll tick overran its interval; next tick(s) skipped"
                );
            }
        }
    })
}

/// One poll pass. Per-server failures are recorded in that server's
/// status, never propagated.
pub async fn run_tick(registry: &Registry, cache: &StatusCache, config_dir: &PathBuf) {
    let config = load_app_config(config_dir).await;
    registry.diff_and_apply(config).await;

    let snapshot = registry.snapshot().await;
    let refreshes = snapshot.into_iter().map(|(key, entry)| async move {
        match entry {
            RegistryEntry::Client(client) => client.refresh_status().await,
            // Placeholders are republished so their TTL stays fresh.
            RegistryEntry::Placeholder(info) => {
                tracing::trace!(server_key = %key, "refreshing placeholder status");
                info
            }
        }
    });
    for info in join_all(refreshes).await {
        cache.put(&info).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::CONFIG_FILE;
    use fleet_domain::status::ServerStatus;

    #[tokio::test]
    async fn tick_picks_up_added_and_removed_servers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let registry = Registry::new("mcp-fleet", None);
        let cache = StatusCache::disabled();

        std::fs::write(
            &path,
            r#"{ "mcpServers": { "s1": { "disabled": true, "command": "a" } } }"#,
        )
        .unwrap();
        run_tick(&registry, &cache, &dir.path().to_path_buf()).await;
        assert_eq!(registry.keys().await, vec!["s1".to_string()]);

        std::fs::write(
            &path,
            r#"{ "mcpServers": { "s2": { "disabled": true, "command": "b" } } }"#,
        )
        .unwrap();
        run_tick(&registry, &cache, &dir.path().to_path_buf()).await;
        assert_eq!(registry.keys().await, vec!["s2".to_string()]);
        assert_eq!(
            registry.get("s2").await.unwrap().info().status,
            ServerStatus::Disabled
        );
    }

    #[tokio::test]
    async fn cancelled_poller_exits() {
        let registry = Arc::new(Registry::new("mcp-fleet", None));
        let cache = Arc::new(StatusCache::disabled());
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let task = spawn_status_poller(
            registry,
            cache,
            dir.path().to_path_buf(),
            Duration::from_secs(60),
            cancel.clone(),
        );
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("poller should stop promptly")
            .unwrap();
    }
}
