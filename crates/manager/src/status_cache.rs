//! Redis-backed status cache.
//!
//! Read-only status APIs must answer without touching live clients, and
//! across processes, so per-server [`ManagedServerInfo`] is serialized
//! into an external store under `mcp_status:<key>` with a TTL. The store
//! is strictly best-effort: the manager runs fine without it.

use fleet_domain::status::ManagedServerInfo;

/// Key prefix for cached entries.
pub const STATUS_KEY_PREFIX: &str = "mcp_status:";

/// Entry lifetime, refreshed on every write.
pub const STATUS_TTL_SECS: u64 = 300;

pub struct StatusCache {
    conn: Option<redis::aio::ConnectionManager>,
}

impl StatusCache {
    /// Connect to the store at `url`; `None` (or a failed connect) yields
    /// a disabled cache that reads as `uninitialized` everywhere.
    pub async fn connect(url: Option<&str>) -> Self {
        let Some(url) = url else {
            tracing::info!("status cache disabled (no REDIS_URL)");
            return Self::disabled();
        };
        let client = match redis::Client::open(url) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(error = %e, "status cache client failed to build, continuing without");
                return Self::disabled();
            }
        };
        match client.get_connection_manager().await {
            Ok(conn) => {
                tracing::info!("status cache connected");
                Self { conn: Some(conn) }
            }
            Err(e) => {
                tracing::warn!(error = %e, "status cache unreachable, continuing without");
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self { conn: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    fn cache_key(server_key: &str) -> String {
        format!("{STATUS_KEY_PREFIX}{server_key}")
    }

    /// Write one entry, refreshing its TTL. Failures are logged and
    /// swallowed.
    pub async fn put(&self, info: &ManagedServerInfo) {
        let Some(conn) = &self.conn else { return };
        let payload = match serde_json::to_string(info) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(server_key = %info.key, error = %e, "failed to serialize status");
                return;
            }
        };
        let mut conn = conn.clone();
        let result: redis::RedisResult<()> = redis::cmd("SET")
            .arg(Self::cache_key(&info.key))
            .arg(payload)
            .arg("EX")
            .arg(STATUS_TTL_SECS)
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            tracing::warn!(server_key = %info.key, error = %e, "status cache write failed");
        }
    }

    /// Read one entry. A miss yields a synthetic `uninitialized` entry; a
    /// store failure yields the same with `error_details` set.
    pub async fn get(&self, server_key: &str) -> ManagedServerInfo {
        let Some(conn) = &self.conn else {
            return ManagedServerInfo::uninitialized(server_key);
        };
        let mut conn = conn.clone();
        let result: redis::RedisResult<Option<String>> = redis::cmd("GET")
            .arg(Self::cache_key(server_key))
            .query_async(&mut conn)
            .await;
        match result {
            Ok(Some(payload)) => serde_json::from_str(&payload).unwrap_or_else(|e| {
                tracing::warn!(server_key = %server_key, error = %e, "corrupt status cache entry");
                ManagedServerInfo::uninitialized(server_key)
            }),
            Ok(None) => ManagedServerInfo::uninitialized(server_key),
            Err(e) => {
                tracing::warn!(server_key = %server_key, error = %e, "status cache read failed");
                ManagedServerInfo::cache_unavailable(server_key)
            }
        }
    }

    /// Read many entries, preserving key order.
    pub async fn get_many(&self, server_keys: &[String]) -> Vec<ManagedServerInfo> {
        let mut infos = Vec::with_capacity(server_keys.len());
        for key in server_keys {
            infos.push(self.get(key).await);
        }
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_domain::status::ServerStatus;

    #[test]
    fn key_format() {
        assert_eq!(StatusCache::cache_key("s1"), "mcp_status:s1");
    }

    #[tokio::test]
    async fn disabled_cache_reads_uninitialized() {
        let cache = StatusCache::disabled();
        assert!(!cache.is_enabled());
        let info = cache.get("s1").await;
        assert_eq!(info.status, ServerStatus::Uninitialized);
        assert!(info.error_details.is_none());
    }

    #[tokio::test]
    async fn disabled_cache_write_is_a_noop() {
        let cache = StatusCache::disabled();
        cache.put(&ManagedServerInfo::uninitialized("s1")).await;
        let infos = cache.get_many(&["s1".into(), "s2".into()]).await;
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().all(|i| i.status == ServerStatus::Uninitialized));
    }
}
