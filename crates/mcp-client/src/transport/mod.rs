//! Transport drivers for MCP sessions.
//!
//! Each configured server communicates over one of three drivers:
//! - **stdio**: spawn a child process, newline-delimited JSON-RPC over
//!   stdin/stdout ([`stdio::StdioTransport`]).
//! - **sse**: long-lived server-sent-events stream with POSTed requests
//!   ([`sse::SseTransport`]).
//! - **streamable-http**: bidirectional streaming HTTP with an optional
//!   sticky session id ([`http::StreamableHttpTransport`]).
//!
//! All drivers correlate responses to requests by id; the stream-based
//! drivers share the [`PendingMap`] waiter table.

pub mod http;
pub mod sse;
pub mod stdio;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use fleet_domain::config::Transport;
use fleet_domain::error::{Error, Result};

use crate::protocol::{JsonRpcResponse, RequestId};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait for MCP server transports. The managed client owns id allocation;
/// drivers only move frames and correlate them.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and wait for the response carrying `id`.
    async fn request(
        &self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse>;

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// Check if the transport is still usable.
    fn is_alive(&self) -> bool;

    /// Shut down the transport. Idempotent; outstanding waiters are
    /// rejected with `aborted`.
    async fn shutdown(&self);
}

/// Build the driver matching a transport config.
pub async fn build_transport(
    server_key: &str,
    transport: &Transport,
    client_name: &str,
) -> Result<Box<dyn McpTransport>> {
    match transport {
        Transport::Stdio {
            command,
            args,
            env,
            cwd,
            stderr,
        } => {
            let t = stdio::StdioTransport::spawn(
                server_key,
                command,
                args,
                env,
                cwd.as_deref(),
                stderr.unwrap_or_default(),
            )?;
            Ok(Box::new(t))
        }
        Transport::Sse { url, headers } => {
            let t = sse::SseTransport::connect(server_key, url, headers, client_name).await?;
            Ok(Box::new(t))
        }
        Transport::StreamableHttp {
            url,
            session_id,
            headers,
        } => {
            let t = http::StreamableHttpTransport::new(
                server_key,
                url,
                session_id.clone(),
                headers,
                client_name,
            )?;
            Ok(Box::new(t))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pending-request correlation table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Maps in-flight request ids to their waiters. Stream-based drivers push
/// every inbound response through [`PendingMap::complete`]; `close`
/// rejects all outstanding waiters at once.
pub(crate) struct PendingMap {
    waiters: Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
    closed: AtomicBool,
}

impl PendingMap {
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a waiter for `id`. Fails once the session is closed.
    pub fn register(&self, id: RequestId) -> Result<oneshot::Receiver<JsonRpcResponse>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Connection("session is closed".into()));
        }
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(id, tx);
        Ok(rx)
    }

    /// Route an inbound response to its waiter. Responses with unknown ids
    /// are dropped (the server may emit frames for cancelled requests).
    pub fn complete(&self, resp: JsonRpcResponse) {
        let waiter = self.waiters.lock().remove(&resp.id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(resp);
            }
            None => {
                tracing::debug!(id = %resp.id, "dropping response with no matching waiter");
            }
        }
    }

    /// Remove a waiter that gave up (timeout, cancellation).
    pub fn forget(&self, id: &RequestId) {
        self.waiters.lock().remove(id);
    }

    /// Mark the session closed and drop every outstanding waiter; their
    /// receivers resolve to `RecvError`, surfaced as `aborted`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.waiters.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Await a registered waiter, mapping channel teardown to `aborted`.
pub(crate) async fn await_response(
    rx: oneshot::Receiver<JsonRpcResponse>,
) -> Result<JsonRpcResponse> {
    rx.await
        .map_err(|_| Error::Aborted("session closed while awaiting response".into()))
}

/// Removes the waiter for `id` when the requesting future is dropped
/// (timeout, caller cancellation), so the table never accumulates
/// abandoned entries. Completed waiters were already removed; the extra
/// `forget` is a no-op then.
pub(crate) struct PendingGuard<'a> {
    map: &'a PendingMap,
    id: RequestId,
}

impl<'a> PendingGuard<'a> {
    pub fn new(map: &'a PendingMap, id: RequestId) -> Self {
        Self { map, id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.map.forget(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(id: RequestId) -> JsonRpcResponse {
        JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id,
            result: Some(serde_json::json!({})),
            error: None,
        }
    }

    #[tokio::test]
    async fn complete_routes_to_matching_waiter() {
        let map = PendingMap::new();
        let rx = map.register(RequestId::Num(1)).unwrap();
        map.complete(resp(RequestId::Num(1)));
        let got = await_response(rx).await.unwrap();
        assert_eq!(got.id, RequestId::Num(1));
    }

    #[tokio::test]
    async fn unknown_id_is_dropped() {
        let map = PendingMap::new();
        let rx = map.register(RequestId::Num(1)).unwrap();
        map.complete(resp(RequestId::Num(99)));
        // Waiter is still pending; closing rejects it.
        map.close();
        assert!(await_response(rx).await.is_err());
    }

    #[tokio::test]
    async fn close_rejects_outstanding_waiters_with_aborted() {
        let map = PendingMap::new();
        let rx = map.register(RequestId::init()).unwrap();
        map.close();
        let err = await_response(rx).await.unwrap_err();
        assert_eq!(err.kind(), fleet_domain::ErrorKind::Aborted);
        // New registrations are refused after close.
        assert!(map.register(RequestId::Num(2)).is_err());
    }
}
