//! Managed per-server client.
//!
//! A [`ManagedClient`] owns exactly one transport for one configured
//! server. Construction never blocks: the connect sequence (transport
//! build, `initialize` handshake, tool discovery) runs as a background
//! task with exponential-backoff retries, and every public operation
//! waits on a shared completion barrier before reading state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use fleet_domain::config::ServerConfig;
use fleet_domain::error::{Error, Result};
use fleet_domain::status::{ManagedServerInfo, ServerStatus, ToolDescriptor};

use crate::breaker::CircuitBreaker;
use crate::protocol::{self, CallToolResult, RequestId, ToolsListResult};
use crate::retry::backoff_delay;
use crate::transport::{build_transport, McpTransport};

/// Default deadline for one connect attempt (build + handshake + discovery).
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for a single `tools/call`.
const CALL_TIMEOUT: Duration = Duration::from_secs(90);

/// Deadline for a health-check probe.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Receives status snapshots as the client's lifecycle progresses. The
/// manager wires this to the status cache and metrics; publishing must
/// never block or fail the client.
pub trait StatusSink: Send + Sync {
    fn publish(&self, info: ManagedServerInfo);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ManagedClient
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
struct ClientState {
    status: ServerStatus,
    tools: Vec<ToolDescriptor>,
    error_details: Option<String>,
}

/// The manager-side owner of one MCP server connection.
pub struct ManagedClient {
    key: String,
    config: ServerConfig,
    client_name: String,
    transport: parking_lot::RwLock<Option<Arc<dyn McpTransport>>>,
    state: parking_lot::RwLock<ClientState>,
    /// Flips to `true` exactly once, when the connect sequence settles
    /// (success or exhaustion). All readers share this barrier.
    init_done: tokio::sync::watch::Receiver<bool>,
    next_id: AtomicU64,
    breaker: CircuitBreaker,
    cancel: CancellationToken,
    sink: Option<Arc<dyn StatusSink>>,
    closed: AtomicBool,
}

impl ManagedClient {
    /// Create the client and start connecting in the background.
    pub fn spawn(
        key: &str,
        config: ServerConfig,
        client_name: &str,
        sink: Option<Arc<dyn StatusSink>>,
    ) -> Arc<Self> {
        let (tx, rx) = tokio::sync::watch::channel(false);
        let client = Arc::new(Self {
            key: key.to_string(),
            config,
            client_name: client_name.to_string(),
            transport: parking_lot::RwLock::new(None),
            state: parking_lot::RwLock::new(ClientState {
                status: ServerStatus::Initializing,
                tools: Vec::new(),
                error_details: None,
            }),
            init_done: rx,
            next_id: AtomicU64::new(1),
            breaker: CircuitBreaker::default(),
            cancel: CancellationToken::new(),
            sink,
            closed: AtomicBool::new(false),
        });
        tokio::spawn(Self::run_initialization(Arc::clone(&client), tx));
        client
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Current status without waiting for initialization; registry read
    /// paths use this to stay non-blocking.
    pub fn current_status(&self) -> ServerStatus {
        self.state.read().status
    }

    /// The cached projection of this client, from live state.
    pub fn info(&self) -> ManagedServerInfo {
        let state = self.state.read();
        ManagedServerInfo {
            key: self.key.clone(),
            label: self
                .config
                .label
                .clone()
                .unwrap_or_else(|| self.key.clone()),
            status: state.status,
            tools: state.tools.clone(),
            error_details: state.error_details.clone(),
            transport_type: self.config.transport_type(),
        }
    }

    /// Wait for the connect sequence to settle (shared by all callers).
    async fn initialized(&self) {
        let mut rx = self.init_done.clone();
        // An error here means the sender dropped after sending `true`.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Status after initialization has settled.
    pub async fn status(&self) -> ServerStatus {
        self.initialized().await;
        self.state.read().status
    }

    /// Discovered tools. Empty unless the server reached `connected`.
    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        self.initialized().await;
        self.state.read().tools.clone()
    }

    /// Post-init projection, re-probing connected servers.
    pub async fn refresh_status(&self) -> ManagedServerInfo {
        self.initialized().await;
        if self.current_status() == ServerStatus::Connected && !self.health_check().await {
            let mut state = self.state.write();
            state.status = ServerStatus::Error;
            state.error_details = Some("health check failed".into());
            state.tools.clear();
        }
        self.info()
    }

    /// True iff the transport answers `tools/list` within the probe window.
    pub async fn health_check(&self) -> bool {
        let Some(transport) = self.transport.read().clone() else {
            return false;
        };
        if !transport.is_alive() {
            return false;
        }
        let id = RequestId::from(self.next_id.fetch_add(1, Ordering::Relaxed));
        matches!(
            tokio::time::timeout(HEALTH_TIMEOUT, transport.request(id, "tools/list", None)).await,
            Ok(Ok(resp)) if resp.result.is_some()
        )
    }

    /// Call one tool. Refused unless the client is connected and the
    /// breaker admits the call.
    pub async fn invoke(&self, tool_name: &str, arguments: Value) -> Result<Value> {
        self.initialized().await;
        let status = self.current_status();
        if !status.is_operational() {
            return Err(Error::Connection(format!(
                "server `{}` is not connected (status: {status})",
                self.key
            )));
        }
        self.breaker.try_acquire()?;

        let result = self.dispatch_call(tool_name, arguments).await;
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(_) => self.breaker.record_failure(),
        }
        result
    }

    async fn dispatch_call(&self, tool_name: &str, arguments: Value) -> Result<Value> {
        let transport = self
            .transport
            .read()
            .clone()
            .ok_or_else(|| Error::Connection("transport not established".into()))?;
        let id = RequestId::from(self.next_id.fetch_add(1, Ordering::Relaxed));
        let params = json!({ "name": tool_name, "arguments": arguments });
        let resp = tokio::time::timeout(
            CALL_TIMEOUT,
            transport.request(id, "tools/call", Some(params)),
        )
        .await
        .map_err(|_| {
            Error::Timeout(format!(
                "tool `{tool_name}` on `{}` did not answer within {}s",
                self.key,
                CALL_TIMEOUT.as_secs()
            ))
        })??;

        if let Some(err) = resp.error {
            return Err(Error::Execution(err.message));
        }
        let call: CallToolResult = serde_json::from_value(resp.result.unwrap_or(Value::Null))?;
        if call.is_error {
            let detail = call
                .content
                .map(|c| c.to_string())
                .unwrap_or_else(|| "tool reported an error".into());
            return Err(Error::Execution(detail));
        }
        Ok(match call.content {
            Some(content) => protocol::collapse_tool_content(&content),
            None => Value::Null,
        })
    }

    /// Shut the client down. Waits for any in-flight initialization to
    /// settle first so the child process cannot leak. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.initialized().await;
        if let Some(transport) = self.transport.read().clone() {
            transport.shutdown().await;
        }
        let mut state = self.state.write();
        if state.status != ServerStatus::Error {
            state.status = ServerStatus::Disabled;
        }
        state.tools.clear();
        tracing::info!(server_key = %self.key, "managed client closed");
    }

    // ── Connect sequence ──────────────────────────────────────────

    async fn run_initialization(self: Arc<Self>, done: tokio::sync::watch::Sender<bool>) {
        let policy = self.config.retry_policy();
        let attempts = policy.max_retries + 1;
        let mut last_error = Error::Connection("no connect attempt made".into());

        for attempt in 1..=attempts {
            if self.cancel.is_cancelled() {
                last_error = Error::Aborted("client closed during initialization".into());
                break;
            }
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    Err(Error::Aborted("client closed during initialization".into()))
                }
                r = self.try_connect() => r,
            };
            match outcome {
                Ok(tools) => {
                    let status = if tools.is_empty() {
                        ServerStatus::NoToolsFound
                    } else {
                        ServerStatus::Connected
                    };
                    {
                        let mut state = self.state.write();
                        state.status = status;
                        state.tools = tools;
                        state.error_details = None;
                    }
                    tracing::info!(
                        server_key = %self.key,
                        attempt,
                        tool_count = self.state.read().tools.len(),
                        "MCP server initialized"
                    );
                    self.publish();
                    let _ = done.send(true);
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        server_key = %self.key,
                        attempt,
                        error = %e,
                        "connect attempt failed"
                    );
                    let aborted = matches!(e, Error::Aborted(_));
                    last_error = e;
                    if aborted {
                        break;
                    }
                    if attempt < attempts {
                        let delay = backoff_delay(&policy, attempt);
                        tokio::select! {
                            _ = self.cancel.cancelled() => {}
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        {
            let mut state = self.state.write();
            state.status = ServerStatus::Error;
            state.error_details = Some(last_error.to_string());
        }
        tracing::warn!(
            server_key = %self.key,
            error = %last_error,
            "MCP server failed to initialize"
        );
        self.publish();
        let _ = done.send(true);
    }

    /// One connect attempt: build the transport, run the handshake, list
    /// tools. The whole attempt shares one deadline.
    async fn try_connect(&self) -> Result<Vec<ToolDescriptor>> {
        let transport_config = self
            .config
            .transport
            .as_ref()
            .ok_or_else(|| Error::ConfigInvalid("no transport configured".into()))?;
        let deadline = self
            .config
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(INIT_TIMEOUT);

        let connect = async {
            let transport: Arc<dyn McpTransport> =
                Arc::from(build_transport(&self.key, transport_config, &self.client_name).await?);

            let params = serde_json::to_value(protocol::initialize_params(&self.client_name))?;
            let resp = transport
                .request(RequestId::init(), "initialize", Some(params))
                .await?;
            if let Some(err) = resp.error {
                return Err(Error::Connection(format!(
                    "initialize failed: {}",
                    err.message
                )));
            }
            transport
                .notify("notifications/initialized", Some(json!({})))
                .await?;

            let id = RequestId::from(self.next_id.fetch_add(1, Ordering::Relaxed));
            let resp = transport.request(id, "tools/list", None).await?;
            let tools = match resp.error {
                Some(err) => {
                    return Err(Error::Execution(format!("tools/list failed: {}", err.message)))
                }
                None => {
                    serde_json::from_value::<ToolsListResult>(
                        resp.result.unwrap_or(Value::Null),
                    )
                    .map(|r| r.tools)
                    .unwrap_or_default()
                }
            };

            *self.transport.write() = Some(transport);
            Ok(tools)
        };

        match tokio::time::timeout(deadline, connect).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "connect to `{}` exceeded {}ms",
                self.key,
                deadline.as_millis()
            ))),
        }
    }

    fn publish(&self) {
        if let Some(sink) = &self.sink {
            sink.publish(self.info());
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
