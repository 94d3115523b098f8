//! SSE transport: a long-lived `text/event-stream` connection carries
//! server→client frames; requests are POSTed to the endpoint the server
//! advertises in its first `endpoint` event.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;

use fleet_domain::error::{Error, Result};

use super::{await_response, McpTransport, PendingMap};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};

/// How long to wait for the server's `endpoint` event before giving up.
const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(30);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental SSE frame parser. Events are separated by a blank line;
/// `data:` lines within one event are joined with newlines.
#[derive(Default)]
pub(crate) struct SseEventParser {
    buffer: String,
}

impl SseEventParser {
    /// Feed a chunk of bytes; returns every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut events = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let raw: String = self.buffer.drain(..end + 2).collect();
            let mut event = String::from("message");
            let mut data_lines = Vec::new();
            for line in raw.lines() {
                if let Some(rest) = line.strip_prefix("event:") {
                    event = rest.trim().to_string();
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
                }
            }
            if !data_lines.is_empty() {
                events.push(SseEvent {
                    event,
                    data: data_lines.join("\n"),
                });
            }
        }
        events
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SseTransport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SseTransport {
    server_key: String,
    client: reqwest::Client,
    /// POST target advertised by the server's `endpoint` event.
    endpoint: reqwest::Url,
    headers: BTreeMap<String, String>,
    pending: Arc<PendingMap>,
    alive: Arc<AtomicBool>,
    stream_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SseTransport {
    /// Open the event stream and wait for the server to advertise its POST
    /// endpoint.
    pub async fn connect(
        server_key: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
        client_name: &str,
    ) -> Result<Self> {
        let base = reqwest::Url::parse(url)
            .map_err(|e| Error::ConfigInvalid(format!("invalid sse url `{url}`: {e}")))?;
        let client = reqwest::Client::builder()
            .user_agent(format!("{client_name}/{}", crate::protocol::CLIENT_VERSION))
            .build()
            .map_err(|e| Error::Connection(format!("failed to build http client: {e}")))?;

        let mut req = client
            .get(base.clone())
            .header("Accept", "text/event-stream");
        for (key, value) in headers {
            req = req.header(key, value);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| Error::Connection(format!("sse connect failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Connection(format!(
                "sse connect returned HTTP {}",
                resp.status()
            )));
        }

        let pending = Arc::new(PendingMap::new());
        let alive = Arc::new(AtomicBool::new(true));
        let (endpoint_tx, endpoint_rx) = tokio::sync::oneshot::channel::<String>();

        let task = spawn_event_router(
            server_key.to_string(),
            resp,
            Arc::clone(&pending),
            Arc::clone(&alive),
            endpoint_tx,
        );

        let endpoint_path = tokio::time::timeout(ENDPOINT_TIMEOUT, endpoint_rx)
            .await
            .map_err(|_| Error::Timeout("waiting for sse endpoint event".into()))?
            .map_err(|_| Error::Connection("sse stream ended before endpoint event".into()))?;
        let endpoint = base
            .join(&endpoint_path)
            .map_err(|e| Error::Connection(format!("bad sse endpoint `{endpoint_path}`: {e}")))?;

        tracing::debug!(server_key = %server_key, endpoint = %endpoint, "sse session ready");

        Ok(Self {
            server_key: server_key.to_string(),
            client,
            endpoint,
            headers: headers.clone(),
            pending,
            alive,
            stream_task: Mutex::new(Some(task)),
            closed: AtomicBool::new(false),
        })
    }

    async fn post(&self, body: String) -> Result<()> {
        let mut req = self
            .client
            .post(self.endpoint.clone())
            .header("Content-Type", "application/json")
            .body(body);
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| Error::Connection(format!("sse POST failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Connection(format!(
                "sse POST returned HTTP {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl McpTransport for SseTransport {
    async fn request(
        &self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse> {
        let rx = self.pending.register(id.clone())?;
        let _guard = super::PendingGuard::new(&self.pending, id.clone());
        let req = JsonRpcRequest::new(id.clone(), method, params);
        tracing::debug!(server_key = %self.server_key, %id, method, "sending MCP request over sse");
        self.post(serde_json::to_string(&req)?).await?;
        await_response(rx).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notif = JsonRpcNotification::new(method, params);
        self.post(serde_json::to_string(&notif)?).await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.alive.store(false, Ordering::SeqCst);
        self.pending.close();
        if let Some(task) = self.stream_task.lock().take() {
            task.abort();
        }
    }
}

/// Consume the event stream: the first `endpoint` event resolves the POST
/// target, `message` events are routed into the correlation table.
fn spawn_event_router(
    server_key: String,
    resp: reqwest::Response,
    pending: Arc<PendingMap>,
    alive: Arc<AtomicBool>,
    endpoint_tx: tokio::sync::oneshot::Sender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut endpoint_tx = Some(endpoint_tx);
        let mut parser = SseEventParser::default();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!(server_key = %server_key, error = %e, "sse stream error");
                    break;
                }
            };
            for event in parser.push(&chunk) {
                match event.event.as_str() {
                    "endpoint" => {
                        if let Some(tx) = endpoint_tx.take() {
                            let _ = tx.send(event.data);
                        }
                    }
                    _ => match serde_json::from_str::<JsonRpcResponse>(&event.data) {
                        Ok(frame) => pending.complete(frame),
                        Err(_) => {
                            tracing::debug!(
                                server_key = %server_key,
                                data = %event.data,
                                "skipping non-response sse frame"
                            );
                        }
                    },
                }
            }
        }
        alive.store(false, Ordering::SeqCst);
        pending.close();
    })
}
