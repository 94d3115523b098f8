//! Streamable-HTTP transport: every request is a POST carrying one
//! JSON-RPC frame; the response body is either a plain JSON frame or a
//! short SSE stream containing it. Session affinity is kept through the
//! `Mcp-Session-Id` header when configured or assigned by the server.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;

use fleet_domain::error::{Error, Result};

use super::sse::SseEventParser;
use super::McpTransport;
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};

/// Header carrying the session id in both directions.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

#[derive(Debug)]
pub struct StreamableHttpTransport {
    server_key: String,
    url: reqwest::Url,
    client: reqwest::Client,
    headers: BTreeMap<String, String>,
    /// Sticky when configured; otherwise adopted from the server's first
    /// assignment, or absent for anonymous sessions.
    session_id: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl StreamableHttpTransport {
    pub fn new(
        server_key: &str,
        url: &str,
        session_id: Option<String>,
        headers: &BTreeMap<String, String>,
        client_name: &str,
    ) -> Result<Self> {
        let url = reqwest::Url::parse(url).map_err(|e| {
            Error::ConfigInvalid(format!("invalid streamable-http url `{url}`: {e}"))
        })?;
        let client = reqwest::Client::builder()
            .user_agent(format!("{client_name}/{}", crate::protocol::CLIENT_VERSION))
            .build()
            .map_err(|e| Error::Connection(format!("failed to build http client: {e}")))?;
        Ok(Self {
            server_key: server_key.to_string(),
            url,
            client,
            headers: headers.clone(),
            session_id: Mutex::new(session_id),
            closed: AtomicBool::new(false),
        })
    }

    fn build_post(&self, body: String) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(self.url.clone())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(body);
        if let Some(session) = self.session_id.lock().as_deref() {
            req = req.header(SESSION_HEADER, session);
        }
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }
        req
    }

    /// Adopt a server-assigned session id, but never clobber a configured
    /// (sticky) one.
    fn adopt_session(&self, resp: &reqwest::Response) {
        let mut current = self.session_id.lock();
        if current.is_some() {
            return;
        }
        if let Some(assigned) = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            tracing::debug!(
                server_key = %self.server_key,
                session_id = %assigned,
                "adopting server-assigned session"
            );
            *current = Some(assigned.to_string());
        }
    }
}

#[async_trait::async_trait]
impl McpTransport for StreamableHttpTransport {
    async fn request(
        &self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Connection("session is closed".into()));
        }
        let req = JsonRpcRequest::new(id.clone(), method, params);
        tracing::debug!(server_key = %self.server_key, %id, method, "sending MCP request over http");
        let resp = self
            .build_post(serde_json::to_string(&req)?)
            .send()
            .await
            .map_err(|e| Error::Connection(format!("http request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Connection(format!(
                "server returned HTTP {}",
                resp.status()
            )));
        }
        self.adopt_session(&resp);

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if content_type.starts_with("text/event-stream") {
            scan_stream_for_response(resp, &id).await
        } else {
            let body = resp
                .text()
                .await
                .map_err(|e| Error::Connection(format!("failed to read response body: {e}")))?;
            let frame: JsonRpcResponse = serde_json::from_str(&body).map_err(|e| {
                Error::Execution(format!("invalid JSON-RPC response body: {e}"))
            })?;
            Ok(frame)
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Connection("session is closed".into()));
        }
        let notif = JsonRpcNotification::new(method, params);
        let resp = self
            .build_post(serde_json::to_string(&notif)?)
            .send()
            .await
            .map_err(|e| Error::Connection(format!("http notification failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Connection(format!(
                "server returned HTTP {} to notification",
                resp.status()
            )));
        }
        self.adopt_session(&resp);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Read an SSE-bodied response until the frame matching `id` appears.
async fn scan_stream_for_response(
    resp: reqwest::Response,
    id: &RequestId,
) -> Result<JsonRpcResponse> {
    let mut parser = SseEventParser::default();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| Error::Connection(format!("response stream error: {e}")))?;
        for event in parser.push(&chunk) {
            if let Ok(frame) = serde_json::from_str::<JsonRpcResponse>(&event.data) {
                if &frame.id == id {
                    return Ok(frame);
                }
            }
        }
    }
    Err(Error::Connection(
        "response stream ended without a matching frame".into(),
    ))
}
