//! Stdio transport: spawn a child process and speak newline-delimited
//! JSON-RPC over its stdin/stdout, with stderr monitored for fatal output.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::task::JoinHandle;

use fleet_domain::config::StderrMode;
use fleet_domain::error::{Error, Result};

use super::{await_response, McpTransport, PendingMap};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};

/// Maximum number of non-JSON lines to skip before declaring the server
/// broken (a misconfigured server logging to stdout would otherwise spin
/// the reader forever).
const MAX_SKIP_LINES: usize = 1000;

/// How many recent stderr lines to retain for diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// Stderr substrings that mark the session unhealthy.
const FATAL_STDERR_PATTERNS: &[&str] = &["fatal", "cannot start", "permission denied"];

/// Grace period between closing stdin and killing the child.
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StdioTransport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stdio transport: one child process, one reader task feeding a
/// correlation table, one optional stderr monitor.
pub struct StdioTransport {
    server_key: String,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    child: tokio::sync::Mutex<Option<Child>>,
    pending: Arc<PendingMap>,
    alive: Arc<AtomicBool>,
    fatal_stderr: Arc<AtomicBool>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    stderr_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl StdioTransport {
    /// Spawn the child and wire up reader/stderr tasks.
    pub fn spawn(
        server_key: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        cwd: Option<&Path>,
        stderr_mode: StderrMode,
    ) -> Result<Self> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            // The child must not outlive an aborted connect attempt.
            .kill_on_drop(true);
        match stderr_mode {
            StderrMode::Pipe => {
                cmd.stderr(std::process::Stdio::piped());
            }
            StderrMode::Inherit => {
                cmd.stderr(std::process::Stdio::inherit());
            }
            StderrMode::Ignore => {
                cmd.stderr(std::process::Stdio::null());
            }
        }

        // Node-based servers on Linux need these before the configured env
        // so explicit entries still win.
        #[cfg(target_os = "linux")]
        {
            cmd.env("NODE_TLS_REJECT_UNAUTHORIZED", "0");
            if let Ok(registry) = std::env::var("NPM_CONFIG_REGISTRY") {
                cmd.env("NPM_CONFIG_REGISTRY", registry);
            }
        }

        for (key, value) in env {
            cmd.env(key, value);
        }
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            Error::Connection(format!("failed to spawn `{command}`: {e}"))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            Error::Connection("failed to capture child stdin".into())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            Error::Connection("failed to capture child stdout".into())
        })?;

        let pending = Arc::new(PendingMap::new());
        let alive = Arc::new(AtomicBool::new(true));
        let reader = spawn_frame_reader(
            server_key.to_string(),
            stdout,
            Arc::clone(&pending),
            Arc::clone(&alive),
        );

        let fatal_stderr = Arc::new(AtomicBool::new(false));
        let stderr_tail = Arc::new(Mutex::new(VecDeque::new()));
        let stderr_task = child.stderr.take().map(|stderr| {
            spawn_stderr_monitor(
                server_key.to_string(),
                stderr,
                Arc::clone(&fatal_stderr),
                Arc::clone(&stderr_tail),
            )
        });

        Ok(Self {
            server_key: server_key.to_string(),
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            child: tokio::sync::Mutex::new(Some(child)),
            pending,
            alive,
            fatal_stderr,
            stderr_tail,
            reader_task: Mutex::new(Some(reader)),
            stderr_task: Mutex::new(stderr_task),
            closed: AtomicBool::new(false),
        })
    }

    /// Recent stderr output, for error details.
    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr_tail.lock().iter().cloned().collect()
    }

    async fn write_line(&self, json: &str) -> Result<()> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(Error::Connection(format!(
                "server `{}` process has exited",
                self.server_key
            )));
        }
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| {
            Error::Connection("stdin already closed".into())
        })?;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl McpTransport for StdioTransport {
    async fn request(
        &self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse> {
        let rx = self.pending.register(id.clone())?;
        let _guard = super::PendingGuard::new(&self.pending, id.clone());
        let req = JsonRpcRequest::new(id.clone(), method, params);
        let json = serde_json::to_string(&req)?;
        tracing::debug!(server_key = %self.server_key, %id, method, "sending MCP request");
        self.write_line(&json).await?;
        await_response(rx).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notif = JsonRpcNotification::new(method, params);
        let json = serde_json::to_string(&notif)?;
        tracing::debug!(server_key = %self.server_key, method, "sending MCP notification");
        self.write_line(&json).await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.fatal_stderr.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.alive.store(false, Ordering::SeqCst);
        self.pending.close();

        // Closing stdin is the graceful exit signal for stdio servers.
        {
            let mut guard = self.stdin.lock().await;
            if let Some(mut stdin) = guard.take() {
                if let Err(e) = stdin.shutdown().await {
                    tracing::debug!(
                        server_key = %self.server_key,
                        error = %e,
                        "error closing child stdin"
                    );
                }
            }
        }

        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(server_key = %self.server_key, ?status, "child exited");
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        server_key = %self.server_key,
                        error = %e,
                        "error waiting for child"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        server_key = %self.server_key,
                        "child did not exit within grace period, killing"
                    );
                    if let Err(e) = child.kill().await {
                        tracing::warn!(
                            server_key = %self.server_key,
                            error = %e,
                            "failed to kill child"
                        );
                    }
                }
            }
        }

        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.stderr_task.lock().take() {
            task.abort();
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reader tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read newline-delimited frames from `stream`, routing responses into the
/// correlation table. Generic over the stream so framing is testable with
/// in-memory pipes.
fn spawn_frame_reader<R>(
    server_key: String,
    stream: R,
    pending: Arc<PendingMap>,
    alive: Arc<AtomicBool>,
) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        let mut skipped = 0usize;
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    tracing::debug!(server_key = %server_key, "child stdout closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(server_key = %server_key, error = %e, "stdout read error");
                    break;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !trimmed.starts_with('{') {
                skipped += 1;
                tracing::debug!(server_key = %server_key, line = %trimmed, "skipping non-JSON stdout line");
                if skipped >= MAX_SKIP_LINES {
                    tracing::warn!(
                        server_key = %server_key,
                        "too many non-JSON lines on stdout, giving up"
                    );
                    break;
                }
                continue;
            }
            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) => pending.complete(resp),
                // Server-initiated notifications and requests have no `id`
                // we are waiting on; skip them.
                Err(_) => {
                    tracing::debug!(
                        server_key = %server_key,
                        line = %trimmed,
                        "skipping non-response frame"
                    );
                }
            }
        }
        alive.store(false, Ordering::SeqCst);
        pending.close();
    })
}

/// Tail stderr and flag fatal output.
fn spawn_stderr_monitor<R>(
    server_key: String,
    stream: R,
    fatal: Arc<AtomicBool>,
    tail: Arc<Mutex<VecDeque<String>>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let lower = line.to_lowercase();
            if FATAL_STDERR_PATTERNS.iter().any(|p| lower.contains(p)) {
                tracing::warn!(server_key = %server_key, line = %line, "fatal stderr output");
                fatal.store(true, Ordering::SeqCst);
            }
            let mut tail = tail.lock();
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn frame_reader_routes_by_id_and_skips_noise() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let pending = Arc::new(PendingMap::new());
        let alive = Arc::new(AtomicBool::new(true));
        let _task = spawn_frame_reader("s1".into(), rx, Arc::clone(&pending), Arc::clone(&alive));

        let waiter = pending.register(RequestId::Num(7)).unwrap();
        tx.write_all(b"starting up...\n").await.unwrap();
        tx.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\",\"params\":{}}\n")
            .await
            .unwrap();
        tx.write_all(b"{\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{\"ok\":true}}\n")
            .await
            .unwrap();

        let resp = await_response(waiter).await.unwrap();
        assert_eq!(resp.id, RequestId::Num(7));
        assert_eq!(resp.result.unwrap()["ok"], true);
        assert!(alive.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn frame_reader_handles_partial_writes() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let pending = Arc::new(PendingMap::new());
        let alive = Arc::new(AtomicBool::new(true));
        let _task = spawn_frame_reader("s1".into(), rx, Arc::clone(&pending), Arc::clone(&alive));

        let waiter = pending.register(RequestId::init()).unwrap();
        // Frame split across writes; the reader must buffer until newline.
        tx.write_all(b"{\"jsonrpc\":\"2.0\",\"id\":\"in").await.unwrap();
        tx.flush().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        tx.write_all(b"it\",\"result\":{}}\n").await.unwrap();

        let resp = await_response(waiter).await.unwrap();
        assert_eq!(resp.id, RequestId::init());
    }

    #[tokio::test]
    async fn eof_rejects_outstanding_waiters() {
        let (tx, rx) = tokio::io::duplex(64);
        let pending = Arc::new(PendingMap::new());
        let alive = Arc::new(AtomicBool::new(true));
        let _task = spawn_frame_reader("s1".into(), rx, Arc::clone(&pending), Arc::clone(&alive));

        let waiter = pending.register(RequestId::Num(1)).unwrap();
        drop(tx);
        let err = await_response(waiter).await.unwrap_err();
        assert_eq!(err.kind(), fleet_domain::ErrorKind::Aborted);
        // Give the reader task a beat to flip the flag.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!alive.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stderr_monitor_flags_fatal_output() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let fatal = Arc::new(AtomicBool::new(false));
        let tail = Arc::new(Mutex::new(VecDeque::new()));
        let _task =
            spawn_stderr_monitor("s1".into(), rx, Arc::clone(&fatal), Arc::clone(&tail));

        tx.write_all(b"warming caches\n").await.unwrap();
        tx.write_all(b"FATAL: cannot bind socket\n").await.unwrap();
        drop(tx);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(fatal.load(Ordering::SeqCst));
        assert_eq!(tail.lock().len(), 2);
    }

    #[tokio::test]
    async fn spawn_nonexistent_command_fails_cleanly() {
        let result = StdioTransport::spawn(
            "bad",
            "/usr/bin/this_binary_does_not_exist_fleet_test",
            &[],
            &BTreeMap::new(),
            None,
            StderrMode::Pipe,
        );
        let err = result.err().expect("spawn should fail");
        assert_eq!(err.kind(), fleet_domain::ErrorKind::ConnectionError);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_terminates_child() {
        let transport = StdioTransport::spawn(
            "cat",
            "cat",
            &[],
            &BTreeMap::new(),
            None,
            StderrMode::Ignore,
        )
        .expect("cat should spawn");
        assert!(transport.is_alive());

        transport.shutdown().await;
        transport.shutdown().await;
        assert!(!transport.is_alive());

        // Requests after shutdown are refused without touching the pipe.
        let err = transport
            .request(RequestId::Num(1), "tools/list", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), fleet_domain::ErrorKind::ConnectionError);
    }
}
