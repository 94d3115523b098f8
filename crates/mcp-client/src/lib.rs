//! `fleet-mcp-client` — per-server MCP client for MCP Fleet.
//!
//! This crate provides:
//! - JSON-RPC 2.0 protocol types for communicating with MCP servers.
//! - Three transport drivers (stdio child process, SSE, streamable-HTTP)
//!   behind one [`transport::McpTransport`] trait, all correlating
//!   responses to requests by id.
//! - A [`client::ManagedClient`] that owns one transport, connects in the
//!   background with retry/backoff, and exposes `status` / `tools` /
//!   `invoke` / `health_check` / `close`.
//! - A per-client [`breaker::CircuitBreaker`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use fleet_mcp_client::client::ManagedClient;
//!
//! let client = ManagedClient::spawn("search", config, "mcp-fleet", None);
//! let tools = client.tools().await;          // waits for init to settle
//! let out = client.invoke("web_search", serde_json::json!({"q": "rust"})).await?;
//! client.close().await;
//! ```

pub mod breaker;
pub mod client;
pub mod protocol;
pub mod retry;
pub mod transport;

pub use breaker::{CircuitBreaker, CircuitState};
pub use client::{ManagedClient, StatusSink};
pub use protocol::RequestId;
pub use transport::McpTransport;
