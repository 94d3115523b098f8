//! Per-server status projections.
//!
//! [`ManagedServerInfo`] is the shape written to the status cache and
//! returned by read-only status APIs; it deliberately carries no live
//! handles so it can cross process boundaries as JSON.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status & transport discriminators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle state of one managed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Uninitialized,
    Initializing,
    Connected,
    NoToolsFound,
    Error,
    Disabled,
}

impl ServerStatus {
    /// Whether a client in this state may expose tools or accept calls.
    pub fn is_operational(&self) -> bool {
        matches!(self, ServerStatus::Connected)
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServerStatus::Uninitialized => "uninitialized",
            ServerStatus::Initializing => "initializing",
            ServerStatus::Connected => "connected",
            ServerStatus::NoToolsFound => "no_tools_found",
            ServerStatus::Error => "error",
            ServerStatus::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// Which driver a server is reached through. Serialized with the same
/// strings as the `transport.type` config tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportType {
    Stdio,
    Sse,
    StreamableHttp,
}

impl TransportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::Stdio => "stdio",
            TransportType::Sse => "sse",
            TransportType::StreamableHttp => "streamable-http",
        }
    }
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool descriptor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single tool as advertised by an MCP server via `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for the tool's arguments. Servers may omit it; the
    /// aggregator substitutes an empty object schema.
    #[serde(
        default,
        rename = "inputSchema",
        skip_serializing_if = "Option::is_none"
    )]
    pub input_schema: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<serde_json::Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cached projection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The cached, process-crossing view of one managed server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedServerInfo {
    pub key: String,
    pub label: String,
    pub status: ServerStatus,
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    pub transport_type: TransportType,
}

impl ManagedServerInfo {
    /// Synthetic entry for a key the cache knows nothing about.
    pub fn uninitialized(key: &str) -> Self {
        Self {
            key: key.to_string(),
            label: key.to_string(),
            status: ServerStatus::Uninitialized,
            tools: Vec::new(),
            error_details: None,
            transport_type: TransportType::Stdio,
        }
    }

    /// Synthetic entry returned when the cache itself cannot be reached.
    pub fn cache_unavailable(key: &str) -> Self {
        Self {
            error_details: Some("cache unavailable".to_string()),
            ..Self::uninitialized(key)
        }
    }
}
