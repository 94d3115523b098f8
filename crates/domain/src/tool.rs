//! Tool-surface types consumed by the LLM runtime.
//!
//! The runtime sees three things: [`ToolDefinition`]s in the aggregated
//! catalog, plain JSON values (or [`ToolFailure`]s) from invocations, and
//! [`ProcessedResponse`]s standing in for oversized string results.
//! [`ToolExecution`] is the record every invocation writes to the metrics
//! sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Unified tool definition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One entry in the aggregated tool catalog, named `<serverKey>_<tool>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// Normalized JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<serde_json::Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Structured failure value
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The failure *value* an invocation returns to the runtime. Never thrown:
/// the runtime keeps going and the model sees a uniform error shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolFailure {
    /// Always `true`; present so the runtime can discriminate cheaply.
    pub error: bool,
    pub message: String,
    #[serde(rename = "toolName")]
    pub tool_name: String,
    #[serde(rename = "serverKey")]
    pub server_key: String,
}

impl ToolFailure {
    pub fn new(server_key: &str, tool_name: &str, err: &Error) -> Self {
        Self {
            error: true,
            message: err.to_string(),
            tool_name: tool_name.to_string(),
            server_key: server_key.to_string(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One tool invocation, as written to the metrics sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolExecution {
    pub server_key: String,
    pub tool_name: String,
    pub call_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_bytes: Option<u64>,
    /// The `type` field of a structured result, or the JSON type name of a
    /// plain value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_kind: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Oversized-response artifacts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Relative weight of a section, so the runtime can prune low-value tails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    High,
    Medium,
    Low,
}

/// One titled slice of a chunked response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Section {
    pub title: String,
    pub content: String,
    pub importance: Importance,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChunkMetadata {
    pub original_length: usize,
    pub processed_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Bounded structured replacement for an oversized string result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ProcessedResponse {
    #[serde(rename = "chunked_response")]
    Chunked {
        tool: String,
        summary: String,
        sections: Vec<Section>,
        metadata: ChunkMetadata,
    },
    /// Fallback when normalization itself fails: a hard prefix cut.
    #[serde(rename = "truncated_response")]
    Truncated {
        tool: String,
        content: String,
        note: String,
        original_length: usize,
    },
}

impl ProcessedResponse {
    /// Total characters across section content (or truncated content).
    pub fn processed_length(&self) -> usize {
        match self {
            ProcessedResponse::Chunked { sections, .. } => {
                sections.iter().map(|s| s.content.len()).sum()
            }
            ProcessedResponse::Truncated { content, .. } => content.len(),
        }
    }
}
