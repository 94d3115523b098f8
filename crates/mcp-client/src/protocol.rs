//! JSON-RPC 2.0 types for the MCP protocol.
//!
//! Each message is a single line of JSON (newline-delimited on stdio; the
//! HTTP drivers carry the same frames in request/response bodies).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use fleet_domain::status::ToolDescriptor;

/// Protocol revision sent in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Version reported in `clientInfo`.
pub const CLIENT_VERSION: &str = "1.0.0";

/// The id of the `initialize` request. Fixed so a session's first frame is
/// recognizable in logs and traces.
pub const INIT_REQUEST_ID: &str = "init";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request ids
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSON-RPC allows string or numeric ids; the handshake uses the string
/// `"init"`, everything else uses fresh numeric ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Num(u64),
    Str(String),
}

impl RequestId {
    pub fn init() -> Self {
        RequestId::Str(INIT_REQUEST_ID.to_string())
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        RequestId::Num(n)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Num(n) => write!(f, "{n}"),
            RequestId::Str(s) => f.write_str(s),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A JSON-RPC 2.0 request (has an `id` — expects a response).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification (no `id` — fire-and-forget).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Check if the response represents an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Extract the result value, returning an error if the response is an error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP-specific payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Client info sent during `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Parameters for the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

/// Build the `initialize` request parameters.
pub fn initialize_params(client_name: &str) -> InitializeParams {
    InitializeParams {
        protocol_version: PROTOCOL_VERSION.into(),
        capabilities: serde_json::json!({ "tools": {} }),
        client_info: ClientInfo {
            name: client_name.into(),
            version: CLIENT_VERSION.into(),
        },
    }
}

/// The result payload from `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

/// The result payload from `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Content collapsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Collapse a `tools/call` content array into the value handed to the
/// runtime:
/// - exactly one text part → its text as a plain string;
/// - several parts → text parts joined with blank lines, images rendered
///   as `[Image: …]` markers, anything else JSON-stringified;
/// - no parts → the raw content value, unchanged.
pub fn collapse_tool_content(content: &Value) -> Value {
    let Some(parts) = content.as_array() else {
        return content.clone();
    };
    if parts.is_empty() {
        return content.clone();
    }

    let text_parts: Vec<&str> = parts
        .iter()
        .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    if text_parts.len() == 1 && parts.len() == 1 {
        return Value::String(text_parts[0].to_string());
    }

    let rendered: Vec<String> = parts
        .iter()
        .map(|part| match part.get("type").and_then(Value::as_str) {
            Some("text") => part
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            Some("image") => {
                let label = part
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .unwrap_or("binary");
                format!("[Image: {label}]")
            }
            _ => part.to_string(),
        })
        .collect();
    Value::String(rendered.join("\n\n"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serialize_request_with_string_id() {
        let req = JsonRpcRequest::new(
            RequestId::init(),
            "initialize",
            Some(json!({ "protocolVersion": PROTOCOL_VERSION })),
        );
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":\"init\""));
        assert!(json.contains("\"method\":\"initialize\""));
    }

    #[test]
    fn serialize_request_with_numeric_id() {
        let req = JsonRpcRequest::new(7u64, "tools/call", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"id\":7"));
        assert!(!json.contains("params"));
    }

    #[test]
    fn serialize_notification_has_no_id() {
        let notif = JsonRpcNotification::new("notifications/initialized", Some(json!({})));
        let json = serde_json::to_string(&notif).unwrap();
        assert!(json.contains("\"method\":\"notifications/initialized\""));
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn deserialize_success_response() {
        let raw = r#"{"jsonrpc":"2.0","id":"init","result":{"capabilities":{}}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.id, RequestId::init());
        assert!(!resp.is_error());
        assert!(resp.into_result().unwrap().get("capabilities").is_some());
    }

    #[test]
    fn deserialize_error_response() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"Invalid request"}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        assert!(resp.is_error());
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, -32600);
        assert_eq!(err.message, "Invalid request");
    }

    #[test]
    fn deserialize_tools_list_result() {
        let raw = r#"{
            "tools": [
                {
                    "name": "read_file",
                    "description": "Read a file",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "path": { "type": "string" } }
                    }
                }
            ]
        }"#;
        let result: ToolsListResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.tools.len(), 1);
        assert_eq!(result.tools[0].name, "read_file");
        assert!(result.tools[0].input_schema.is_some());
    }

    #[test]
    fn call_result_defaults() {
        let result: CallToolResult = serde_json::from_str("{}").unwrap();
        assert!(!result.is_error);
        assert!(result.content.is_none());

        let raw = r#"{ "content": [{"type":"text","text":"hi"}], "isError": true }"#;
        let result: CallToolResult = serde_json::from_str(raw).unwrap();
        assert!(result.is_error);
    }

    #[test]
    fn collapse_single_text_part_returns_bare_string() {
        let content = json!([{ "type": "text", "text": "file contents" }]);
        assert_eq!(collapse_tool_content(&content), json!("file contents"));
    }

    #[test]
    fn collapse_joins_mixed_parts() {
        let content = json!([
            { "type": "text", "text": "before" },
            { "type": "image", "mimeType": "image/png", "data": "…" },
            { "type": "text", "text": "after" }
        ]);
        let collapsed = collapse_tool_content(&content);
        let s = collapsed.as_str().unwrap();
        assert_eq!(s, "before\n\n[Image: image/png]\n\nafter");
    }

    #[test]
    fn collapse_stringifies_unknown_parts() {
        let content = json!([
            { "type": "text", "text": "t" },
            { "type": "resource", "uri": "file:///x" }
        ]);
        let s = collapse_tool_content(&content);
        assert!(s.as_str().unwrap().contains("file:///x"));
    }

    #[test]
    fn collapse_empty_array_passes_through() {
        let content = json!([]);
        assert_eq!(collapse_tool_content(&content), content);
    }

    #[test]
    fn initialize_params_shape() {
        let params = initialize_params("mcp-fleet");
        assert_eq!(params.protocol_version, "2024-11-05");
        assert_eq!(params.client_info.version, "1.0.0");
        let json = serde_json::to_value(&params).unwrap();
        assert!(json["capabilities"]["tools"].is_object());
        assert_eq!(json["clientInfo"]["name"], "mcp-fleet");
    }

    #[test]
    fn request_id_round_trip() {
        let req = JsonRpcRequest::new(42u64, "tools/call", Some(json!({"name": "t"})));
        let parsed: JsonRpcRequest =
            serde_json::from_str(&serde_json::to_string(&req).unwrap()).unwrap();
        assert_eq!(req, parsed);
    }
}
