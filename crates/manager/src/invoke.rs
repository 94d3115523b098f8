//! Invocation wrapper: everything that happens around one tool call.
//!
//! Validates arguments against any config-registered schema, routes to the
//! owning client, normalizes oversized string results, records a
//! [`ToolExecution`] and converts every error into a structured
//! [`ToolFailure`] *value* — the runtime never sees a thrown error.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use fleet_domain::error::{Error, Result};
use fleet_domain::tool::{ToolExecution, ToolFailure};

use crate::metrics::MetricsSink;
use crate::normalize::{process_response, LARGE_RESPONSE_THRESHOLD};
use crate::registry::Registry;

pub struct InvocationWrapper {
    registry: Arc<Registry>,
    metrics: Arc<dyn MetricsSink>,
}

impl InvocationWrapper {
    pub fn new(registry: Arc<Registry>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { registry, metrics }
    }

    /// Execute one tool call end to end. Always returns a value: the
    /// (possibly normalized) result, or a [`ToolFailure`].
    pub async fn execute(
        &self,
        server_key: &str,
        tool_name: &str,
        arguments: Value,
        call_id: Option<String>,
    ) -> Value {
        let started_at = Utc::now();
        let clock = Instant::now();
        let call_id = call_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let input_bytes = serde_json::to_vec(&arguments)
            .map(|b| b.len() as u64)
            .ok();

        let outcome = self.run(server_key, tool_name, &arguments).await;
        let duration_ms = clock.elapsed().as_millis() as u64;

        match outcome {
            Ok(value) => {
                let shaped = postprocess(tool_name, value);
                self.metrics.record_execution(ToolExecution {
                    server_key: server_key.to_string(),
                    tool_name: tool_name.to_string(),
                    call_id,
                    started_at,
                    duration_ms,
                    success: true,
                    error_kind: None,
                    error_message: None,
                    input_bytes,
                    output_bytes: Some(value_bytes(&shaped)),
                    output_kind: Some(value_kind(&shaped)),
                });
                shaped
            }
            Err(e) => {
                tracing::warn!(
                    server_key = %server_key,
                    tool_name = %tool_name,
                    error = %e,
                    "tool call failed"
                );
                self.metrics.record_execution(ToolExecution {
                    server_key: server_key.to_string(),
                    tool_name: tool_name.to_string(),
                    call_id,
                    started_at,
                    duration_ms,
                    success: false,
                    error_kind: Some(e.kind().as_str().to_string()),
                    error_message: Some(e.to_string()),
                    input_bytes,
                    output_bytes: None,
                    output_kind: None,
                });
                failure_value(server_key, tool_name, &e)
            }
        }
    }

    async fn run(&self, server_key: &str, tool_name: &str, arguments: &Value) -> Result<Value> {
        // Schema gate first: a registered schema refuses bad arguments
        // before any transport I/O happens.
        if let Some(config) = self.registry.config_for(server_key).await {
            if let Some(schema) = config.schemas.get(tool_name) {
                validate_arguments(tool_name, schema, arguments)?;
            }
        }

        let entry = self
            .registry
            .get(server_key)
            .await
            .ok_or_else(|| Error::Connection(format!("unknown server `{server_key}`")))?;
        let client = entry.as_client().ok_or_else(|| {
            Error::Connection(format!("server `{server_key}` has no active client"))
        })?;
        client.invoke(tool_name, arguments.clone()).await
    }
}

/// Check `arguments` against a JSON Schema from the config.
fn validate_arguments(tool_name: &str, schema: &Value, arguments: &Value) -> Result<()> {
    let validator = jsonschema::validator_for(schema).map_err(|e| {
        Error::SchemaValidation(format!("unusable schema for `{tool_name}`: {e}"))
    })?;
    let errors: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| e.to_string())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::SchemaValidation(format!(
            "arguments for `{tool_name}` rejected: {}",
            errors.join("; ")
        )))
    }
}

/// Size-driven normalization: oversized string results become a
/// structured chunked response; everything else passes through.
pub(crate) fn postprocess(tool_name: &str, value: Value) -> Value {
    if let Value::String(s) = &value {
        if s.len() >= LARGE_RESPONSE_THRESHOLD {
            let processed = process_response(tool_name, s);
            if let Ok(structured) = serde_json::to_value(&processed) {
                return structured;
            }
        }
    }
    value
}

fn failure_value(server_key: &str, tool_name: &str, err: &Error) -> Value {
    serde_json::to_value(ToolFailure::new(server_key, tool_name, err))
        .unwrap_or_else(|_| Value::String(err.to_string()))
}

fn value_bytes(value: &Value) -> u64 {
    match value {
        Value::String(s) => s.len() as u64,
        other => serde_json::to_vec(other).map(|b| b.len()).unwrap_or(0) as u64,
    }
}

/// The `type` field of a structured result, or the JSON type name.
fn value_kind(value: &Value) -> String {
    if let Some(tag) = value.get("type").and_then(Value::as_str) {
        return tag.to_string();
    }
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
