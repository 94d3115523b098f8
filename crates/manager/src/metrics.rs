//! Write-only metrics sink.
//!
//! Invocation and connection events are recorded fire-and-forget; a sink
//! must never fail or block the calling path. Persistent storage is
//! somebody else's problem — the default sink just emits structured
//! tracing events.

use parking_lot::Mutex;

use fleet_domain::status::ServerStatus;
use fleet_domain::tool::ToolExecution;

/// Receives execution and connection records.
pub trait MetricsSink: Send + Sync {
    fn record_execution(&self, exec: ToolExecution);
    fn record_connection(&self, server_key: &str, status: ServerStatus);
}

/// Default sink: structured tracing events only.
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record_execution(&self, exec: ToolExecution) {
        tracing::info!(
            server_key = %exec.server_key,
            tool_name = %exec.tool_name,
            call_id = %exec.call_id,
            duration_ms = exec.duration_ms,
            success = exec.success,
            error_kind = exec.error_kind.as_deref().unwrap_or(""),
            output_bytes = exec.output_bytes.unwrap_or(0),
            "tool execution"
        );
    }

    fn record_connection(&self, server_key: &str, status: ServerStatus) {
        tracing::info!(server_key = %server_key, status = %status, "server connection event");
    }
}

/// In-memory sink for tests and introspection.
#[derive(Default)]
pub struct MemoryMetrics {
    pub executions: Mutex<Vec<ToolExecution>>,
    pub connections: Mutex<Vec<(String, ServerStatus)>>,
}

impl MetricsSink for MemoryMetrics {
    fn record_execution(&self, exec: ToolExecution) {
        self.executions.lock().push(exec);
    }

    fn record_connection(&self, server_key: &str, status: ServerStatus) {
        self.connections.lock().push((server_key.to_string(), status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn memory_sink_records_in_order() {
        let sink = MemoryMetrics::default();
        sink.record_connection("s1", ServerStatus::Connected);
        sink.record_execution(ToolExecution {
            server_key: "s1".into(),
            tool_name: "ping".into(),
            call_id: "c1".into(),
            started_at: Utc::now(),
            duration_ms: 4,
            success: true,
            error_kind: None,
            error_message: None,
            input_bytes: Some(2),
            output_bytes: Some(4),
            output_kind: Some("string".into()),
        });
        assert_eq!(sink.connections.lock().len(), 1);
        assert_eq!(sink.executions.lock()[0].tool_name, "ping");
    }
}
