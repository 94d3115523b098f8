//! End-to-end manager tests against a scripted stdio MCP server.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use fleet_domain::status::ServerStatus;
use fleet_manager::metrics::MemoryMetrics;
use fleet_manager::{Manager, ManagerOptions, StatusCache};

/// A minimal MCP server in shell: answers the handshake, one `tools/list`
/// (id 1) and one `tools/call` (id 2).
const SCRIPTED_SERVER: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"initialize"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":"init","result":{"protocolVersion":"2024-11-05"}}' ;;
    *'"tools/list"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"tools":[{"name":"ping","description":"Reply with pong"}]}}' ;;
    *'"tools/call"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"pong"}]}}' ;;
  esac
done
"#;

fn write_config(dir: &tempfile::TempDir, servers: serde_json::Value) {
    let doc = json!({ "mcpServers": servers });
    std::fs::write(
        dir.path().join("config.json"),
        serde_json::to_string_pretty(&doc).unwrap(),
    )
    .unwrap();
}

fn scripted_server_entry() -> serde_json::Value {
    json!({
        "transport": {
            "type": "stdio",
            "command": "sh",
            "args": ["-c", SCRIPTED_SERVER]
        },
        "retry": { "maxRetries": 1, "baseDelayMs": 1 },
        "timeoutMs": 5000
    })
}

async fn start_manager(dir: &tempfile::TempDir) -> (Arc<Manager>, Arc<MemoryMetrics>) {
    let options = ManagerOptions {
        config_dir: dir.path().to_path_buf(),
        poll_interval: Duration::from_secs(60),
        watch_config: false,
        ..ManagerOptions::default()
    };
    let metrics = Arc::new(MemoryMetrics::default());
    let manager = Manager::start_with(
        options,
        Arc::new(StatusCache::disabled()),
        metrics.clone(),
    )
    .await
    .unwrap();
    (manager, metrics)
}

/// Wait until every registered client's init has settled.
async fn settle(manager: &Manager) {
    for (_, client) in manager.registry().clients().await {
        client.status().await;
    }
}

#[tokio::test]
async fn disabled_server_reports_status_without_spawning() {
    let dir = tempfile::tempdir().unwrap();
    write_config(&dir, json!({ "s1": { "disabled": true, "command": "x" } }));
    let (manager, _metrics) = start_manager(&dir).await;

    let infos = manager.managed_servers_info().await;
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].key, "s1");
    assert_eq!(infos[0].status, ServerStatus::Disabled);
    assert!(infos[0].tools.is_empty());
    assert_eq!(infos[0].transport_type.as_str(), "stdio");

    // Disabled servers never get a client (and thus no child process).
    assert!(manager.registry().clients().await.is_empty());
    manager.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn stdio_happy_path_aggregates_and_invokes() {
    let dir = tempfile::tempdir().unwrap();
    write_config(&dir, json!({ "s1": scripted_server_entry() }));
    let (manager, metrics) = start_manager(&dir).await;
    settle(&manager).await;

    let tools = manager.unified_tools().await;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].definition.name, "s1_ping");
    assert_eq!(tools[0].definition.parameters["type"], "object");
    assert_eq!(tools[0].server_key, "s1");

    let out = manager.call_tool("s1_ping", json!({})).await;
    assert_eq!(out, json!("pong"));

    let recorded = metrics.executions.lock();
    assert_eq!(recorded.len(), 1);
    assert!(recorded[0].success);
    assert_eq!(recorded[0].output_kind.as_deref(), Some("string"));
    drop(recorded);

    manager.shutdown().await;
}

#[tokio::test]
async fn unknown_tool_returns_structured_failure() {
    let dir = tempfile::tempdir().unwrap();
    write_config(&dir, json!({}));
    let (manager, _metrics) = start_manager(&dir).await;

    let out = manager.call_tool("nope_tool", json!({})).await;
    assert_eq!(out["error"], true);
    assert_eq!(out["toolName"], "nope_tool");
    manager.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn invalid_and_failing_servers_do_not_break_the_manager() {
    let dir = tempfile::tempdir().unwrap();
    write_config(
        &dir,
        json!({
            "broken": { "label": "no transport at all" },
            "dead": {
                "command": "/usr/bin/this_binary_does_not_exist_fleet_test",
                "retry": { "maxRetries": 1, "baseDelayMs": 1 },
                "timeoutMs": 1000
            },
            "ok": scripted_server_entry()
        }),
    );
    let (manager, _metrics) = start_manager(&dir).await;
    settle(&manager).await;

    let infos = manager.managed_servers_info().await;
    let by_key = |k: &str| infos.iter().find(|i| i.key == k).unwrap();
    assert_eq!(by_key("broken").status, ServerStatus::Error);
    assert_eq!(by_key("dead").status, ServerStatus::Error);
    assert_eq!(by_key("ok").status, ServerStatus::Connected);

    // Only the healthy server contributes tools.
    let tools = manager.unified_tools().await;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].definition.name, "ok_ping");
    manager.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn hot_reload_applies_adds_disables_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    write_config(&dir, json!({ "s1": scripted_server_entry() }));
    let (manager, _metrics) = start_manager(&dir).await;
    settle(&manager).await;
    assert_eq!(manager.unified_tools().await.len(), 1);

    // Admin disables s1 and adds s2.
    let mut disabled = scripted_server_entry();
    disabled["enabled"] = json!(false);
    write_config(&dir, json!({ "s1": disabled, "s2": scripted_server_entry() }));

    let summary = manager.reload().await;
    assert_eq!(summary.added, vec!["s2".to_string()]);
    assert_eq!(summary.modified, vec!["s1".to_string()]);
    settle(&manager).await;

    let infos = manager.managed_servers_info().await;
    let s1 = infos.iter().find(|i| i.key == "s1").unwrap();
    assert_eq!(s1.status, ServerStatus::Disabled);
    let tools = manager.unified_tools().await;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].definition.name, "s2_ping");

    // Reloading the unchanged file is a no-op.
    assert!(manager.reload().await.is_empty());
    manager.shutdown().await;
}
