//! Defaults and legacy-shape coverage for the on-disk config document.

use fleet_domain::config::{AppConfig, RetryPolicy, Transport};
use fleet_domain::status::TransportType;

#[test]
fn empty_document_has_no_servers() {
    let config = AppConfig::from_json("{}").unwrap();
    assert!(config.mcp_servers.is_empty());
}

#[test]
fn server_defaults() {
    let config = AppConfig::from_json(
        r#"{ "mcpServers": { "fs": { "command": "npx", "args": ["-y", "server-filesystem"] } } }"#,
    )
    .unwrap();
    let fs = &config.mcp_servers["fs"];
    assert!(fs.enabled);
    assert!(fs.label.is_none());
    assert!(fs.retry.is_none());
    assert!(fs.timeout_ms.is_none());
    assert_eq!(fs.transport_type(), TransportType::Stdio);
    assert_eq!(fs.retry_policy(), RetryPolicy::default());
}

#[test]
fn all_three_transport_shapes_parse() {
    let config = AppConfig::from_json(
        r#"{ "mcpServers": {
            "local":  { "transport": { "type": "stdio", "command": "echo-mcp" } },
            "remote": { "transport": { "type": "sse", "url": "https://h/sse" } },
            "stream": { "transport": { "type": "streamable-http",
                                       "url": "https://h/mcp",
                                       "sessionId": "s-9" } }
        } }"#,
    )
    .unwrap();
    assert_eq!(
        config.mcp_servers["local"].transport_type(),
        TransportType::Stdio
    );
    assert_eq!(
        config.mcp_servers["remote"].transport_type(),
        TransportType::Sse
    );
    match config.mcp_servers["stream"].transport.as_ref().unwrap() {
        Transport::StreamableHttp { session_id, .. } => {
            assert_eq!(session_id.as_deref(), Some("s-9"));
        }
        other => panic!("expected streamable-http, got {other:?}"),
    }
}

#[test]
fn mixed_legacy_and_canonical_entries_coexist() {
    let config = AppConfig::from_json(
        r#"{ "mcpServers": {
            "old": { "transportType": "sse", "url": "https://h/sse" },
            "new": { "transport": { "type": "sse", "url": "https://h/sse" } }
        } }"#,
    )
    .unwrap();
    assert_eq!(
        config.mcp_servers["old"].transport,
        config.mcp_servers["new"].transport
    );
}

#[test]
fn document_round_trips_through_serialization() {
    let config = AppConfig::from_json(
        r#"{ "mcpServers": {
            "a": { "command": "x", "env": { "K": "v" }, "timeoutMs": 9000 },
            "b": { "disabled": true, "url": "https://h/sse" }
        } }"#,
    )
    .unwrap();
    let json = serde_json::to_string(&config).unwrap();
    let reparsed = AppConfig::from_json(&json).unwrap();
    assert_eq!(config, reparsed);
}
