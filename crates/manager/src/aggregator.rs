//! Tool aggregation: one namespaced catalog across every connected server.
//!
//! Each tool of server `key` is exposed as `<key>_<toolName>`. Keys are
//! unique, so cross-server collisions cannot happen; duplicates within one
//! server keep the first definition. Advertised schemas are normalized
//! into well-formed object schemas before reaching the runtime.

use std::collections::HashSet;

use serde_json::{json, Map, Value};

use fleet_domain::status::ServerStatus;
use fleet_domain::tool::ToolDefinition;

use crate::registry::Registry;

/// One aggregated tool plus its routing information.
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedTool {
    pub definition: ToolDefinition,
    pub server_key: String,
    pub tool_name: String,
}

/// Build the unified catalog from every connected client. Servers that are
/// not `connected` (or advertise no tools) contribute nothing.
pub async fn build_unified_tools(registry: &Registry) -> Vec<UnifiedTool> {
    let mut unified = Vec::new();
    for (key, client) in registry.clients().await {
        if client.current_status() != ServerStatus::Connected {
            continue;
        }
        let config = registry.config_for(&key).await;
        let mut seen = HashSet::new();
        for tool in client.tools().await {
            if !seen.insert(tool.name.clone()) {
                tracing::warn!(
                    server_key = %key,
                    tool_name = %tool.name,
                    "duplicate tool name from server, keeping first"
                );
                continue;
            }
            // A config-registered schema overrides the advertised one.
            let schema = config
                .as_ref()
                .and_then(|c| c.schemas.get(&tool.name))
                .or(tool.input_schema.as_ref());
            unified.push(UnifiedTool {
                definition: ToolDefinition {
                    name: format!("{key}_{}", tool.name),
                    description: tool.description.clone().unwrap_or_default(),
                    parameters: normalize_parameters(schema),
                    annotations: tool.annotations.clone(),
                },
                server_key: key.clone(),
                tool_name: tool.name.clone(),
            });
        }
    }
    unified
}

/// Resolve a unified tool name back to `(server_key, tool_name)` using the
/// longest matching key prefix (keys themselves may contain underscores).
pub fn resolve_tool(keys: &[String], unified_name: &str) -> Option<(String, String)> {
    let mut candidates: Vec<&String> = keys.iter().collect();
    candidates.sort_by_key(|k| std::cmp::Reverse(k.len()));
    for key in candidates {
        if let Some(rest) = unified_name.strip_prefix(key.as_str()) {
            if let Some(tool) = rest.strip_prefix('_') {
                if !tool.is_empty() {
                    return Some((key.clone(), tool.to_string()));
                }
            }
        }
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schema normalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Coerce whatever a server advertised into a well-formed object schema:
/// - missing or non-object schemas become `{type:"object", properties:{}}`;
/// - a non-object `type` with `properties` present is rewrapped;
/// - properties without a string `type` get `type:"string"`, and
///   non-object property values are replaced wholesale.
pub fn normalize_parameters(schema: Option<&Value>) -> Value {
    let Some(Value::Object(obj)) = schema else {
        return empty_object_schema();
    };

    let is_object_type = obj.get("type").and_then(Value::as_str) == Some("object");
    let properties = obj.get("properties").and_then(Value::as_object);

    match (is_object_type, properties) {
        (true, _) => {
            let mut out = obj.clone();
            if let Some(props) = properties {
                out.insert(
                    "properties".to_string(),
                    Value::Object(normalize_properties(props)),
                );
            }
            Value::Object(out)
        }
        (false, Some(props)) => json!({
            "type": "object",
            "properties": normalize_properties(props),
        }),
        (false, None) => empty_object_schema(),
    }
}

fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

fn normalize_properties(props: &Map<String, Value>) -> Map<String, Value> {
    props
        .iter()
        .map(|(name, value)| {
            let fixed = match value {
                Value::Object(prop) => {
                    if prop.get("type").map(Value::is_string).unwrap_or(false) {
                        value.clone()
                    } else {
                        let mut prop = prop.clone();
                        prop.insert("type".to_string(), json!("string"));
                        Value::Object(prop)
                    }
                }
                _ => json!({
                    "type": "string",
                    "description": format!("Malformed schema for {name}"),
                }),
            };
            (name.clone(), fixed)
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_schema_becomes_empty_object() {
        assert_eq!(normalize_parameters(None), empty_object_schema());
        assert_eq!(
            normalize_parameters(Some(&json!("not a schema"))),
            empty_object_schema()
        );
    }

    #[test]
    fn non_object_type_with_properties_is_rewrapped() {
        let schema = json!({ "type": "string", "properties": { "q": { "type": "string" } } });
        let out = normalize_parameters(Some(&schema));
        assert_eq!(out["type"], "object");
        assert_eq!(out["properties"]["q"]["type"], "string");
    }

    #[test]
    fn property_without_type_gets_string_type() {
        let schema = json!({
            "type": "object",
            "properties": {
                "q": { "description": "query" },
                "n": { "type": "integer" }
            }
        });
        let out = normalize_parameters(Some(&schema));
        assert_eq!(out["properties"]["q"]["type"], "string");
        assert_eq!(out["properties"]["q"]["description"], "query");
        assert_eq!(out["properties"]["n"]["type"], "integer");
    }

    #[test]
    fn malformed_property_value_is_replaced() {
        let schema = json!({ "type": "object", "properties": { "bad": 42 } });
        let out = normalize_parameters(Some(&schema));
        assert_eq!(out["properties"]["bad"]["type"], "string");
        assert_eq!(
            out["properties"]["bad"]["description"],
            "Malformed schema for bad"
        );
    }

    #[test]
    fn object_schema_keeps_extra_keywords() {
        let schema = json!({
            "type": "object",
            "properties": { "q": { "type": "string" } },
            "required": ["q"]
        });
        let out = normalize_parameters(Some(&schema));
        assert_eq!(out["required"][0], "q");
    }

    #[test]
    fn resolve_prefers_the_longest_key() {
        let keys = vec!["web".to_string(), "web_search".to_string()];
        assert_eq!(
            resolve_tool(&keys, "web_search_find"),
            Some(("web_search".to_string(), "find".to_string()))
        );
        assert_eq!(
            resolve_tool(&keys, "web_fetch"),
            Some(("web".to_string(), "fetch".to_string()))
        );
        assert_eq!(resolve_tool(&keys, "other_tool"), None);
        assert_eq!(resolve_tool(&keys, "web_"), None);
    }
}
