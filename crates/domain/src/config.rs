//! Configuration model for the fleet manager.
//!
//! The on-disk document is `{ "mcpServers": { "<key>": { … } } }`. Server
//! entries arrive in several historical shapes (top-level `command`/`url`
//! fields, a deprecated `transportType` discriminator, `httpSettings`), all
//! of which [`RawServerConfig::normalize`] rewrites into the canonical
//! [`ServerConfig`] with a tagged [`Transport`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::status::TransportType;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Canonical config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The normalized application config: one entry per configured MCP server,
/// keyed by an opaque identifier that doubles as the tool-name prefix.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default, rename = "mcpServers")]
    pub mcp_servers: BTreeMap<String, ServerConfig>,
}

impl AppConfig {
    /// Parse a raw JSON document and normalize every server entry.
    ///
    /// A missing top-level `mcpServers` key is treated as an empty config.
    pub fn from_json(raw: &str) -> Result<Self> {
        let doc: RawAppConfig = serde_json::from_str(raw)?;
        Ok(Self {
            mcp_servers: doc
                .mcp_servers
                .into_iter()
                .map(|(key, raw)| (key, raw.normalize()))
                .collect(),
        })
    }

    /// Collect per-server issues. Errors keep a server out of service
    /// (it gets an error placeholder); warnings are advisory only.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        for (key, server) in &self.mcp_servers {
            if let Err(e) = server.validate() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    server_key: key.clone(),
                    message: e.to_string(),
                });
            }
            if server.timeout_ms == Some(0) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    server_key: key.clone(),
                    message: "timeoutMs of 0 will fail every connect attempt".into(),
                });
            }
            if let Some(retry) = &server.retry {
                if retry.max_delay_ms < retry.base_delay_ms {
                    issues.push(ConfigIssue {
                        severity: ConfigSeverity::Warning,
                        server_key: key.clone(),
                        message: "retry maxDelayMs is below baseDelayMs; delays are clamped".into(),
                    });
                }
            }
            if server.label.as_deref() == Some("") {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    server_key: key.clone(),
                    message: "empty label; the server key will be shown instead".into(),
                });
            }
        }
        issues
    }
}

/// Severity of a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// One validation finding for one server entry.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub server_key: String,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.server_key, self.message)
    }
}

/// One server entry in canonical form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Human-readable label; falls back to the server key in projections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Disabled servers get a placeholder registry entry and no client.
    #[serde(default = "d_true")]
    pub enabled: bool,

    /// How to reach the server. `None` means normalization could not derive
    /// a transport; [`ServerConfig::validate`] rejects such entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<Transport>,

    /// Per-tool JSON Schemas. When present for a tool, the schema overrides
    /// the server-advertised `inputSchema` and gates invocation arguments.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub schemas: BTreeMap<String, serde_json::Value>,

    /// Connect retry/backoff tuning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,

    /// Overall deadline for one connect attempt (transport build, handshake
    /// and tool discovery), in milliseconds. Default 30 000.
    #[serde(
        default,
        rename = "timeoutMs",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_ms: Option<u64>,

    /// Legacy `httpSettings` block, retained verbatim for round-tripping.
    #[serde(
        default,
        rename = "httpSettings",
        skip_serializing_if = "Option::is_none"
    )]
    pub http_settings: Option<HttpSettings>,
}

impl ServerConfig {
    /// A normalized config is valid iff a transport is present and its
    /// type-appropriate fields are non-empty.
    pub fn validate(&self) -> Result<()> {
        match &self.transport {
            None => Err(Error::ConfigInvalid(
                "no transport configured (expected stdio command or sse/streamable-http url)"
                    .into(),
            )),
            Some(Transport::Stdio { command, .. }) if command.trim().is_empty() => Err(
                Error::ConfigInvalid("stdio transport requires a non-empty command".into()),
            ),
            Some(Transport::Sse { url, .. }) | Some(Transport::StreamableHttp { url, .. })
                if url.trim().is_empty() =>
            {
                Err(Error::ConfigInvalid(format!(
                    "{} transport requires a non-empty url",
                    self.transport_type()
                )))
            }
            Some(_) => Ok(()),
        }
    }

    /// The transport discriminator, defaulting to stdio when no transport
    /// could be derived (placeholder projections still need one).
    pub fn transport_type(&self) -> TransportType {
        self.transport
            .as_ref()
            .map(Transport::transport_type)
            .unwrap_or(TransportType::Stdio)
    }

    /// Effective retry policy (configured or defaults).
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone().unwrap_or_default()
    }

    /// Fields whose change requires tearing down and re-creating the
    /// managed client: transport, label, enabled.
    pub fn significant_eq(&self, other: &ServerConfig) -> bool {
        self.transport == other.transport
            && self.label == other.label
            && self.enabled == other.enabled
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport variants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How the manager reaches one MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Transport {
    Stdio {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr: Option<StderrMode>,
    },
    Sse {
        url: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    StreamableHttp {
        url: String,
        #[serde(
            default,
            rename = "sessionId",
            skip_serializing_if = "Option::is_none"
        )]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
}

impl Transport {
    pub fn transport_type(&self) -> TransportType {
        match self {
            Transport::Stdio { .. } => TransportType::Stdio,
            Transport::Sse { .. } => TransportType::Sse,
            Transport::StreamableHttp { .. } => TransportType::StreamableHttp,
        }
    }
}

/// What to do with a stdio child's stderr stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StderrMode {
    /// Capture and tail stderr so health checks can spot fatal output.
    #[default]
    Pipe,
    Inherit,
    Ignore,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Exponential-backoff settings for the initial connect sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Total connect attempts.
    #[serde(default = "d_max_retries", rename = "maxRetries")]
    pub max_retries: u32,

    /// Delay before the second attempt, in milliseconds.
    #[serde(default = "d_base_delay_ms", rename = "baseDelayMs")]
    pub base_delay_ms: u64,

    /// Backoff ceiling, in milliseconds.
    #[serde(default = "d_max_delay_ms", rename = "maxDelayMs")]
    pub max_delay_ms: u64,

    /// Multiplier applied per attempt.
    #[serde(default = "d_backoff_multiplier", rename = "backoffMultiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: d_max_retries(),
            base_delay_ms: d_base_delay_ms(),
            max_delay_ms: d_max_delay_ms(),
            backoff_multiplier: d_backoff_multiplier(),
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_max_retries() -> u32 {
    3
}
fn d_base_delay_ms() -> u64 {
    1_000
}
fn d_max_delay_ms() -> u64 {
    10_000
}
fn d_backoff_multiplier() -> f64 {
    2.0
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Raw (legacy-tolerant) config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize, Default)]
struct RawAppConfig {
    #[serde(default, rename = "mcpServers")]
    mcp_servers: BTreeMap<String, RawServerConfig>,
}

/// Legacy `httpSettings` block from configs that predate tagged transports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(
        default,
        rename = "sessionId",
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<String>,
}

/// The permissive shape accepted from disk. Every historical field is
/// optional; [`RawServerConfig::normalize`] folds them into the canonical
/// form.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawServerConfig {
    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub enabled: Option<bool>,

    /// Legacy inverse of `enabled`. An explicit `enabled` wins.
    #[serde(default)]
    pub disabled: Option<bool>,

    #[serde(default)]
    pub transport: Option<Transport>,

    /// Deprecated discriminator (`"stdio" | "sse" | "streamable-http"`).
    #[serde(default, rename = "transportType")]
    pub transport_type: Option<String>,

    // Top-level stdio fallbacks.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub stderr: Option<StderrMode>,

    // Top-level HTTP fallbacks.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,

    #[serde(default, rename = "httpSettings")]
    pub http_settings: Option<HttpSettings>,

    #[serde(default)]
    pub schemas: Option<BTreeMap<String, serde_json::Value>>,

    #[serde(default)]
    pub retry: Option<RetryPolicy>,

    #[serde(default, rename = "timeoutMs")]
    pub timeout_ms: Option<u64>,
}

impl RawServerConfig {
    /// Canonicalize a raw entry. Normalization never fails; entries it
    /// cannot derive a transport for are caught later by
    /// [`ServerConfig::validate`] and surface as `status = error`.
    ///
    /// Idempotent: normalizing an already-canonical entry is the identity.
    pub fn normalize(self) -> ServerConfig {
        let enabled = match (self.enabled, self.disabled) {
            (Some(enabled), _) => enabled,
            (None, Some(disabled)) => !disabled,
            (None, None) => true,
        };

        let transport = self
            .transport
            .clone()
            .or_else(|| self.transport_from_discriminator())
            .or_else(|| self.transport_from_bare_fields());

        ServerConfig {
            label: self.label,
            enabled,
            transport,
            schemas: self.schemas.unwrap_or_default(),
            retry: self.retry,
            timeout_ms: self.timeout_ms,
            http_settings: self.http_settings,
        }
    }

    /// Deprecated `transportType` handling: build the tagged variant from
    /// top-level fields, hoisting `httpSettings.url`/`headers` for the two
    /// HTTP flavors.
    fn transport_from_discriminator(&self) -> Option<Transport> {
        let (url, headers, session_id) = self.hoisted_http_fields();
        match self.transport_type.as_deref()? {
            "stdio" => Some(Transport::Stdio {
                command: self.command.clone().unwrap_or_default(),
                args: self.args.clone().unwrap_or_default(),
                env: self.env.clone().unwrap_or_default(),
                cwd: self.cwd.clone(),
                stderr: self.stderr,
            }),
            "sse" => Some(Transport::Sse {
                url: url.unwrap_or_default(),
                headers,
            }),
            "streamable-http" | "streamableHttp" => Some(Transport::StreamableHttp {
                url: url.unwrap_or_default(),
                session_id,
                headers,
            }),
            _ => None,
        }
    }

    /// No discriminator at all: infer from which bare fields are present.
    /// `command` implies stdio; `url` implies SSE.
    fn transport_from_bare_fields(&self) -> Option<Transport> {
        if let Some(command) = &self.command {
            return Some(Transport::Stdio {
                command: command.clone(),
                args: self.args.clone().unwrap_or_default(),
                env: self.env.clone().unwrap_or_default(),
                cwd: self.cwd.clone(),
                stderr: self.stderr,
            });
        }
        if let Some(url) = &self.url {
            return Some(Transport::Sse {
                url: url.clone(),
                headers: self.headers.clone().unwrap_or_default(),
            });
        }
        None
    }

    fn hoisted_http_fields(
        &self,
    ) -> (Option<String>, BTreeMap<String, String>, Option<String>) {
        let from_settings = self.http_settings.as_ref();
        let url = from_settings
            .and_then(|s| s.url.clone())
            .or_else(|| self.url.clone());
        let headers = from_settings
            .map(|s| s.headers.clone())
            .filter(|h| !h.is_empty())
            .or_else(|| self.headers.clone())
            .unwrap_or_default();
        let session_id = from_settings.and_then(|s| s.session_id.clone());
        (url, headers, session_id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
