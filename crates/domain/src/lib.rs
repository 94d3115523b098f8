//! `fleet-domain` — shared types for MCP Fleet.
//!
//! This crate holds the vocabulary every other crate speaks:
//! - The configuration model (`config`): the permissive on-disk shape,
//!   normalization into the canonical form, and the tagged transport variant.
//! - Status projections (`status`): per-server status and the cached
//!   `ManagedServerInfo` snapshot.
//! - Tool-surface types (`tool`): unified tool definitions, execution
//!   records, structured failures, and the chunked-content sum type for
//!   oversized responses.
//! - The shared error type (`error`).

pub mod config;
pub mod error;
pub mod status;
pub mod tool;

pub use config::{AppConfig, RawServerConfig, RetryPolicy, ServerConfig, Transport};
pub use error::{Error, ErrorKind, Result};
pub use status::{ManagedServerInfo, ServerStatus, ToolDescriptor, TransportType};
