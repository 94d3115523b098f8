//! `fleet-manager` — the MCP federation core.
//!
//! Wires the per-server clients from `fleet-mcp-client` into one manager:
//! - `loader`: fail-soft config loading from `$CONFIG_DIR/config.json`.
//! - `registry`: the process-wide key → client map with config diffing.
//! - `status_cache`: Redis-backed TTL cache of per-server status.
//! - `poller`: periodic status refresh into the cache.
//! - `aggregator`: the unified `<serverKey>_<tool>` catalog.
//! - `invoke`: the per-call wrapper (validation, normalization, metrics,
//!   structured failures).
//! - `normalize`: bounded chunking of oversized string results.
//! - `watcher`: debounced config-file watching driving hot reload.
//! - `manager`: the process-wide facade the `fleetd` binary boots.

pub mod aggregator;
pub mod invoke;
pub mod loader;
pub mod manager;
pub mod metrics;
pub mod normalize;
pub mod poller;
pub mod registry;
pub mod status_cache;
pub mod watcher;

pub use manager::{Manager, ManagerOptions};
pub use registry::{Registry, RegistryEntry};
pub use status_cache::StatusCache;
