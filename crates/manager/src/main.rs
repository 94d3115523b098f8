use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fleet_manager::loader::{config_dir_from_env, CONFIG_FILE};
use fleet_manager::{Manager, ManagerOptions};

#[derive(Parser)]
#[command(name = "fleetd", about = "MCP Fleet — federated MCP server manager")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the manager until interrupted (default).
    Serve,
    /// Print per-server status from the status cache.
    Status,
    /// Config utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Validate $CONFIG_DIR/config.json and report per-server issues.
    Validate,
    /// Print the normalized config.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            serve().await
        }
        Some(Command::Status) => show_status().await,
        Some(Command::Config(ConfigCommand::Validate)) => {
            if !validate_config()? {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => show_config(),
        Some(Command::Version) => {
            println!("fleetd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,fleet_manager=debug")),
        )
        .init();
}

async fn serve() -> anyhow::Result<()> {
    let options = ManagerOptions::from_env();
    tracing::info!(
        config_dir = %options.config_dir.display(),
        cache = options.redis_url.is_some(),
        "starting fleetd"
    );
    let manager = Manager::start(options).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received");
    manager.shutdown().await;
    Ok(())
}

/// Read the status cache the way an out-of-process status API would: keys
/// come from the config, entries from the cache, misses read as
/// `uninitialized`.
async fn show_status() -> anyhow::Result<()> {
    let cache = fleet_manager::StatusCache::connect(std::env::var("REDIS_URL").ok().as_deref())
        .await;
    let config = fleet_manager::loader::load_app_config(&config_dir_from_env()).await;
    let keys: Vec<String> = config.mcp_servers.keys().cloned().collect();
    if keys.is_empty() {
        println!("(no servers configured)");
        return Ok(());
    }
    for info in cache.get_many(&keys).await {
        let detail = info.error_details.as_deref().unwrap_or("");
        println!(
            "{:<20} {:<15} {:<16} tools={:<3} {detail}",
            info.key,
            info.status.to_string(),
            info.transport_type.as_str(),
            info.tools.len(),
        );
    }
    Ok(())
}

fn validate_config() -> anyhow::Result<bool> {
    let path = config_dir_from_env().join(CONFIG_FILE);
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
    let config = fleet_domain::config::AppConfig::from_json(&raw)
        .map_err(|e| anyhow::anyhow!("cannot parse {}: {e}", path.display()))?;

    let issues = config.validate();
    for issue in &issues {
        println!("  {issue}");
    }
    for (key, server) in &config.mcp_servers {
        if server.validate().is_ok() {
            let state = if server.enabled { "ok" } else { "off" };
            println!("  [{state}] {key} ({})", server.transport_type());
        }
    }
    if config.mcp_servers.is_empty() {
        println!("  (no servers configured)");
    }
    Ok(!issues
        .iter()
        .any(|i| i.severity == fleet_domain::config::ConfigSeverity::Error))
}

fn show_config() -> anyhow::Result<()> {
    let path = config_dir_from_env().join(CONFIG_FILE);
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
    let config = fleet_domain::config::AppConfig::from_json(&raw)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
