//! garmin-agent
//!
//! Daemon that imports workouts from Garmin devices to Garmin Connect.
//! Detects the device via USB hotplug, mounts it, syncs activity files to
//! local storage, uploads anything new and unmounts again.

use anyhow::{Context, Result};
use clap::Parser;
use garmin_agent::{
    Agent, AgentConfig, DedupStore, WatcherCommand, create_bridge, setup_logging,
};
use garmin_agent::usb::spawn_usb_watcher;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "garmin-agent")]
#[command(
    author,
    version,
    about = "Import workouts from Garmin devices to Garmin Connect"
)]
#[command(long_about = "
Background agent that waits for a Garmin device to appear over USB, mounts
it, copies new activity files to local storage and uploads them to Garmin
Connect via gupload. Already-uploaded activities are tracked in a small
sqlite store and never submitted twice.

EXAMPLES:
    # Run with default config
    garmin-agent

    # Run with custom config
    garmin-agent --config /path/to/config.json

    # Run with debug logging
    garmin-agent --log-level debug

CONFIGURATION:
    The agent looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/garmin-agent/config.json
    3. /etc/garmin-agent/config.json
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = AgentConfig::default();
        let path = AgentConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        AgentConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        AgentConfig::load_or_default()
    };

    // CLI log level wins over the configured one
    let log_level = args.log_level.as_deref().unwrap_or(&config.global.log_level);
    let _log_guard = setup_logging(log_level, config.global.log_file.as_deref())
        .context("Failed to setup logging")?;

    info!("garmin-agent v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    // Running without the dedup store would re-upload every activity on
    // every session, so failure to open it is fatal.
    let store = DedupStore::open(&config.global.db_path)
        .with_context(|| format!("Failed to open store at {}", config.global.db_path.display()))?;
    info!("Dedup store: {}", config.global.db_path.display());

    let (bridge, watcher) = create_bridge();
    let watcher_handle = spawn_usb_watcher(watcher, config.global.device_filters.clone())
        .context("Failed to spawn USB watcher thread")?;

    let agent = Agent::new(config, store, bridge.clone());
    let agent_handle = tokio::spawn(agent.run());

    info!("Press Ctrl+C to shutdown");
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
        Err(e) => error!("Error waiting for Ctrl+C: {}", e),
    }

    agent_handle.abort();

    if let Err(e) = bridge.send_command(WatcherCommand::Shutdown).await {
        error!("Error shutting down USB watcher: {}", e);
    }
    match watcher_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("USB watcher exited with error: {}", e),
        Err(e) => error!("USB watcher thread panicked: {:?}", e),
    }

    info!("Shutdown complete");
    Ok(())
}
