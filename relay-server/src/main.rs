mod config;
mod logging;
mod server;
mod ws;

use anyhow::Result;
use clap::Parser;
use relay_sfu::{SignalingGateway, WebRtcEngine};
use std::sync::Arc;
use tracing::info;

use server::RelayServer;

#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(about = "WebRTC SFU signaling relay", long_about = None)]
struct Args {
    /// Path to a YAML/TOML config file
    #[arg(short, long, env = "RELAY_CONFIG_PATH")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration
    let config = config::load_config(args.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Relay starting...");
    info!(
        http_address = %config.http_address(),
        ice_servers = config.sfu.ice_servers.len(),
        negotiation_timeout_secs = config.sfu.negotiation_timeout_secs,
        "Configuration loaded"
    );

    // 3. Transport engine and signaling core
    let engine = Arc::new(WebRtcEngine::new(&config.sfu)?);
    let gateway = SignalingGateway::new(config.sfu.clone(), engine);

    // 4. Serve until shutdown
    RelayServer::new(config, gateway).start().await
}
