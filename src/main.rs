//! Anomaly Hunt API Server Binary

use anomaly_hunt::api::server::{init_tracing, ApiServer};
use anomaly_hunt::games::settlement::InMemoryLedger;
use anomaly_hunt::{ConfigLoader, GameEngine};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "anomaly-hunt")]
#[command(about = "Anomaly Hunt game engine API server", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the API host
    #[arg(long)]
    host: Option<String>,

    /// Override the API port
    #[arg(long)]
    port: Option<u16>,

    /// Allowed CORS origins (comma-separated, use * for all)
    #[arg(long)]
    cors_origins: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;

    if let Some(host) = args.host {
        config.api.host = host;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if let Some(origins) = args.cors_origins {
        config.api.allowed_origins = origins.split(',').map(|s| s.trim().to_string()).collect();
    }

    info!(
        board_size = config.game.board_size,
        house_edge = config.game.house_edge,
        starting_credits = config.ledger.starting_credits,
        "configuration loaded"
    );

    let ledger = Arc::new(InMemoryLedger::new(config.ledger.starting_credits));
    let engine = Arc::new(GameEngine::with_system_sources(&config, ledger));
    let sweeper = engine.spawn_sweeper();

    let result = ApiServer::new(config.api.clone(), engine).run().await;
    sweeper.abort();
    result
}
