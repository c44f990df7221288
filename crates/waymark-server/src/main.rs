//! Waymark backend daemon
//!
//! Accepts listener connections, authenticates beacon telemetry and
//! reconciles the entity cache with storage.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use waymark_cache::{CacheService, MemoryStorage, Persister};
use waymark_server::{Config, PacketHandler, run};

/// Waymark - proximity-beacon telemetry backend
#[derive(Parser)]
#[command(name = "waymarkd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration file
    #[arg(short, long)]
    listen: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(listen) = cli.listen {
        config.network.listen_addr = listen;
    }
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose {
            "debug".to_string()
        } else {
            config.logging.level.clone()
        })
        .init();

    let listen = config.parse_listen_addr()?;
    let master_key = config.master_key()?;

    let cache = Arc::new(CacheService::new());
    let storage = Arc::new(MemoryStorage::new());
    warn!("using in-memory storage; entity state does not survive a restart");

    let persister = Persister::new(cache.clone(), storage, config.persistence_policy());
    tokio::spawn(persister.run());

    let handler = Arc::new(PacketHandler::new(cache, master_key, config.dk_policy()));
    info!(%listen, "waymarkd starting");
    run(listen, handler).await?;
    Ok(())
}
