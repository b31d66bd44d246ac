use clap::Parser;
use coordinator::{CoordinatorConfig, FileStore, MemoryStore};
use log::info;
use shared::ZoneGrid;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "7000")]
    port: u16,

    /// Zone side length in world units
    #[arg(long, default_value = "500")]
    cell_size: f32,

    /// Seconds without a heartbeat before a server is evicted
    #[arg(long, default_value = "120")]
    heartbeat_timeout: u64,

    /// Seconds between stale-server sweeps
    #[arg(long, default_value = "10")]
    sweep_interval: u64,

    /// Snapshot file for coordinator state
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<CoordinatorConfig, Box<dyn std::error::Error>> {
        let bind_addr: SocketAddr = format!("{}:{}", self.host, self.port).parse()?;
        let config = CoordinatorConfig {
            bind_addr,
            grid: ZoneGrid::new(self.cell_size)?,
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout),
            sweep_interval: Duration::from_secs(self.sweep_interval),
            snapshot_path: self.snapshot,
            ..CoordinatorConfig::default()
        };
        Ok(config.validate()?)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = Args::parse().into_config()?;
    info!(
        "Starting coordinator on {} (cell size {})",
        config.bind_addr,
        config.grid.cell_size()
    );

    let (_handle, mut server) = match &config.snapshot_path {
        Some(path) => coordinator::start(&config, FileStore::open(path)?).await?,
        None => coordinator::start(&config, MemoryStore::new()).await?,
    };

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
