use clap::Parser;
use log::info;
use rand::Rng;
use server::{Entity, ZoneServer, ZoneServerConfig};
use shared::{EntityKind, ServerId, Vec2, ZoneGrid};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (0 picks a free port)
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Coordinator address
    #[arg(short, long, default_value = "127.0.0.1:7000")]
    coordinator: String,

    /// Server id; a random one is generated when omitted
    #[arg(long)]
    id: Option<String>,

    /// Zone side length in world units, must match the coordinator
    #[arg(long, default_value = "500")]
    cell_size: f32,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "20")]
    tick_rate: u32,

    /// Boundary scan interval in milliseconds
    #[arg(long, default_value = "100")]
    scan_interval: u64,

    /// Wandering enemies to spawn in the assigned zone
    #[arg(long, default_value = "0")]
    enemies: u32,
}

impl Args {
    fn into_config(self) -> Result<ZoneServerConfig, Box<dyn std::error::Error>> {
        if self.tick_rate == 0 {
            return Err("tick rate must be greater than zero".into());
        }

        let server_id = self
            .id
            .unwrap_or_else(|| format!("zone-{:04x}", rand::random::<u16>()));
        let bind_addr: SocketAddr = format!("{}:{}", self.host, self.port).parse()?;

        let config = ZoneServerConfig {
            server_id: ServerId::new(server_id),
            bind_addr,
            coordinator_addr: self.coordinator.parse()?,
            grid: ZoneGrid::new(self.cell_size)?,
            tick_interval: Duration::from_secs_f32(1.0 / self.tick_rate as f32),
            scan_interval: Duration::from_millis(self.scan_interval),
            ..ZoneServerConfig::default()
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

    let args = Args::parse();
    let enemies = args.enemies;
    let config = args.into_config()?;
    let grid = config.grid;

    info!("Starting zone server {}", config.server_id);
    info!("Coordinator: {}", config.coordinator_addr);

    let mut server = ZoneServer::start(config).await?;

    let bounds = grid.bounds(server.zone());
    let mut rng = rand::thread_rng();
    for i in 0..enemies {
        let position = Vec2::new(
            rng.gen_range(bounds.min_x..bounds.max_x),
            rng.gen_range(bounds.min_y..bounds.max_y),
        );
        let velocity = Vec2::new(rng.gen_range(-40.0..40.0), rng.gen_range(-40.0..40.0));
        let id = (u64::from(rng.gen::<u32>()) << 16) | u64::from(i);
        server
            .spawn_entity(Entity::new(id, EntityKind::Enemy, position).with_velocity(velocity))
            .await;
    }
    if enemies > 0 {
        info!("Spawned {} enemies in zone {}", enemies, server.zone());
    }

    let shutdown = server.shutdown_handle();
    let run = server.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            shutdown.shutdown();
            run.await?;
        }
    }

    Ok(())
}
