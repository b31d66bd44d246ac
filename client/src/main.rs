use clap::Parser;
use client::{ClientConfig, ClientSession};
use log::info;
use rand::Rng;
use shared::{Vec2, ZoneGrid};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Coordinator address
    #[arg(short, long, default_value = "127.0.0.1:7000")]
    coordinator: String,

    /// Player id; a random one is generated when omitted
    #[arg(long)]
    id: Option<u64>,

    /// Player name
    #[arg(short, long, default_value = "player")]
    name: String,

    /// Session key presented to zone servers
    #[arg(long, default_value = "local")]
    session_key: String,

    /// Spawn position
    #[arg(short, long, default_value = "250")]
    x: f32,

    #[arg(short, long, default_value = "250")]
    y: f32,

    /// Starting velocity in units per second
    #[arg(long, default_value = "0")]
    vx: f32,

    #[arg(long, default_value = "0")]
    vy: f32,

    /// Pick a new random heading every this many seconds (0 keeps the
    /// starting velocity)
    #[arg(short, long, default_value = "0")]
    wander: u64,

    /// Zone side length in world units, must match the coordinator
    #[arg(long, default_value = "500")]
    cell_size: f32,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "20")]
    tick_rate: u32,
}

impl Args {
    fn into_config(self) -> Result<ClientConfig, Box<dyn std::error::Error>> {
        if self.tick_rate == 0 {
            return Err("tick rate must be greater than zero".into());
        }

        let config = ClientConfig {
            player_id: self.id.unwrap_or_else(|| rand::thread_rng().gen_range(1..1_000_000)),
            name: self.name,
            session_key: self.session_key,
            coordinator_addr: self.coordinator.parse()?,
            grid: ZoneGrid::new(self.cell_size)?,
            spawn_at: Vec2::new(self.x, self.y),
            tick_interval: Duration::from_secs_f32(1.0 / self.tick_rate as f32),
            ..ClientConfig::default()
        };
        Ok(config.validate()?)
    }
}

fn random_heading(speed: f32) -> Vec2 {
    let angle = rand::thread_rng().gen_range(0.0..std::f32::consts::TAU);
    Vec2::new(angle.cos() * speed, angle.sin() * speed)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let velocity = Vec2::new(args.vx, args.vy);
    let wander = Duration::from_secs(args.wander);
    let config = args.into_config()?;

    info!("Starting client for player {} ({})", config.player_id, config.name);
    info!("Coordinator: {}", config.coordinator_addr);

    let mut session = ClientSession::connect(config).await?;
    session.set_velocity(velocity);

    let speed = velocity.length().max(50.0);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    if wander.is_zero() {
        tokio::select! {
            result = session.run_until(std::future::pending::<()>()) => result?,
            _ = &mut ctrl_c => info!("Received Ctrl+C, leaving..."),
        }
    } else {
        loop {
            tokio::select! {
                result = session.run_until(tokio::time::sleep(wander)) => result?,
                _ = &mut ctrl_c => {
                    info!("Received Ctrl+C, leaving...");
                    break;
                }
            }
            let heading = random_heading(speed);
            info!("New heading {} at {}", heading, session.position());
            session.set_velocity(heading);
        }
    }

    session.leave().await;

    let stats = session.stats();
    info!(
        "Session ended: {} switches, {} reconnects, {} anomalies",
        stats.switches,
        stats.reconnects,
        session.anomalies().count()
    );

    Ok(())
}
