mod driver;
mod pilot;
mod stats;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use driver::{Driver, DriverConfig};
use rpgsync::{PacketLossSimulation, TransportConfig};

#[derive(Parser)]
#[command(name = "rpgsync-client")]
#[command(about = "Headless client for the rpgsync data plane")]
struct Args {
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:27016",
        help = "Server address to connect to"
    )]
    server: String,

    #[arg(short, long, default_value = "0.0.0.0:0")]
    bind: String,

    #[arg(long, help = "Leave after this many seconds")]
    seconds: Option<u64>,

    #[arg(long, default_value_t = 2, help = "Seconds between state logs")]
    log_every: u64,

    #[arg(long, help = "Chat line to send once in play")]
    say: Option<String>,

    #[arg(long, help = "Enable outbound packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let server: SocketAddr = args
        .server
        .parse()
        .with_context(|| format!("invalid server address {}", args.server))?;

    let transport = TransportConfig {
        bind: args.bind,
        loss_simulation: args
            .simulate_packet_loss
            .then(|| PacketLossSimulation::lossy(args.loss_percent)),
        ..Default::default()
    };

    let mut driver = Driver::new(DriverConfig {
        server,
        transport,
        run_for: args.seconds.map(Duration::from_secs),
        log_interval: Duration::from_secs(args.log_every.max(1)),
        greeting: args.say,
    })?;

    match driver.run()? {
        Some(result) => log::info!(
            "Game over: success {}, score {}, {} s",
            result.success,
            result.score,
            result.duration_secs
        ),
        None => log::info!("Left before the game finished"),
    }
    Ok(())
}
