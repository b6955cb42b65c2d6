mod config;
mod events;
mod server;
mod world;

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use config::ServerConfig;
use events::ServerEvent;
use rpgsync::PacketLossSimulation;
use server::GameServer;

#[derive(Parser)]
#[command(name = "rpgsync-server")]
#[command(about = "Headless authority for the rpgsync data plane")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = rpgsync::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 4)]
    max_clients: usize,

    #[arg(long, default_value = "forest")]
    map: String,

    #[arg(long, default_value_t = 120, help = "Game length in seconds, 0 for endless")]
    duration: u32,

    #[arg(long, default_value_t = 1)]
    min_players: usize,

    #[arg(long, default_value_t = 4)]
    enemies: usize,

    #[arg(long, help = "Enable outbound packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, help = "Write the snapshot store as JSON on exit")]
    dump: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let loss_simulation = args
        .simulate_packet_loss
        .then(|| PacketLossSimulation::lossy(args.loss_percent));

    let config = ServerConfig {
        tick_rate: args.tick_rate,
        max_clients: args.max_clients,
        map: args.map,
        duration_secs: args.duration,
        min_players: args.min_players,
        enemies: args.enemies,
        loss_simulation,
        ..Default::default()
    };

    let mut server = GameServer::new(&bind_addr, config)
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    log::info!("Server started on {}", server.local_addr());

    let running = server.running();
    while running.load(std::sync::atomic::Ordering::SeqCst) {
        server.tick_once();
        for event in server.drain_events() {
            log_event(event);
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }

    server.shutdown_connections();
    for event in server.drain_events() {
        log_event(event);
    }

    let result = server.final_result();
    log::info!(
        "Server shutting down in phase {}: success {}, score {}",
        server.phase().as_str(),
        result.success,
        result.score
    );

    if let Some(path) = args.dump {
        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        server
            .dump_store(BufWriter::new(file))
            .with_context(|| format!("failed to write {}", path.display()))?;
        log::info!("Snapshot store written to {}", path.display());
    }

    Ok(())
}

fn log_event(event: ServerEvent) {
    match event {
        ServerEvent::ClientConnecting { addr } => {
            log::debug!("Connection request from {}", addr);
        }
        ServerEvent::ClientConnected {
            client_id,
            addr,
            player_id,
            resumed,
        } => {
            log::info!(
                "Client {} connected from {} (player {}, resumed: {})",
                client_id,
                addr,
                player_id,
                resumed
            );
        }
        ServerEvent::ClientReady { client_id } => log::info!("Client {} ready", client_id),
        ServerEvent::ClientDisconnected { client_id, reason } => {
            log::info!("Client {} {}", client_id, reason.as_str());
        }
        ServerEvent::ConnectionDenied { addr, reason } => {
            log::warn!("Connection denied to {}: {}", addr, reason);
        }
        ServerEvent::PhaseChanged(phase) => log::debug!("Now in phase {}", phase.as_str()),
        ServerEvent::Chat { sender, text } => log::debug!("Chat from {}: {}", sender, text),
        ServerEvent::Error { message } => log::error!("{}", message),
    }
}
