use clap::Parser;
use log::{info, warn};
use server::{Server, ServerConfig, WorldMap};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Interface both listeners bind to
    #[arg(short = 'H', long, env = "HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port for the control (TCP) server
    #[arg(short = 't', long, env = "TCP_PORT", default_value = "8881")]
    tcp_port: u16,

    /// Port for the sync (UDP) server
    #[arg(short = 'u', long, env = "UDP_PORT", default_value = "8888")]
    udp_port: u16,

    /// Map file of comma separated cells; a blank grid is used when omitted
    #[arg(short = 'm', long, env = "MAP_PATH")]
    map: Option<PathBuf>,

    /// Number of datagram worker tasks
    #[arg(short = 'w', long, default_value = "4")]
    workers: usize,

    /// Datagrams queued ahead of the workers before new ones are dropped
    #[arg(long, default_value = "1024")]
    queue_depth: usize,

    /// Seed for auth id allocation
    #[arg(long, env = "SEED")]
    seed: Option<u64>,

    /// Log active sessions every N seconds, 0 disables
    #[arg(short = 's', long, default_value = "0")]
    status_interval: u64,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            control_port: self.tcp_port,
            data_port: self.udp_port,
            map_path: self.map,
            sync_workers: self.workers,
            sync_queue_depth: self.queue_depth,
            seed: self.seed,
            status_interval: (self.status_interval > 0)
                .then(|| Duration::from_secs(self.status_interval)),
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = Args::parse().into_config();

    let world = match &config.map_path {
        Some(path) => {
            info!("Loading map from {}", path.display());
            WorldMap::load(path)?
        }
        None => {
            info!("No map configured, serving a blank grid");
            WorldMap::default()
        }
    };

    let server = Server::start(&config, world).await?;

    // Ticks once a second even without status output, to notice a server that died
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut since_status = Duration::ZERO;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
            _ = ticker.tick() => {
                if server.is_finished() {
                    warn!("A server component exited unexpectedly");
                    break;
                }
                if let Some(interval) = config.status_interval {
                    since_status += Duration::from_secs(1);
                    if since_status >= interval {
                        since_status = Duration::ZERO;
                        log_status(&server);
                    }
                }
            }
        }
    }

    server.stop().await?;
    Ok(())
}

fn log_status(server: &Server) {
    let sessions = server.registry().sessions();
    let capacity = server.registry().capacity();
    info!(
        "{}/{} active sessions, {} joins rejected",
        sessions.len(),
        capacity,
        server.rejected_joins()
    );
    if sessions.len() >= capacity {
        warn!("Session registry is full, new joins are being refused");
    }
    for session in sessions {
        info!(
            "  session {} {:?} at ({:.0}, {:.0}) via {}",
            session.session_id,
            session.name,
            session.position.x,
            session.position.y,
            session
                .data_addr
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "unbound".to_string())
        );
    }
}
