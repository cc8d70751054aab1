use clap::Parser;
use client::{Client, ClientGameState};
use log::info;
use rand::Rng;
use shared::DisconnectReason;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Control (TCP) server address
    #[arg(short = 'c', long, env = "CONTROL_ADDR", default_value = "127.0.0.1:8881")]
    control: String,

    /// Sync (UDP) server address
    #[arg(short = 'd', long, env = "DATA_ADDR", default_value = "127.0.0.1:8888")]
    data: String,

    /// Display name sent with the join request
    #[arg(short = 'n', long, default_value = "bot")]
    name: String,

    /// Moves sent per second
    #[arg(short = 'r', long, default_value = "5")]
    rate: u32,

    /// Stop after this many moves, 0 runs until Ctrl+C
    #[arg(short = 'm', long, default_value = "0")]
    moves: u64,

    /// Largest coordinate a random move may target
    #[arg(long, default_value = "24")]
    extent: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting bot {:?}...", args.name);
    let client = Client::connect(&args.control, &args.data, &args.name).await?;
    let mut state = ClientGameState::new(
        client.session_id(),
        client.map().to_vec(),
        client.initial_peers().clone(),
    );

    let mut ticker = interval(Duration::from_secs_f32(1.0 / args.rate.max(1) as f32));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut rng = rand::thread_rng();
    let mut sent = 0u64;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving...");
                break;
            }
            _ = ticker.tick() => {
                let (x, y) = (rng.gen_range(0..=args.extent), rng.gen_range(0..=args.extent));
                client.send_move(x, y).await?;
                sent += 1;

                while let Some(snapshot) = client.recv_sync(Duration::from_millis(5)).await? {
                    let delta = state.apply_sync(snapshot);
                    for id in &delta.joined {
                        info!("Session {} joined", id);
                    }
                    for id in &delta.left {
                        info!("Session {} left", id);
                    }
                }

                if args.moves > 0 && sent >= args.moves {
                    break;
                }
            }
        }
    }

    info!(
        "Sent {} moves, saw {} snapshots, {} peers in view",
        sent,
        state.snapshots_applied,
        state.peers().count()
    );
    client.disconnect(DisconnectReason::Expected).await?;
    Ok(())
}
