//! Headless client for poking a running server from the command line.

use clap::Parser;
use log::{info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use shared::codec;
use shared::{
    ClientMessage, ClientUpdate, GameConfig, Key, ServerMessage, DIRECTION_KEYS, KEY_COUNT,
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Name to play under
    #[arg(short = 'n', long, default_value = "tester")]
    name: String,

    /// Number of key updates to send before leaving
    #[arg(short = 'u', long, default_value = "10")]
    updates: u32,

    /// Milliseconds between key updates
    #[arg(short = 'i', long, default_value = "500")]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let mut args = Args::parse();

    // The server stores names as sent; keep ours within the display limit.
    let max_length = GameConfig::default().name_max_length;
    if args.name.chars().count() > max_length {
        args.name = args.name.chars().take(max_length).collect();
    }

    info!("Connecting to {}", args.server);
    let stream = TcpStream::connect(&args.server).await?;
    let (mut reader, mut writer) = stream.into_split();
    codec::write_header(&mut writer).await?;
    codec::read_header(&mut reader).await?;

    codec::write_frame(
        &mut writer,
        &ClientMessage::Connect {
            name: args.name.clone(),
        },
    )
    .await?;

    let auth = match codec::read_frame::<_, ServerMessage>(&mut reader).await? {
        ServerMessage::Welcome { auth } => auth,
        ServerMessage::Rejected { reason } => {
            warn!("Server rejected us: {}", reason);
            return Ok(());
        }
        other => {
            warn!("Expected a welcome, got {:?}", other);
            return Ok(());
        }
    };
    info!("Connected as '{}'", args.name);

    let snapshots = tokio::spawn(async move {
        let mut last_tick = 0;
        loop {
            match codec::read_frame::<_, ServerMessage>(&mut reader).await {
                Ok(ServerMessage::Tick { tick }) => last_tick = tick,
                Ok(ServerMessage::Movables(movables)) if last_tick % 60 == 0 => {
                    info!("Tick {}: {} movables", last_tick, movables.len());
                    for movable in movables.iter().filter(|m| m.owner.is_some()) {
                        info!(
                            "  {:?} {} at ({}, {}) bombs={} owner={:?}",
                            movable.kind,
                            movable.id,
                            movable.position.y,
                            movable.position.x,
                            movable.bomb_count,
                            movable.owner
                        );
                    }
                }
                Ok(ServerMessage::Unmovables(unmovables)) if last_tick % 60 == 0 => {
                    info!("Tick {}: {} unmovables", last_tick, unmovables.len());
                }
                Ok(_) => {}
                Err(e) => {
                    info!("Snapshot stream ended: {}", e);
                    break;
                }
            }
        }
    });

    let mut rng = rand::thread_rng();
    for _ in 0..args.updates {
        let mut keys = [false; KEY_COUNT];
        if let Some(key) = DIRECTION_KEYS.choose(&mut rng) {
            keys[key.index()] = true;
        }
        keys[Key::Bomb.index()] = rng.gen_bool(0.2);

        let update = ClientMessage::Update(ClientUpdate {
            auth: auth.clone(),
            name: args.name.clone(),
            keys,
        });
        codec::write_frame(&mut writer, &update).await?;
        sleep(Duration::from_millis(args.interval_ms)).await;
    }

    info!("Test client finished");
    drop(writer);
    snapshots.abort();
    Ok(())
}
