use clap::Parser;
use log::{error, info};
use server::server::Server;
use shared::GameConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Milliseconds per tick
    #[arg(short, long, default_value_t = GameConfig::default().tick_rate_ms)]
    tick_rate_ms: u64,

    /// World height in squares
    #[arg(long, default_value_t = GameConfig::default().world_height)]
    world_height: i32,

    /// World width in squares
    #[arg(long, default_value_t = GameConfig::default().world_width)]
    world_width: i32,

    /// Seed for world generation, enemies and tokens
    #[arg(long)]
    seed: Option<u64>,
}

/// Main-method of the application.
/// Parses command-line arguments, starts the server and runs until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = GameConfig {
        tick_rate_ms: args.tick_rate_ms,
        world_height: args.world_height,
        world_width: args.world_width,
        seed: args.seed,
        ..Default::default()
    };

    info!("Starting arena server...");
    info!(
        "World {}x{} squares, {} ticks per second",
        config.world_height,
        config.world_width,
        config.ticks_per_second()
    );

    let address = format!("{}:{}", args.host, args.port);
    let mut server = match Server::start(config, &address).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start server: {}", e);
            return Err(e.into());
        }
    };

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down gracefully...");
    server.stop().await;

    Ok(())
}
