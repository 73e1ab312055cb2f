//! Majlis presence and signaling server.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin majlis-server
//! cargo run --bin majlis-server -- --host 0.0.0.0 --port 3000 --default-room lobby
//! ```

use std::sync::Arc;

use clap::Parser;
use majlis_server::{
    config::{
        CoordinatorConfig, DEFAULT_INACTIVITY_TIMEOUT_SECS, DEFAULT_ROOM_ID,
        DEFAULT_SWEEP_INTERVAL_SECS,
    },
    ui::Server,
};
use majlis_shared::{logger::setup_logger, time::SystemClock};

#[derive(Parser, Debug)]
#[command(name = "majlis-server")]
#[command(about = "Presence, room-membership and WebRTC signaling server", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, env = "MAJLIS_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, env = "MAJLIS_PORT", default_value = "8080")]
    port: u16,

    /// Room that always exists and is never deleted
    #[arg(long, env = "MAJLIS_DEFAULT_ROOM", default_value = DEFAULT_ROOM_ID)]
    default_room: String,

    /// Seconds between presence sweeps
    #[arg(long, env = "MAJLIS_SWEEP_INTERVAL_SECS", default_value_t = DEFAULT_SWEEP_INTERVAL_SECS)]
    sweep_interval_secs: u64,

    /// Seconds of inactivity after which a session expires
    #[arg(long, env = "MAJLIS_INACTIVITY_TIMEOUT_SECS", default_value_t = DEFAULT_INACTIVITY_TIMEOUT_SECS)]
    inactivity_timeout_secs: u64,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "debug");

    let args = Args::parse();

    let config = match CoordinatorConfig::from_parts(
        &args.default_room,
        args.sweep_interval_secs,
        args.inactivity_timeout_secs,
    ) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    let server = Server::new(config, Arc::new(SystemClock));
    if let Err(e) = server.run(args.host, args.port).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
