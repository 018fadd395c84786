//! stream-relay
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────┐
//!                 │                      STREAM RELAY                         │
//!   Caller        │  ┌────────┐   ┌─────────┐   ┌───────────┐   ┌──────────┐ │
//!   ──────────────┼─▶│  http  │──▶│ gateway │──▶│ admission │──▶│ upstream │─┼──▶ AI service
//!                 │  │ axum   │   │ + dedup │   │  permits  │   │ SSE / WS │ │    (SSE or WS)
//!                 │  └────────┘   └─────────┘   └───────────┘   └────┬─────┘ │
//!                 │       ▲                                          │       │
//!   ◀─────────────┼───────┴────────── relay session (task) ◀─────────┘       │
//!   SSE / JSON    │                   timeouts, ordering                      │
//!                 │  ┌────────────────────────────────────────────────────┐  │
//!                 │  │ config + watcher │ observability │ lifecycle       │  │
//!                 │  └────────────────────────────────────────────────────┘  │
//!                 └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use stream_relay::config::{load_config, RelayConfig};
use stream_relay::lifecycle::startup;
use stream_relay::observability::logging;

#[derive(Parser)]
#[command(name = "stream-relay")]
#[command(about = "Streaming relay for conversational AI upstreams", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => RelayConfig::default(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "stream-relay starting");
    tracing::info!(
        config = ?args.config,
        bind_address = %config.listener.bind_address,
        capacity = config.admission.capacity,
        cooldown_secs = config.dedup.cooldown_secs,
        idle_timeout_secs = config.session.idle_timeout_secs,
        "Configuration loaded"
    );

    startup::run(config, args.config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
