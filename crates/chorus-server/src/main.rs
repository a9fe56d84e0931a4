//! # Chorus Server
//!
//! Realtime chat hub: presence, rooms, typing indicators and message fan-out.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! chorus
//!
//! # Run with custom config
//! chorus --config /path/to/chorus.toml
//!
//! # Run with environment variables
//! CHORUS__PORT=8080 CHORUS__HOST=0.0.0.0 chorus
//! ```

mod auth;
mod config;
mod handlers;
mod metrics;
mod store;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Chorus realtime chat hub
#[derive(Parser, Debug)]
#[command(name = "chorus", version, about = "Chorus realtime chat hub")]
struct Args {
    /// Path to a TOML config file; the default locations are searched otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chorus=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match args.config {
        Some(path) => config::Config::load_from(path)?,
        None => config::Config::load()?,
    };

    tracing::info!("Starting Chorus server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
