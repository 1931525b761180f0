//! gitvault server
//!
//! Access-controlled remote storage over Git hosting with a WebSocket RPC
//! protocol.

use clap::Parser;
use gitvault::{
    config::{LogFormat, load_config},
    server::{ServerState, run},
};
use std::net::SocketAddr;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Access-controlled remote storage over Git hosting
#[derive(Parser, Debug)]
#[command(name = "gitvault")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "GITVAULT_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "GITVAULT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Bind host, overrides the configuration file
    #[arg(long, env = "GITVAULT_HOST")]
    host: Option<String>,

    /// Bind port, overrides the configuration file
    #[arg(long, env = "GITVAULT_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional; real environments set variables directly
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let config = load_config(args.config.as_deref())
        .inspect_err(|e| eprintln!("Failed to load configuration: {e}"))?;

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    match config.logging.format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        tenants = config.tenants.len(),
        "Starting gitvault server"
    );

    let state = ServerState::from_config(&config)
        .inspect_err(|e| error!(error = %e, "Failed to build tenant storages"))?;

    let host = args.host.unwrap_or_else(|| config.server.host.clone());
    let port = args.port.unwrap_or(config.server.port);
    let bind: SocketAddr = format!("{}:{}", host, port).parse()?;

    run(bind, state, shutdown_signal()).await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install shutdown handler");
    } else {
        info!("Shutdown signal received");
    }
}
