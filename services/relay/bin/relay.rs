//! Main entrypoint for the relay service.
//!
//! Loads configuration (environment, then command-line overrides), installs
//! logging, and serves the WebSocket relay until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use duplex_relay::{config::Config, router::create_router, state::AppState};
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use tracing::{error, info};

/// Forwards browser WebSocket sessions to a realtime vendor, adding the
/// `Authorization` header browsers cannot set.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Default API key for clients that do not pass `?key=`.
    key: Option<String>,

    /// Address to listen on (overrides RELAY_BIND_ADDRESS).
    #[arg(long)]
    bind: Option<SocketAddr>,
}

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()
        .context("Failed to load configuration")?
        .with_overrides(cli.bind, cli.key);

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    match &config.default_key {
        Some(key) => {
            let prefix: String = key.expose_secret().chars().take(8).collect();
            info!(key_prefix = %format!("{prefix}..."), "Default API key configured");
        }
        None => info!("No default API key; clients must pass ?key="),
    }
    info!(
        bind_address = %config.bind_address,
        upstream = %config.upstream_url,
        default_model = %config.default_model,
        "Starting relay..."
    );

    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    let app = create_router(AppState::new(config));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Relay has shut down.");
    Ok(())
}
