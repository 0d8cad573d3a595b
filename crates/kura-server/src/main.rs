//! Kura server binary.
//!
//! Loads configuration, opens the connection pool, and serves the `/fs/*`
//! surface until interrupted.

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kura_server::{AppState, Cli, ServerConfig, fs_routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli)?;
    let bind = config.bind.clone();

    info!(
        data_dir = %config.data_dir.display(),
        pool_size = config.pool_size,
        "starting kura-server"
    );
    let state = AppState::new(config)?;
    let app = fs_routes::router(state);

    let listener = TcpListener::bind(&bind).await?;
    info!("listening on {bind}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
