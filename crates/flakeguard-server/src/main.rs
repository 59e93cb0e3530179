#![doc = include_str!("../README.md")]

mod server;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use flakeguard::SystemClock;
use server::config::{CliArgs, ServerConfig};
use server::handler::CommandHandler;
use server::listener::serve;
use server::store::Store;
use server::telemetry::init_telemetry;
use server::Generator;
use tokio::net::TcpListener;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    init_telemetry()?;

    let store = Store::from_config(&config)?;
    log_startup_info(&config, &store);

    // Refuses to start on a clock that is behind the persisted watermark.
    let generator = Generator::start(config.node, SystemClock, store, config.options)
        .await
        .context("startup clock check failed")?;

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!("started server at {}", listener.local_addr()?);

    let handler = Arc::new(CommandHandler::new(Arc::new(generator), config.port));
    serve(listener, handler, config.max_connections, shutdown_signal()).await?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(config: &ServerConfig, store: &Store) {
    tracing::info!(
        machine_id = config.node.machine_id(),
        node_id = config.node.node_id(),
        port = config.port,
        policy = %config.options.policy,
        store = %store.describe(),
        "Starting ID service on {}",
        config.listen_addr
    );
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
}
