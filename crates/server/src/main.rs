use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use chunkgate_crypto::{ExposeSecret, SecretString};
use chunkgate_server::api::AppState;
use chunkgate_server::config::ChunkgateConfig;

/// Signed-link streaming gateway.
#[derive(Parser, Debug)]
#[command(name = "chunkgate-server", about = "Standalone HTTP server for chunkgate")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "chunkgate.toml")]
    config: String,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run database migrations for the configured state backend, then exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (config, found) = ChunkgateConfig::load(&cli.config)?;

    if let Some(Commands::Migrate) = cli.command {
        chunkgate_server::telemetry::init_fmt();
        return run_migrate(&config).await;
    }

    let telemetry_guard = chunkgate_server::telemetry::init(&config.telemetry);
    if !found {
        info!(path = %cli.config, "config file not found, using defaults");
    }

    let store = chunkgate_server::state_factory::create_state(&config.state).await?;
    let gateway = Arc::new(chunkgate_server::gateway_factory::build_gateway(
        &config, store,
    )?);
    info!(
        backends = gateway.pool().len(),
        primary = gateway.pool().primary(),
        chunk_size = gateway.chunk_size(),
        state = %config.state.backend,
        "gateway ready"
    );

    let state = AppState {
        gateway: Arc::clone(&gateway),
        admin_token: config
            .server
            .admin_token
            .as_ref()
            .map(|token| Arc::new(SecretString::new(token.expose_secret().clone()))),
        base_url: config.server.base_url(),
    };
    let app = chunkgate_server::api::router(state);

    let host = cli.host.unwrap_or_else(|| config.server.host.clone());
    let port = cli.port.unwrap_or(config.server.port);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "chunkgate-server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Let pending counter and access-log writes finish.
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);
    info!(
        timeout_secs = config.server.shutdown_timeout_seconds,
        "waiting for pending background writes..."
    );
    if tokio::time::timeout(shutdown_timeout, gateway.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = config.server.shutdown_timeout_seconds,
            "shutdown timeout exceeded, some access records may be lost"
        );
    }

    telemetry_guard.shutdown();

    info!("chunkgate-server shut down");
    Ok(())
}

/// Run the `migrate` subcommand: prepare the state backend schema and exit.
async fn run_migrate(config: &ChunkgateConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(backend = %config.state.backend, "running state backend migrations...");
    let _store = chunkgate_server::state_factory::create_state(&config.state).await?;
    info!(backend = %config.state.backend, "state backend migrations complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
