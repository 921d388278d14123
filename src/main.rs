use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use runpack_hub::api::rate_limit::RateLimiter;
use runpack_hub::api::{self, AppState};
use runpack_hub::config::Config;
use runpack_hub::freshness::FigpackProbe;
use runpack_hub::lifecycle::{sweeper, Coordinator};
use runpack_hub::notifier::Notifier;
use runpack_hub::shutdown::install_shutdown_handler;
use runpack_hub::store::JobStore;

#[derive(Parser, Debug)]
#[command(name = "runpack-hub")]
#[command(about = "Centralized coordinator for on-demand Runpack computation jobs")]
struct Args {
    /// Port to listen on for the HTTP API
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Path to the SQLite database file
    #[arg(long, default_value = "runpack-hub.db")]
    db: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;

    tracing::info!(
        listen_addr = %listen_addr,
        db = %args.db.display(),
        notify = config.notify_url.is_some(),
        "Starting runpack-hub coordinator"
    );

    let store = JobStore::open(&args.db).await?;

    let validator = Arc::new(FigpackProbe::new(config.probe_timeout));
    let notifier = Notifier::from_config(&config);
    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        validator,
        notifier,
        config.clone(),
    ));

    let shutdown = install_shutdown_handler();

    // Sweep stale heartbeats at startup and on a cadence under the threshold.
    tokio::spawn(sweeper::run_sweeper(
        store,
        config.sweep_interval,
        config.heartbeat_timeout,
        shutdown.clone(),
    ));

    let state = AppState {
        coordinator,
        limiter: Arc::new(RateLimiter::default()),
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
