//! livequery server binary.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use livequery_server::{build_state, create_router, Args};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "livequery_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting livequery server");

    let args = Args::parse();
    let config = args.into_config();

    tracing::info!(
        listen = %config.listen_addr,
        data_path = %config.data_path.display(),
        schema = ?config.schema_path,
        snapshot_upstream = ?config.snapshot_upstream,
        max_depth = config.max_depth,
        "configuration loaded"
    );

    let state = build_state(&config)?;
    let notifier = state.notifier.clone();
    let shutdown = state.shutdown.clone();
    tracing::info!(sequence = notifier.current_sequence(), "change log opened");

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(listen = %config.listen_addr, "server ready, accepting connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl+c");
                std::future::pending::<()>().await;
            }
            tracing::info!("received shutdown signal");
            // Live streams never end on their own
            shutdown.cancel();
        })
        .await?;

    notifier.changelog().flush()?;
    tracing::info!("server shutdown complete");

    Ok(())
}
