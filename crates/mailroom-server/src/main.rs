//! Mailroom service entry point.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mailroom_core::RedbKvStore;
use mailroom_server::{build_router, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log);

    let store = Arc::new(RedbKvStore::open(&config.database_path)?);
    let cancel = CancellationToken::new();
    let app = build_router(&config, store, cancel.clone())?;

    let addr = config.server_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, sync_enabled = config.sync_enabled, "mailroom listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(cancel)).await?;

    info!("server stopped");
    Ok(())
}

fn init_tracing(directives: &str) {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Waits for CTRL+C or SIGTERM, then cancels the shared token so
/// in-flight retry waits abort instead of holding shutdown open.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install CTRL+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received CTRL+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }

    cancel.cancel();
}
