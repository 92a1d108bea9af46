use std::sync::Arc;

use anyhow::{Context as _, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gavel::cdn::LocalCdn;
use gavel::config::Config;
use gavel::oauth::HttpIdentityClient;
use gavel::store::{FileStore, Store};
use gavel::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gavel=info,tower_http=info")),
        )
        .init();

    let config = Config::load().context("Environment misconfigured")?;
    let store = Store::new(
        FileStore::open(&config.data_dir)
            .await
            .with_context(|| format!("Failed to open data directory {:?}", config.data_dir))?,
    );
    let cdn = Arc::new(LocalCdn::new(&config.cdn_dir, config.cdn_public_url.clone()));
    let identity = Arc::new(HttpIdentityClient::new(config.clone()));
    let port = config.port;

    let state = AppState::new(config, store, cdn, identity);
    state
        .prepare()
        .await
        .context("Failed to prepare stored data")?;

    let address = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to {}", address))?;
    info!("Server running on {address}");

    axum::serve(listener, gavel::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                tracing::warn!("Failed to install signal handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
