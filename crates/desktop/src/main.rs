//! `jobswipe-desktop` -- desktop claim coordinator daemon.
//!
//! Listens for desktop-mode job announcements from the server, claims them
//! over HTTP, runs the local automation engine, and reports progress and
//! results back.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jobswipe_core::engine::ProcessAdapter;
use jobswipe_desktop::{run_listener, ApiClient, DesktopClaimCoordinator, DesktopConfig};

/// Buffered availability notifications between listener and coordinator.
const NOTIFY_CHANNEL_CAPACITY: usize = 64;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jobswipe_desktop=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = DesktopConfig::from_env();
    tracing::info!(
        server_url = %config.server_url,
        device_id = %config.device_id,
        max_concurrent = config.max_concurrent_executions,
        "Starting jobswipe-desktop"
    );

    let client = Arc::new(ApiClient::new(
        config.server_url.clone(),
        config.token.clone(),
    ));
    let adapter = Arc::new(ProcessAdapter::new(config.engine.clone()));

    let coordinator = DesktopClaimCoordinator::new(client, adapter, config.coordinator());

    let (notify_tx, notify_rx) = mpsc::channel(NOTIFY_CHANNEL_CAPACITY);
    let cancel = tokio_util::sync::CancellationToken::new();

    let listener_handle = tokio::spawn(run_listener(
        config.listener(),
        notify_tx,
        cancel.clone(),
    ));

    let coordinator_handle = tokio::spawn(coordinator.clone().run(notify_rx, cancel.clone()));

    // Run until interrupted.
    shutdown_signal().await;
    tracing::info!("Shutting down");
    cancel.cancel();

    let _ = listener_handle.await;
    let _ = coordinator_handle.await;
    tracing::info!("Shutdown complete");
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C)"),
        () = terminate => tracing::info!("Received SIGTERM"),
    }
}
