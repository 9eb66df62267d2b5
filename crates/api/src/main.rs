use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jobswipe_api::config::ServerConfig;
use jobswipe_api::notifications::StatusEventRouter;
use jobswipe_api::router::build_app_router;
use jobswipe_api::state::AppState;
use jobswipe_api::ws::{start_heartbeat, HubConfig, RealtimeHub};
use jobswipe_core::engine::{EngineConfig, ProcessAdapter};
use jobswipe_events::EventBus;
use jobswipe_queue::{run_maintenance, BrokerConfig, DeadLetterStore, QueueBroker};
use jobswipe_worker::{JobWorkerPool, WorkerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jobswipe_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Core services (constructed once, injected everywhere) ---
    let event_bus = Arc::new(EventBus::default());
    let dead_letters = Arc::new(DeadLetterStore::new());

    let broker_config = BrokerConfig {
        lock_duration: Duration::from_secs(config.lock_duration_secs),
        ..Default::default()
    };
    let broker = Arc::new(QueueBroker::new(
        broker_config,
        Arc::clone(&event_bus),
        Arc::clone(&dead_letters),
    ));

    let hub = Arc::new(RealtimeHub::new(HubConfig {
        ping_interval: config.ping_interval(),
        auth_timeout: config.auth_timeout(),
    }));

    // --- Worker pool ---
    let adapter = Arc::new(ProcessAdapter::new(EngineConfig::from_env()));
    let worker = JobWorkerPool::new(
        Arc::clone(&broker),
        adapter,
        WorkerConfig {
            concurrency: config.worker_concurrency,
            burst: config.worker_burst,
            rate_per_sec: config.worker_rate_per_sec,
            ..Default::default()
        },
    );

    // --- Background services ---
    let cancel = tokio_util::sync::CancellationToken::new();

    let maintenance_handle = tokio::spawn(run_maintenance(
        Arc::clone(&broker),
        None,
        cancel.clone(),
    ));

    let worker_handle = tokio::spawn(Arc::clone(&worker).run(cancel.clone()));

    let heartbeat_handle = start_heartbeat(Arc::clone(&hub));

    let router = StatusEventRouter::new(Arc::clone(&hub));
    let router_handle = tokio::spawn(router.run(event_bus.subscribe()));

    tracing::info!("Background services started (maintenance, worker pool, heartbeat, fan-out)");

    // --- App state ---
    let state = AppState {
        broker: Arc::clone(&broker),
        dead_letters,
        hub: Arc::clone(&hub),
        event_bus: Arc::clone(&event_bus),
        worker,
        config: Arc::new(config.clone()),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Stop claiming new work first; in-flight executions drain on their own
    // tasks and the broker's stall detection covers stragglers.
    cancel.cancel();
    let drain = Duration::from_secs(config.shutdown_timeout_secs);
    let _ = tokio::time::timeout(drain, worker_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), maintenance_handle).await;
    tracing::info!("Worker pool and maintenance stopped");

    // Drop the event bus sender to close the broadcast channel; this signals
    // the fan-out router to shut down.
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), router_handle).await;
    tracing::info!("Event fan-out stopped");

    let ws_count = hub.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    hub.shutdown_all().await;

    heartbeat_handle.abort();
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server shuts
/// down cleanly whether stopped interactively or by a process manager.
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
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
