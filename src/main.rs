use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use valve_control::common::AppState;
use valve_control::config::{Config, StoreBackend};
use valve_control::routes;
use valve_control::services::bootstrap;
use valve_control::session::SessionRegistry;
use valve_control::store::{FirebaseClient, MemoryStore, StateStore};
use valve_control::sync::reaper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,valve_control=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting valve-control...");

    // Load configuration (fail-fast)
    let config = Config::from_env()?;
    tracing::info!(
        deployment = ?config.deployment,
        backend = ?config.store_backend,
        host = %config.api_host,
        port = config.api_port,
        poll_interval_ms = config.poll_interval_ms,
        live_cache_ttl_ms = config.live_cache_ttl_ms,
        "Configuration loaded"
    );

    // Store client (fail-fast on bad credentials)
    let store: Arc<dyn StateStore> = match config.store_backend {
        StoreBackend::Firebase => {
            let client = FirebaseClient::new(&config)?;
            tracing::info!(url = %config.database_url, "Firebase client initialized");
            Arc::new(client)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; state is lost on exit");
            Arc::new(MemoryStore::new())
        }
    };

    let addr = config.bind_address();
    let state = AppState::new(config, store);

    // Seed the admin account on an empty user collection (non-fatal)
    if let Err(e) = bootstrap::ensure_default_user(&state).await {
        tracing::error!(error = %e, "Credential bootstrap failed; continuing");
    }

    // Expire sessions whose operator went away without logging out
    let background = CancellationToken::new();
    if reaper::spawn(state.clone(), background.clone()).is_none() {
        tracing::warn!("Session expiry disabled; abandoned sessions poll until shutdown");
    }

    let sessions = Arc::clone(&state.sessions);
    let app = routes::build_router(state)?;

    // Start server with graceful shutdown
    tracing::info!(address = %addr, "Starting server");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(sessions, background))
        .await?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then stop background work and every session so
/// open event streams end.
async fn shutdown_signal(sessions: Arc<SessionRegistry>, background: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        },
    }

    background.cancel();
    sessions.shutdown();
}
