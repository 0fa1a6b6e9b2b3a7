// relay: Library entry point.
// Exposes modules for integration testing.

pub mod agent;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod http_rpc;
pub mod registry;
pub mod session;
pub mod state;
pub mod storage;
pub mod ws;

pub use error::RelayError;
pub use state::AppState;

use crate::agent::{AgentLauncher, ContainerLauncher, DirectLauncher};
use crate::config::RelayConfig;
use crate::registry::SessionRegistry;
use crate::storage::journal::Journal;
use crate::storage::SharedJournal;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::info;

/// Router for the WebSocket JSON-RPC listener.
pub fn build_ws_router(state: AppState) -> Router {
    Router::new().route("/", get(ws::ws_handler)).with_state(state)
}

/// Router for the HTTP JSON-RPC listener.
pub fn build_http_router(state: AppState) -> Router {
    http_rpc::router(state)
}

/// Router for the health listener.
pub fn build_health_router(state: AppState) -> Router {
    health::router(state)
}

/// Construct the launcher selected by the config.
pub fn build_launcher(config: &RelayConfig) -> Arc<dyn AgentLauncher> {
    if config.sandbox.enabled {
        Arc::new(ContainerLauncher::new(
            config
                .sandbox
                .image
                .clone()
                .expect("validated at config load"),
            config.agent.command.clone(),
            config.sandbox.env_allowlist.clone(),
        ))
    } else {
        Arc::new(DirectLauncher::new(config.agent.command.clone()))
    }
}

/// Open the journal, build the registry, and run all three listeners until
/// SIGINT/SIGTERM.  Sessions are shut down before returning.
pub async fn serve(config: RelayConfig) -> Result<(), RelayError> {
    let journal: SharedJournal = Arc::new(Mutex::new(Journal::open(&config.journal.path)?));
    let launcher = build_launcher(&config);
    let agent_command = launcher.command_label();
    let registry = Arc::new(SessionRegistry::new(
        launcher,
        journal.clone(),
        config.protocol_version,
        config.agent.working_directory_policy.clone(),
    ));
    let state = AppState::new(registry.clone(), journal, agent_command);

    let http_listener = tokio::net::TcpListener::bind(config.listen.http)
        .await
        .map_err(RelayError::Listen)?;
    let ws_listener = tokio::net::TcpListener::bind(config.listen.ws)
        .await
        .map_err(RelayError::Listen)?;
    let health_listener = tokio::net::TcpListener::bind(config.listen.health)
        .await
        .map_err(RelayError::Listen)?;
    info!(
        http = %config.listen.http,
        ws = %config.listen.ws,
        health = %config.listen.health,
        "relay listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let http = tokio::spawn(serve_one(
        http_listener,
        build_http_router(state.clone()),
        shutdown_rx.clone(),
    ));
    let ws = tokio::spawn(serve_one(
        ws_listener,
        build_ws_router(state.clone()),
        shutdown_rx.clone(),
    ));
    let health = tokio::spawn(serve_one(
        health_listener,
        build_health_router(state.clone()),
        shutdown_rx,
    ));

    for handle in [http, ws, health] {
        handle
            .await
            .map_err(|e| RelayError::Internal(e.to_string()))?
            .map_err(|e| RelayError::Internal(e.to_string()))?;
    }

    registry.shutdown_all().await;
    info!("relay shut down gracefully");
    Ok(())
}

async fn serve_one(
    listener: tokio::net::TcpListener,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful
/// shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
