//! HTTP server: signaling WebSocket, health check and graceful shutdown

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use relay_sfu::{RelayStats, SignalingGateway};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<SignalingGateway>,
    pub max_message_size: usize,
    /// Flips to `true` when the process is shutting down
    pub shutdown: watch::Receiver<bool>,
}

pub fn create_router(state: AppState, ws_path: &str) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(ws_path, get(ws::websocket_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub stats: RelayStats,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        stats: state.gateway.stats(),
    })
}

pub struct RelayServer {
    config: Config,
    gateway: Arc<SignalingGateway>,
}

impl RelayServer {
    #[must_use]
    pub const fn new(config: Config, gateway: Arc<SignalingGateway>) -> Self {
        Self { config, gateway }
    }

    /// Serve until a shutdown signal arrives, then close every session
    pub async fn start(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let state = AppState {
            gateway: Arc::clone(&self.gateway),
            max_message_size: self.config.server.max_message_size,
            shutdown: shutdown_rx.clone(),
        };
        let router = create_router(state, &self.config.server.ws_path);

        let http_address = self.config.http_address();
        let listener = tokio::net::TcpListener::bind(&http_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_address}: {e}"))?;
        info!(
            address = %http_address,
            ws_path = %self.config.server.ws_path,
            "Relay listening"
        );

        let mut rx = shutdown_rx;
        let graceful = async move {
            let _ = rx.changed().await;
        };
        let mut http_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(graceful).await {
                error!("HTTP server error: {}", e);
            }
            info!("HTTP server shut down gracefully");
        });

        let server_running = tokio::select! {
            _ = &mut http_handle => {
                error!("HTTP server stopped unexpectedly");
                false
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
                true
            }
        };

        // Stop accepting, then close open signaling connections
        let _ = shutdown_tx.send(true);
        if server_running {
            if let Err(e) = http_handle.await {
                error!("HTTP server task failed: {}", e);
            }
        }

        let closed = self.gateway.shutdown().await;
        info!(closed_sessions = closed, "Relay stopped");
        Ok(())
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
