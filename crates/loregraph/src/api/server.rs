//! HTTP server lifecycle

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

use super::{AppState, create_router};
use crate::config::ServerConfig;
use crate::error::{LoreError, Result};
use crate::service::MemoryGraph;

/// Serves the HTTP API for one [`MemoryGraph`]
pub struct ApiServer {
    config: ServerConfig,
    graph: Arc<MemoryGraph>,
}

impl ApiServer {
    pub fn new(config: ServerConfig, graph: Arc<MemoryGraph>) -> Self {
        Self { config, graph }
    }

    /// Serve until Ctrl+C or SIGTERM
    pub async fn serve(&self) -> Result<()> {
        self.serve_until(shutdown_signal()).await
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests
    pub async fn serve_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app_state = Arc::new(AppState::new(self.graph.clone(), self.config.clone()));
        let app = create_router(app_state);

        let addr: SocketAddr = self
            .config
            .listen_addr
            .parse()
            .map_err(|e| LoreError::Config(format!("Invalid listen address: {e}")))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| LoreError::Internal(format!("Failed to bind to {addr}: {e}")))?;
        tracing::info!("Loregraph API listening on {addr}");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| LoreError::Internal(format!("Server error: {e}")))?;

        tracing::info!("API server shut down gracefully");
        Ok(())
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
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
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_invalid_listen_addr_is_config_error() {
        let config = ServerConfig {
            listen_addr: "not an address".to_string(),
            ..ServerConfig::default()
        };
        let graph = Arc::new(MemoryGraph::new(&Config::default()));
        let server = ApiServer::new(config, graph);

        let result = server.serve_until(async {}).await;
        assert!(matches!(result, Err(LoreError::Config(_))));
    }
}
